//! Client core for the HealthVault XML web service.
//!
//! Every call is an XML envelope POSTed to a single platform endpoint. Calls are signed with an
//! HMAC-SHA-256 keyed by a session secret, and the session itself is bootstrapped through a
//! provisioning handshake and a browser based authorization step in the HealthVault shell.
//!
//! The pieces, bottom up:
//!
//! - [xml]: a small read-only document model over `quick-xml`.
//! - [crypto] and [datetime]: digests, signatures and wire timestamps.
//! - [request]: method calls and the signed envelope they travel in.
//! - [response]: turning response documents into [ResponseResult]s.
//! - [record] and [settings]: authorized records and the persisted session.
//! - [transport]: the POST primitive hosts plug in.
//! - [service]: [HealthVaultService], which ties it together and recovers from expired tokens.
pub mod config;
pub mod crypto;
pub mod datetime;
pub mod record;
pub mod request;
pub mod response;
pub mod service;
pub mod settings;
pub mod transport;
pub mod xml;

pub use config::ServiceConfig;
pub use record::{Record, RecordKey};
pub use request::Request;
pub use response::{ResponseError, ResponseResult, StatusCode};
pub use service::{AuthOutcome, AuthState, HealthVaultService};
pub use settings::{SessionState, SettingsStore};
pub use transport::{Transport, TransportError};
