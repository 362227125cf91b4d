//! The session orchestrator.
//!
//! [HealthVaultService] owns the [SessionState] and the [RecordStore] and is the single path
//! every call takes to the service: it stamps credentials, signs, transmits, interprets and
//! recovers from expired session tokens.
//!
//! Session and record state sit behind `tokio` read-write locks, always taken in that order.
//! A token refresh holds the session write lock for its whole round trip, so calls that start
//! while it is in flight wait for the new token instead of racing ahead with the old one.
//!
//! # Example
//!
//! ```ignore
//! let service = Arc::new(HealthVaultService::new(
//!     ServiceConfig::new(MASTER_APP_ID),
//!     Arc::new(ReqwestTransport::new()?),
//!     Arc::new(MemorySettingsStore::new()),
//! )?);
//! service.load_settings().await?;
//! match service.perform_authentication_check().await? {
//!     AuthOutcome::Complete => {}
//!     AuthOutcome::ShellAuthRequired { url } => open_browser(&url),
//! }
//! let things = service
//!     .send_request(Request::new("GetThings", 3.0, "<info><group/></info>"))
//!     .await;
//! ```
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::config::{self, ServiceConfig};
use crate::crypto;
use crate::datetime::{self, Clock, SystemClock};
use crate::record::{self, Record, RecordKey, RecordStore};
use crate::request::{self, Envelope, Request};
use crate::response::{
    ResponseError, ResponseResult, StatusCode, RESPONSE_INVALID_REQUEST, RESPONSE_MALFORMED,
};
use crate::settings::{self, SessionState, SettingsSnapshot, SettingsStore};
use crate::transport::Transport;
use crate::xml;

mod authentication;

pub use authentication::{
    AuthOutcome, AuthState, CREATE_AUTHENTICATED_SESSION_TOKEN, GET_AUTHORIZED_PEOPLE,
    NEW_APPLICATION_CREATION_INFO,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error("application instance has not been created")]
    ApplicationNotCreated,
    #[error("{method} response is missing <{element}>")]
    MissingElement {
        method: &'static str,
        element: &'static str,
    },
    #[error("unable to read {method} response: {source}")]
    ResponseXml {
        method: &'static str,
        #[source]
        source: xml::Error,
    },
    #[error(transparent)]
    Request(#[from] request::Error),
    #[error(transparent)]
    Crypto(#[from] crypto::Error),
    #[error(transparent)]
    DateTime(#[from] datetime::Error),
    #[error(transparent)]
    Record(#[from] record::Error),
    #[error(transparent)]
    Settings(#[from] settings::Error),
    #[error(transparent)]
    Config(#[from] config::Error),
}

/// Client for the HealthVault web service.
pub struct HealthVaultService {
    config: ServiceConfig,
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    session: RwLock<SessionState>,
    records: RwLock<RecordStore>,
    state: Mutex<AuthState>,
}

impl HealthVaultService {
    pub fn new(
        config: ServiceConfig,
        transport: Arc<dyn Transport>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let session = SessionState::new(config.language.clone(), config.country.clone());
        Ok(Self {
            config,
            transport,
            settings,
            clock: Arc::new(SystemClock),
            session: RwLock::new(session),
            records: RwLock::new(RecordStore::new()),
            state: Mutex::new(AuthState::Uninitialized),
        })
    }

    /// Replaces the wall clock used for message times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn state(&self) -> AuthState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn set_state(&self, next: AuthState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state != next {
            debug!("authentication state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Restores the last saved session. Returns whether one was found.
    ///
    /// A missing snapshot, or one written in an unknown format, leaves the service without a
    /// session.
    pub async fn load_settings(&self) -> Result<bool, Error> {
        self.set_state(AuthState::CheckingSettings);
        let loaded = self
            .settings
            .load(&self.config.settings_name)?
            .and_then(SettingsSnapshot::into_session);

        let mut session = self.session.write().await;
        let resumed = match loaded {
            Some(saved) => {
                *session = saved;
                true
            }
            None => false,
        };
        *self.records.write().await = RecordStore::with_current(session.current_record());
        self.set_state(AuthState::resting(&session));
        debug!(
            resumed,
            application = ?session.application_instance_id,
            "settings loaded"
        );
        Ok(resumed)
    }

    pub async fn save_settings(&self) -> Result<(), Error> {
        let session = self.session.read().await;
        self.persist(&session)
    }

    /// A copy of the current session state.
    pub async fn session(&self) -> SessionState {
        self.session.read().await.clone()
    }

    pub async fn is_application_created(&self) -> bool {
        self.session.read().await.is_application_created()
    }

    pub async fn records(&self) -> Vec<Record> {
        self.records.read().await.records().to_vec()
    }

    pub async fn current_record(&self) -> Option<Record> {
        self.records.read().await.current().cloned()
    }

    /// Switches subsequent calls to `record` and saves the choice.
    pub async fn set_current_record(&self, record: &Record) -> Result<(), Error> {
        let mut session = self.session.write().await;
        let mut records = self.records.write().await;
        records.set_current(record)?;
        session.set_current_record(records.current_key());
        drop(records);
        self.persist(&session)
    }

    /// Sends `request` and returns the final outcome.
    ///
    /// An application without a session token gets one first. If the service reports the token
    /// expired, it is renewed once and the call replayed once; a second expiry is returned as is.
    pub async fn send_request(&self, request: Request) -> ResponseResult {
        let correlation = Uuid::new_v4();
        debug!(%correlation, method = %request.method_name, "sending request");

        let mut replayed = false;
        loop {
            if let Err(failure) = self.ensure_session_token().await {
                return failure;
            }

            let (body, token) = {
                let session = self.session.read().await;
                let records = self.records.read().await;
                match self.envelope(&request, &session, records.current_key()) {
                    Ok(body) => (body, session.authorization_session_token.clone()),
                    Err(error) => {
                        return ResponseResult::local_failure(
                            &request.method_name,
                            RESPONSE_INVALID_REQUEST,
                            error.to_string(),
                        )
                    }
                }
            };

            let response = self.transmit(&request.method_name, body).await;
            if response.status() != StatusCode::AuthSessionTokenExpired || token.is_none() {
                return response;
            }
            if replayed {
                warn!(%correlation, "session token expired again after renewal");
                return response;
            }

            debug!(%correlation, "session token expired, renewing");
            if let Err(failure) = self.refresh_session_token(token.as_deref()).await {
                return failure;
            }
            replayed = true;
        }
    }

    /// Runs [send_request](Self::send_request) on a spawned task and hands the outcome to
    /// `on_complete`.
    pub fn spawn_request<F>(self: &Arc<Self>, request: Request, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(ResponseResult) + Send + 'static,
    {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let response = service.send_request(request).await;
            on_complete(response);
        })
    }

    async fn ensure_session_token(&self) -> Result<(), ResponseResult> {
        let needs_token = {
            let session = self.session.read().await;
            session.is_application_created() && !session.has_session_token()
        };
        if needs_token {
            self.refresh_session_token(None).await
        } else {
            Ok(())
        }
    }

    /// Replaces the session token `stale` with a fresh one.
    ///
    /// If another call already replaced it while this one waited for the lock, nothing is sent.
    async fn refresh_session_token(&self, stale: Option<&str>) -> Result<(), ResponseResult> {
        let mut session = self.session.write().await;
        if session.authorization_session_token.as_deref() != stale {
            return Ok(());
        }

        self.set_state(AuthState::RequestingToken);
        session.clear_session_token();

        let invalid = |error: Error| {
            ResponseResult::local_failure(
                CREATE_AUTHENTICATED_SESSION_TOKEN,
                RESPONSE_INVALID_REQUEST,
                error.to_string(),
            )
        };
        let request =
            authentication::session_token_request(&session, self.clock.now()).map_err(invalid)?;
        let body = self
            .envelope(&request, &session, None)
            .map_err(|e| invalid(e.into()))?;

        let response = self.transmit(&request.method_name, body).await;
        if response.has_error() {
            self.set_state(AuthState::resting(&session));
            return Err(response);
        }

        let (token, secret) = match authentication::read_session_token(&response) {
            Ok(credentials) => credentials,
            Err(error) => {
                self.set_state(AuthState::resting(&session));
                let mut failure = ResponseResult::local_failure(
                    &response.method,
                    RESPONSE_MALFORMED,
                    error.to_string(),
                );
                failure.raw_xml = response.raw_xml;
                return Err(failure);
            }
        };
        session.authorization_session_token = Some(token);
        session.session_shared_secret = Some(secret);
        session.application_creation_token = None;
        self.persist_or_log(&session);
        self.set_state(AuthState::SessionReady);
        debug!("session token renewed");
        Ok(())
    }

    fn envelope(
        &self,
        request: &Request,
        session: &SessionState,
        current: Option<&RecordKey>,
    ) -> Result<String, request::Error> {
        let mut envelope = Envelope::new(request, self.clock.now());
        envelope.app_id = session
            .application_instance_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or(Some(self.config.master_app_id.as_str()));
        envelope.auth_token = session.authorization_session_token.as_deref();
        envelope.session_shared_secret = session.session_shared_secret.as_deref();
        if request.use_current_record && request.record_id.is_none() {
            if let Some(key) = current {
                envelope.record_id = Some(key.record_id.as_str());
                envelope.person_id = Some(key.person_id.as_str());
            }
        }
        envelope.language = session.language.as_str();
        envelope.country = session.country.as_str();
        envelope.msg_ttl = self.config.msg_ttl;
        envelope.platform_version = self.config.platform_version.as_str();
        envelope.to_xml()
    }

    async fn transmit(&self, method: &str, body: String) -> ResponseResult {
        if self.config.log_wire {
            trace!(method, request = %body, "request");
        }
        let outcome = self
            .transport
            .post(&self.config.health_service_url, body)
            .await;
        let response = ResponseResult::from_transport(method, outcome);
        if self.config.log_wire {
            trace!(method, response = %response.raw_xml, "response");
        }
        if let Some(error) = response.error() {
            debug!("{error}");
        }
        response
    }

    fn persist(&self, session: &SessionState) -> Result<(), Error> {
        self.settings.save(
            &self.config.settings_name,
            &SettingsSnapshot::new(session.clone()),
        )?;
        Ok(())
    }

    /// Persists where a failure must not fail the call that triggered it.
    fn persist_or_log(&self, session: &SessionState) {
        if let Err(e) = self.persist(session) {
            error!("unable to save settings: {e}");
        }
    }
}
