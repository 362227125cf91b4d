//! Session state and its persisted snapshot.
//!
//! The snapshot is a flat bundle of the session fields plus a format version. Hosts decide
//! where it lives by implementing [SettingsStore]; the core only loads and saves it by name.
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::config::{DEFAULT_COUNTRY, DEFAULT_LANGUAGE};
use crate::record::RecordKey;

/// Version tag written into every snapshot.
pub const SETTINGS_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("unable to encode settings: {0}")]
    Encode(String),
    #[error("unable to decode settings: {0}")]
    Decode(String),
    #[error("settings storage failed: {0}")]
    Storage(String),
}

/// Everything the authentication flow has learned so far.
///
/// Fields fill in as the flow advances; secrets are wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub application_instance_id: Option<String>,
    /// Base64 application shared secret, used to request session tokens.
    #[serde(default)]
    pub shared_secret: Option<String>,
    /// Base64 session shared secret, used to sign requests.
    #[serde(default)]
    pub session_shared_secret: Option<String>,
    #[serde(default)]
    pub authorization_session_token: Option<String>,
    /// Present from application creation until the first session token is issued.
    #[serde(default)]
    pub application_creation_token: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub person_id: Option<String>,
    #[serde(default)]
    pub record_id: Option<String>,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.wipe_secrets();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_LANGUAGE, DEFAULT_COUNTRY)
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("SessionState")
            .field("application_instance_id", &self.application_instance_id)
            .field("shared_secret", &redacted(&self.shared_secret))
            .field("session_shared_secret", &redacted(&self.session_shared_secret))
            .field(
                "authorization_session_token",
                &redacted(&self.authorization_session_token),
            )
            .field(
                "application_creation_token",
                &redacted(&self.application_creation_token),
            )
            .field("language", &self.language)
            .field("country", &self.country)
            .field("person_id", &self.person_id)
            .field("record_id", &self.record_id)
            .finish()
    }
}

impl SessionState {
    pub fn new(language: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            application_instance_id: None,
            shared_secret: None,
            session_shared_secret: None,
            authorization_session_token: None,
            application_creation_token: None,
            language: language.into(),
            country: country.into(),
            person_id: None,
            record_id: None,
        }
    }

    /// An application instance has been provisioned and its shared secret is known.
    pub fn is_application_created(&self) -> bool {
        has_value(&self.application_instance_id) && has_value(&self.shared_secret)
    }

    /// The shell flow for a freshly created application has not been confirmed yet.
    pub fn is_application_pending(&self) -> bool {
        self.is_application_created() && has_value(&self.application_creation_token)
    }

    pub fn has_session_token(&self) -> bool {
        has_value(&self.authorization_session_token)
    }

    pub fn current_record(&self) -> Option<RecordKey> {
        match (&self.person_id, &self.record_id) {
            (Some(person_id), Some(record_id)) => Some(RecordKey {
                person_id: person_id.clone(),
                record_id: record_id.clone(),
            }),
            _ => None,
        }
    }

    pub fn set_current_record(&mut self, key: Option<&RecordKey>) {
        self.person_id = key.map(|k| k.person_id.clone());
        self.record_id = key.map(|k| k.record_id.clone());
    }

    /// Wipes the session token and its secret.
    pub fn clear_session_token(&mut self) {
        self.authorization_session_token.zeroize();
        self.session_shared_secret.zeroize();
    }

    fn wipe_secrets(&mut self) {
        self.clear_session_token();
        self.shared_secret.zeroize();
        self.application_creation_token.zeroize();
    }
}

fn has_value(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// The persisted form of a [SessionState].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub version: String,
    pub session: SessionState,
}

impl SettingsSnapshot {
    pub fn new(session: SessionState) -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION.to_string(),
            session,
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Decode(e.to_string()))
    }

    /// The session, if this snapshot was written in a format this build understands.
    pub fn into_session(self) -> Option<SessionState> {
        if self.version == SETTINGS_FORMAT_VERSION {
            Some(self.session)
        } else {
            tracing::warn!(
                "ignoring settings snapshot with unrecognized version {:?}",
                self.version
            );
            None
        }
    }
}

/// Key-value storage for named snapshots.
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved under `name`.
    fn load(&self, name: &str) -> Result<Option<SettingsSnapshot>, Error>;

    fn save(&self, name: &str, snapshot: &SettingsSnapshot) -> Result<(), Error>;
}

/// Keeps snapshots in memory, JSON encoded as they would be on disk.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw JSON under `name`, bypassing encoding.
    pub fn insert_raw(&self, name: impl Into<String>, json: impl Into<String>) -> Result<(), Error> {
        self.entries
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?
            .insert(name.into(), json.into());
        Ok(())
    }

    pub fn raw(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self
            .entries
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?
            .get(name)
            .cloned())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, name: &str) -> Result<Option<SettingsSnapshot>, Error> {
        self.raw(name)?
            .map(|json| SettingsSnapshot::from_json(&json))
            .transpose()
    }

    fn save(&self, name: &str, snapshot: &SettingsSnapshot) -> Result<(), Error> {
        self.insert_raw(name, snapshot.to_json()?)
    }
}

/// Discards everything, for hosts that do not persist sessions.
impl SettingsStore for () {
    fn load(&self, _name: &str) -> Result<Option<SettingsSnapshot>, Error> {
        Ok(None)
    }

    fn save(&self, _name: &str, _snapshot: &SettingsSnapshot) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn provisioned() -> SessionState {
        let mut session = SessionState::new("fr", "FR");
        session.application_instance_id = Some("app".into());
        session.shared_secret = Some("c2VjcmV0".into());
        session.authorization_session_token = Some("token".into());
        session.session_shared_secret = Some("c2Vzc2lvbg==".into());
        session.person_id = Some("p".into());
        session.record_id = Some("r".into());
        session
    }

    #[test]
    fn snapshot_round_trips_through_store() {
        let store = MemorySettingsStore::new();
        assert!(store.load("main").unwrap().is_none());

        store.save("main", &SettingsSnapshot::new(provisioned())).unwrap();
        let session = store.load("main").unwrap().unwrap().into_session().unwrap();
        assert_eq!(session, provisioned());
        assert!(session.is_application_created());
        assert!(!session.is_application_pending());
        assert_eq!(session.current_record().unwrap().record_id, "r");
    }

    #[test]
    fn unknown_version_is_ignored() {
        let store = MemorySettingsStore::new();
        store
            .insert_raw("main", r#"{"version":"0.1","session":{"applicationInstanceId":"app"}}"#)
            .unwrap();
        assert!(store.load("main").unwrap().unwrap().into_session().is_none());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let store = MemorySettingsStore::new();
        store.insert_raw("main", "not json").unwrap();
        assert!(matches!(store.load("main"), Err(Error::Decode(_))));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let snapshot =
            SettingsSnapshot::from_json(r#"{"version":"1.0","session":{"applicationInstanceId":"app"}}"#)
                .unwrap();
        let session = snapshot.into_session().unwrap();
        assert_eq!(session.language, DEFAULT_LANGUAGE);
        assert_eq!(session.country, DEFAULT_COUNTRY);
        assert!(!session.is_application_created());
    }

    #[test]
    fn partial_snapshot_loads_through_the_store() {
        let store = MemorySettingsStore::new();
        store
            .insert_raw(
                "main",
                r#"{"version":"1.0","session":{"sharedSecret":"c2VjcmV0","country":"CA","recordId":"r"}}"#,
            )
            .unwrap();
        let session = store.load("main").unwrap().unwrap().into_session().unwrap();
        assert_eq!(session.shared_secret.as_deref(), Some("c2VjcmV0"));
        assert_eq!(session.language, DEFAULT_LANGUAGE);
        assert_eq!(session.country, "CA");
        assert_eq!(session.record_id.as_deref(), Some("r"));
        assert_eq!(session.current_record(), None);
    }

    #[test]
    fn wiping_removes_every_secret() {
        let mut session = provisioned();
        session.application_creation_token = Some("creation".into());
        session.wipe_secrets();
        assert_eq!(session.shared_secret, None);
        assert_eq!(session.session_shared_secret, None);
        assert_eq!(session.authorization_session_token, None);
        assert_eq!(session.application_creation_token, None);
        assert_eq!(session.application_instance_id.as_deref(), Some("app"));
        assert_eq!(session.record_id.as_deref(), Some("r"));
    }

    #[test]
    fn secrets_are_not_printed() {
        let printed = format!("{:?}", provisioned());
        assert!(!printed.contains("c2VjcmV0"));
        assert!(!printed.contains("token\""));
        assert!(printed.contains("app"));
    }

    #[test]
    fn clearing_the_token_keeps_the_application() {
        let mut session = provisioned();
        session.clear_session_token();
        assert!(!session.has_session_token());
        assert!(session.session_shared_secret.is_none());
        assert!(session.is_application_created());
    }
}
