//! Provisioning, shell authorization and the authorized record set.
//!
//! A first run has no application instance. `NewApplicationCreationInfo` provisions one and
//! the user confirms it in the shell. After that, session tokens come from
//! `CreateAuthenticatedSessionToken` and the records the user authorized from
//! `GetAuthorizedPeople`.
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Error, HealthVaultService};
use crate::crypto::{self, HMAC_SHA256_ALGORITHM};
use crate::datetime;
use crate::record::records_from_people;
use crate::request::Request;
use crate::response::ResponseResult;
use crate::settings::SessionState;
use crate::xml::{escape, XmlNode};

pub const NEW_APPLICATION_CREATION_INFO: &str = "NewApplicationCreationInfo";
pub const CREATE_AUTHENTICATED_SESSION_TOKEN: &str = "CreateAuthenticatedSessionToken";
pub const GET_AUTHORIZED_PEOPLE: &str = "GetAuthorizedPeople";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum AuthState {
    Uninitialized,
    CheckingSettings,
    NoSession,
    ApplicationPending,
    AwaitingShellAuthorization,
    RequestingToken,
    RequestingRecords,
    SessionReady,
}

impl AuthState {
    /// Where the flow rests given what `session` holds.
    pub(crate) fn resting(session: &SessionState) -> Self {
        if !session.is_application_created() {
            Self::NoSession
        } else if session.is_application_pending() {
            Self::ApplicationPending
        } else {
            Self::SessionReady
        }
    }
}

/// Result of an authentication step that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// A session and at least one authorized record are available.
    Complete,
    /// The user has to visit `url` in the shell, then call
    /// [shell_authorization_completed](HealthVaultService::shell_authorization_completed).
    ShellAuthRequired { url: String },
}

impl HealthVaultService {
    /// Brings the service to a usable session.
    ///
    /// Without an application instance one is provisioned and the shell URL that confirms it is
    /// returned. Otherwise the authorized records are fetched, obtaining a session token first
    /// if needed.
    pub async fn perform_authentication_check(&self) -> Result<AuthOutcome, Error> {
        self.set_state(AuthState::CheckingSettings);
        let created = self.session.read().await.is_application_created();
        if created {
            self.refresh_records().await
        } else {
            self.create_application().await
        }
    }

    /// Runs [perform_authentication_check](Self::perform_authentication_check) on a spawned
    /// task, routing the outcome to one of the two callbacks.
    pub fn spawn_authentication_check<C, S>(
        self: &Arc<Self>,
        on_complete: C,
        on_shell_auth_required: S,
    ) -> JoinHandle<()>
    where
        C: FnOnce(Result<(), Error>) + Send + 'static,
        S: FnOnce(String) + Send + 'static,
    {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            match service.perform_authentication_check().await {
                Ok(AuthOutcome::Complete) => on_complete(Ok(())),
                Ok(AuthOutcome::ShellAuthRequired { url }) => on_shell_auth_required(url),
                Err(e) => on_complete(Err(e)),
            }
        })
    }

    /// Sends the user to the shell to authorize more records for the existing application.
    pub async fn authorize_records(&self) -> Result<AuthOutcome, Error> {
        let url = {
            let session = self.session.read().await;
            if !session.is_application_created() {
                return Err(Error::ApplicationNotCreated);
            }
            self.user_authorization_url_for(&session)
        };
        Ok(self.shell_required(url))
    }

    /// Picks the flow up again after the user returned from the shell.
    pub async fn shell_authorization_completed(&self) -> Result<AuthOutcome, Error> {
        {
            let session = self.session.read().await;
            if !session.is_application_created() {
                return Err(Error::ApplicationNotCreated);
            }
            self.persist(&session)?;
        }
        info!("shell authorization completed");
        self.refresh_records().await
    }

    /// Shell URL that confirms a freshly provisioned application.
    pub async fn application_creation_url(&self) -> Result<String, Error> {
        let session = self.session.read().await;
        if !session.is_application_pending() {
            return Err(Error::ApplicationNotCreated);
        }
        Ok(self.application_creation_url_for(&session))
    }

    /// Shell URL where the user authorizes records for this application.
    pub async fn user_authorization_url(&self) -> Result<String, Error> {
        let session = self.session.read().await;
        if !session.is_application_created() {
            return Err(Error::ApplicationNotCreated);
        }
        Ok(self.user_authorization_url_for(&session))
    }

    async fn create_application(&self) -> Result<AuthOutcome, Error> {
        self.set_state(AuthState::NoSession);
        let request = Request::new(NEW_APPLICATION_CREATION_INFO, 1.0, "<info/>").without_record();

        let mut session = self.session.write().await;
        session.clear_session_token();
        let body = self.envelope(&request, &session, None)?;
        let response = self
            .transmit(&request.method_name, body)
            .await
            .into_result()?;

        let info = info_node(&response, NEW_APPLICATION_CREATION_INFO)?;
        session.application_instance_id =
            Some(required_text(&info, NEW_APPLICATION_CREATION_INFO, "app-id")?);
        session.shared_secret = Some(required_text(
            &info,
            NEW_APPLICATION_CREATION_INFO,
            "shared-secret",
        )?);
        session.application_creation_token = Some(required_text(
            &info,
            NEW_APPLICATION_CREATION_INFO,
            "app-token",
        )?);
        session.set_current_record(None);
        self.records.write().await.clear();
        self.persist(&session)?;

        info!(
            application = ?session.application_instance_id,
            "application instance created"
        );
        let url = self.application_creation_url_for(&session);
        Ok(self.shell_required(url))
    }

    /// Fetches the authorized records and decides what the caller has to do next.
    async fn refresh_records(&self) -> Result<AuthOutcome, Error> {
        let request =
            Request::new(GET_AUTHORIZED_PEOPLE, 1.0, "<info><parameters/></info>").without_record();

        let response = match self.ensure_session_token().await {
            Err(failure) => failure,
            Ok(()) => {
                self.set_state(AuthState::RequestingRecords);
                self.send_request(request).await
            }
        };

        if let Some(error) = response.error() {
            if !error.is_protocol() {
                self.settle_state().await;
                return Err(error.into());
            }
            let session = self.session.read().await;
            if session.is_application_pending() {
                debug!("application not confirmed yet: {error}");
                let url = self.application_creation_url_for(&session);
                drop(session);
                return Ok(self.shell_required(url));
            }
            if error.is_fatal() {
                self.set_state(AuthState::resting(&session));
                return Err(error.into());
            }
            warn!("record authorization needed: {error}");
            let url = self.user_authorization_url_for(&session);
            drop(session);
            return Ok(self.shell_required(url));
        }

        let records = records_from_people(&info_node(&response, GET_AUTHORIZED_PEOPLE)?);
        if records.is_empty() {
            debug!("no records are authorized");
            let url = self.user_authorization_url_for(&*self.session.read().await);
            return Ok(self.shell_required(url));
        }

        let mut session = self.session.write().await;
        let mut store = self.records.write().await;
        store.set_records(records);
        session.set_current_record(store.current_key());
        debug!(
            count = store.records().len(),
            current = ?store.current_key(),
            "authorized records loaded"
        );
        drop(store);
        self.persist(&session)?;
        self.set_state(AuthState::SessionReady);
        Ok(AuthOutcome::Complete)
    }

    fn shell_required(&self, url: String) -> AuthOutcome {
        self.set_state(AuthState::AwaitingShellAuthorization);
        AuthOutcome::ShellAuthRequired { url }
    }

    async fn settle_state(&self) {
        let state = AuthState::resting(&*self.session.read().await);
        self.set_state(state);
    }

    fn application_creation_url_for(&self, session: &SessionState) -> String {
        let query = format!(
            "appid={}&appCreationToken={}&instanceName={}&ismra=true",
            urlencoding::encode(&self.config.master_app_id),
            urlencoding::encode(session.application_creation_token.as_deref().unwrap_or_default()),
            urlencoding::encode(&self.config.instance_name),
        );
        self.shell_redirect("CREATEAPPLICATION", &query)
    }

    fn user_authorization_url_for(&self, session: &SessionState) -> String {
        let query = format!(
            "appid={}&ismra=true",
            urlencoding::encode(session.application_instance_id.as_deref().unwrap_or_default()),
        );
        self.shell_redirect("APPAUTH", &query)
    }

    fn shell_redirect(&self, target: &str, query: &str) -> String {
        format!(
            "{}/redirect.aspx?target={}&targetqs={}",
            self.config.shell_url.trim_end_matches('/'),
            target,
            urlencoding::encode(query),
        )
    }
}

/// Builds the `CreateAuthenticatedSessionToken` call, signed with the application secret.
pub(super) fn session_token_request(
    session: &SessionState,
    now: OffsetDateTime,
) -> Result<Request, Error> {
    let app_id = session
        .application_instance_id
        .as_deref()
        .ok_or(Error::ApplicationNotCreated)?;
    let secret = session
        .shared_secret
        .as_deref()
        .ok_or(Error::ApplicationNotCreated)?;
    let key = crypto::decode_key(secret)?;

    let content = format!(
        "<content><app-id>{}</app-id><hmac>{}</hmac><signing-time>{}</signing-time></content>",
        escape(app_id),
        HMAC_SHA256_ALGORITHM,
        datetime::to_utc_string(now)?,
    );
    let signature = crypto::hmac_sha256_base64(&key, &content)?;
    let info = format!(
        concat!(
            "<info><auth-info><app-id>{}</app-id><credential><appserver2>",
            r#"<hmacSig algName="{}">{}</hmacSig>{}"#,
            "</appserver2></credential></auth-info></info>"
        ),
        escape(app_id),
        HMAC_SHA256_ALGORITHM,
        signature,
        content,
    );
    Ok(Request::new(CREATE_AUTHENTICATED_SESSION_TOKEN, 2.0, info).without_record())
}

/// Session token and session shared secret from a `CreateAuthenticatedSessionToken` answer.
pub(super) fn read_session_token(response: &ResponseResult) -> Result<(String, String), Error> {
    let info = info_node(response, CREATE_AUTHENTICATED_SESSION_TOKEN)?;
    Ok((
        required_text(&info, CREATE_AUTHENTICATED_SESSION_TOKEN, "token")?,
        required_text(&info, CREATE_AUTHENTICATED_SESSION_TOKEN, "shared-secret")?,
    ))
}

fn info_node(response: &ResponseResult, method: &'static str) -> Result<XmlNode, Error> {
    response
        .info_node()
        .map_err(|source| Error::ResponseXml { method, source })
}

fn required_text(
    info: &XmlNode,
    method: &'static str,
    element: &'static str,
) -> Result<String, Error> {
    info.child_text(element)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .ok_or(Error::MissingElement { method, element })
}
