//! Interpretation of service responses.
//!
//! A response body looks like
//!
//! ```text
//! <response>
//!   <status><code>3</code><error><message>…</message><context>…</context></error></status>
//!   <wc:info xmlns:wc="…">…</wc:info>
//! </response>
//! ```
//!
//! and becomes a [ResponseResult]. Transport failures and bodies that cannot be read are folded
//! into the same type under local status codes that the service never sends.
use serde::{Deserialize, Serialize};

use crate::transport::TransportError;
use crate::xml::{self, XmlNode};

/// The call succeeded.
pub const RESPONSE_OK: i32 = 0;
/// The application does not exist, is not active, or the calling address is not allowed.
pub const RESPONSE_INVALID_APPLICATION: i32 = 6;
/// The credentials are not allowed to perform the call.
pub const RESPONSE_ACCESS_DENIED: i32 = 8;
/// The session token has expired and must be renewed.
pub const RESPONSE_AUTH_SESSION_TOKEN_EXPIRED: i32 = 65;

/// Local: the request never reached the service or no answer came back.
pub const RESPONSE_TRANSPORT_FAILURE: i32 = -1;
/// Local: the answer was not a readable response document.
pub const RESPONSE_MALFORMED: i32 = -2;
/// Local: the request could not be built.
pub const RESPONSE_INVALID_REQUEST: i32 = -3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum StatusCode {
    Ok,
    InvalidApplication,
    AccessDenied,
    AuthSessionTokenExpired,
    TransportFailure,
    MalformedResponse,
    InvalidRequest,
    Other(i32),
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        match code {
            RESPONSE_OK => Self::Ok,
            RESPONSE_INVALID_APPLICATION => Self::InvalidApplication,
            RESPONSE_ACCESS_DENIED => Self::AccessDenied,
            RESPONSE_AUTH_SESSION_TOKEN_EXPIRED => Self::AuthSessionTokenExpired,
            RESPONSE_TRANSPORT_FAILURE => Self::TransportFailure,
            RESPONSE_MALFORMED => Self::MalformedResponse,
            RESPONSE_INVALID_REQUEST => Self::InvalidRequest,
            other => Self::Other(other),
        }
    }
}

/// Why a call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("{method}: transport failure: {message}")]
    Transport { method: String, message: String },
    #[error("{method}: malformed response: {message}")]
    MalformedResponse { method: String, message: String },
    #[error("{method}: request could not be built: {message}")]
    InvalidRequest { method: String, message: String },
    #[error("{method}: service returned status {code}: {}", .text.as_deref().unwrap_or("no description"))]
    Protocol {
        method: String,
        code: i32,
        text: Option<String>,
        context: Option<String>,
    },
}

impl ResponseError {
    /// Invalid application and access denied end the session; nothing is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol {
                code: RESPONSE_INVALID_APPLICATION | RESPONSE_ACCESS_DENIED,
                ..
            }
        )
    }

    /// Whether the service itself answered, as opposed to a local or transport failure.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Transport { .. } => RESPONSE_TRANSPORT_FAILURE,
            Self::MalformedResponse { .. } => RESPONSE_MALFORMED,
            Self::InvalidRequest { .. } => RESPONSE_INVALID_REQUEST,
            Self::Protocol { code, .. } => *code,
        }
    }
}

/// Outcome of one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseResult {
    /// Method of the request this answers.
    pub method: String,
    pub status_code: i32,
    /// Contents of the `info` element on success.
    pub info_xml: Option<String>,
    pub raw_xml: String,
    pub error_text: Option<String>,
    pub error_context_xml: Option<String>,
    pub error_info: Option<String>,
}

impl ResponseResult {
    /// Interprets what the transport handed back for a call to `method`.
    pub fn from_transport(method: &str, outcome: Result<String, TransportError>) -> Self {
        match outcome {
            Ok(body) => Self::parse(method, body),
            Err(error) => Self::local_failure(method, RESPONSE_TRANSPORT_FAILURE, error.to_string()),
        }
    }

    /// Interprets a response body.
    pub fn parse(method: &str, body: String) -> Self {
        let root = match xml::parse(&body) {
            Ok(root) => root,
            Err(error) => {
                let mut result = Self::local_failure(method, RESPONSE_MALFORMED, error.to_string());
                result.raw_xml = body;
                return result;
            }
        };

        let code = root
            .select_local("status")
            .next()
            .and_then(|status| status.select_single_node("code"))
            .map(|code| code.text().parse::<i32>());
        let status_code = match code {
            Some(Ok(code)) => code,
            Some(Err(error)) => {
                let mut result = Self::local_failure(
                    method,
                    RESPONSE_MALFORMED,
                    format!("status code is not a number: {error}"),
                );
                result.raw_xml = body;
                return result;
            }
            None => {
                let mut result =
                    Self::local_failure(method, RESPONSE_MALFORMED, "response has no status code".into());
                result.raw_xml = body;
                return result;
            }
        };

        let error = root
            .select_local("status")
            .next()
            .and_then(|status| status.select_single_node("error"));
        let error_text = error.and_then(|e| {
            e.child_text("description")
                .or_else(|| e.child_text("message"))
                .map(str::to_string)
        });
        let error_context_xml = error
            .and_then(|e| e.select_single_node("context"))
            .map(|c| c.inner_xml().to_string());
        let error_info = error.and_then(|e| e.child_text("error-info").map(str::to_string));
        let info_xml = root
            .select_local("info")
            .next()
            .map(|info| info.inner_xml().to_string());

        Self {
            method: method.to_string(),
            status_code,
            info_xml,
            raw_xml: body,
            error_text,
            error_context_xml,
            error_info,
        }
    }

    pub(crate) fn local_failure(method: &str, code: i32, message: String) -> Self {
        Self {
            method: method.to_string(),
            status_code: code,
            info_xml: None,
            raw_xml: String::new(),
            error_text: Some(message),
            error_context_xml: None,
            error_info: None,
        }
    }

    pub fn has_error(&self) -> bool {
        self.status_code != RESPONSE_OK
    }

    pub fn status(&self) -> StatusCode {
        self.status_code.into()
    }

    /// The failure carried by this result, if any.
    pub fn error(&self) -> Option<ResponseError> {
        let method = self.method.clone();
        let message = || self.error_text.clone().unwrap_or_default();
        match self.status_code {
            RESPONSE_OK => None,
            RESPONSE_TRANSPORT_FAILURE => Some(ResponseError::Transport {
                method,
                message: message(),
            }),
            RESPONSE_MALFORMED => Some(ResponseError::MalformedResponse {
                method,
                message: message(),
            }),
            RESPONSE_INVALID_REQUEST => Some(ResponseError::InvalidRequest {
                method,
                message: message(),
            }),
            code => Some(ResponseError::Protocol {
                method,
                code,
                text: self.error_text.clone(),
                context: self.error_context_xml.clone(),
            }),
        }
    }

    /// `Ok(self)` on success, the failure otherwise.
    pub fn into_result(self) -> Result<Self, ResponseError> {
        match self.error() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }

    /// Parses the info payload. A successful response without one yields an empty fragment.
    pub fn info_node(&self) -> Result<XmlNode, xml::Error> {
        xml::parse_fragment(self.info_xml.as_deref().unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn success_with_info() {
        let result = ResponseResult::parse(
            "GetThings",
            "<response><status><code>0</code></status><info><thing/></info></response>".into(),
        );
        assert_eq!(result.status_code, 0);
        assert_eq!(result.info_xml.as_deref(), Some("<thing/>"));
        assert_eq!(result.error_text, None);
        assert!(!result.has_error());
        assert!(result.error().is_none());
        assert!(result.info_node().unwrap().select_single_node("thing").is_some());
    }

    #[test]
    fn namespaced_info_and_declaration() {
        let body = concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<response><status><code>0</code></status>"#,
            r#"<wc:info xmlns:wc="urn:com.microsoft.wc.methods.response.X"><token>t</token></wc:info>"#,
            r#"</response>"#
        );
        let result = ResponseResult::parse("X", body.into());
        assert_eq!(result.info_xml.as_deref(), Some("<token>t</token>"));
        assert_eq!(result.info_node().unwrap().child_text("token"), Some("t"));
    }

    #[test]
    fn protocol_error_keeps_description_and_context() {
        let body = concat!(
            "<response><status><code>11</code><error>",
            "<message>Invalid XML</message>",
            "<context><server-name>hv1</server-name></context>",
            "<error-info>stack</error-info>",
            "</error></status></response>"
        );
        let result = ResponseResult::parse("PutThings", body.into());
        assert!(result.has_error());
        assert_eq!(result.status(), StatusCode::Other(11));
        assert_eq!(result.error_text.as_deref(), Some("Invalid XML"));
        assert_eq!(
            result.error_context_xml.as_deref(),
            Some("<server-name>hv1</server-name>")
        );
        assert_eq!(result.error_info.as_deref(), Some("stack"));
        let error = result.error().unwrap();
        assert!(error.is_protocol());
        assert!(!error.is_fatal());
        assert_eq!(error.code(), 11);
    }

    #[test]
    fn known_codes_are_classified() {
        for (code, status, fatal) in [
            (6, StatusCode::InvalidApplication, true),
            (8, StatusCode::AccessDenied, true),
            (65, StatusCode::AuthSessionTokenExpired, false),
        ] {
            let body = format!(
                "<response><status><code>{code}</code><error><description>d</description></error></status></response>"
            );
            let result = ResponseResult::parse("M", body);
            assert_eq!(result.status(), status);
            assert_eq!(result.error_text.as_deref(), Some("d"));
            assert_eq!(result.error().unwrap().is_fatal(), fatal);
        }
    }

    #[test]
    fn malformed_body_is_an_error_not_a_panic() {
        let result = ResponseResult::parse("M", "<response><status>".into());
        assert_eq!(result.status(), StatusCode::MalformedResponse);
        assert!(result.has_error());
        assert_eq!(result.raw_xml, "<response><status>");
        assert!(matches!(
            result.error(),
            Some(ResponseError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn deeply_nested_info_is_malformed() {
        let depth = 16_000;
        let body = format!(
            "<response><status><code>0</code></status><info>{}{}</info></response>",
            "<a>".repeat(depth),
            "</a>".repeat(depth)
        );
        let result = ResponseResult::parse("M", body);
        assert_eq!(result.status(), StatusCode::MalformedResponse);
        assert!(result.error_text.unwrap().contains("nested"));
    }

    #[test]
    fn missing_or_bad_status_is_malformed() {
        for body in [
            "<response><info/></response>",
            "<response><status><code>zero</code></status></response>",
        ] {
            let result = ResponseResult::parse("M", body.into());
            assert_eq!(result.status_code, RESPONSE_MALFORMED, "{body}");
        }
    }

    #[test]
    fn transport_failure_has_no_server_status() {
        let result =
            ResponseResult::from_transport("M", Err(TransportError::Connection("refused".into())));
        assert_eq!(result.status(), StatusCode::TransportFailure);
        assert!(result.raw_xml.is_empty());
        assert!(matches!(
            result.into_result(),
            Err(ResponseError::Transport { .. })
        ));
    }

    #[test]
    fn has_error_tracks_status_code() {
        for code in [-3, -2, -1, 0, 1, 6, 8, 65, 1000] {
            let body = format!("<response><status><code>{code}</code></status></response>");
            let result = ResponseResult::parse("M", body);
            assert_eq!(result.has_error(), code != 0);
        }
    }
}
