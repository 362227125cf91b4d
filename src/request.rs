//! Method calls and the signed envelope they travel in.
//!
//! The envelope is assembled by templating known element names around escaped values, which
//! keeps the bytes identical to what the service has always accepted:
//!
//! ```text
//! <wc-request:request xmlns:wc-request="urn:com.microsoft.wc.request">
//!   <auth-info><app-id>…</app-id><token>…</token></auth-info>
//!   <header>
//!     <method>…</method><method-version>…</method-version>
//!     <record-id>…</record-id><offline-person-info>…</offline-person-info>
//!     <language>…</language><country>…</country>
//!     <msg-time>…</msg-time><msg-ttl>…</msg-ttl><version>…</version>
//!     <info-hash><hash-data …/></info-hash><auth><hmac-data …/></auth>
//!   </header>
//!   <info>…</info>
//! </wc-request:request>
//! ```
//!
//! The token, the record elements and the signature are only present when the corresponding
//! session values are. Building never touches the network.
use time::OffsetDateTime;

use crate::crypto;
use crate::datetime;
use crate::xml::escape;

pub const REQUEST_NAMESPACE: &str = "urn:com.microsoft.wc.request";

/// Message time-to-live used unless configured otherwise.
pub const DEFAULT_MSG_TTL: u32 = 1800;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("message ttl must be a positive number of seconds")]
    InvalidTtl,
    #[error("method name must not be empty")]
    MissingMethodName,
    #[error("method version must be a whole number, got {0}")]
    InvalidMethodVersion(f32),
    #[error("unable to sign request: {0}")]
    Signing(#[from] crypto::Error),
    #[error("unable to stamp message time: {0}")]
    MessageTime(#[from] datetime::Error),
}

/// A single call to a service method.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method_name: String,
    /// Must be a whole number; it is sent without a fractional part.
    pub method_version: f32,
    /// The `<info>` element sent verbatim as the body of the call.
    pub info_xml: String,
    pub record_id: Option<String>,
    pub person_id: Option<String>,
    /// Stamp the ids of the current record when none are set explicitly.
    pub use_current_record: bool,
}

impl Request {
    pub fn new(method_name: impl Into<String>, method_version: f32, info_xml: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            method_version,
            info_xml: info_xml.into(),
            record_id: None,
            person_id: None,
            use_current_record: true,
        }
    }

    /// Targets a specific record instead of the current one.
    pub fn for_record(mut self, person_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        self.person_id = Some(person_id.into());
        self.record_id = Some(record_id.into());
        self
    }

    /// Sends the call without any record context.
    pub fn without_record(mut self) -> Self {
        self.record_id = None;
        self.person_id = None;
        self.use_current_record = false;
        self
    }
}

/// Everything needed to turn a [Request] into wire bytes.
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    pub request: &'a Request,
    /// Application instance id, or the master application id before provisioning.
    pub app_id: Option<&'a str>,
    pub auth_token: Option<&'a str>,
    /// Base64 session shared secret; the envelope is signed only when present.
    pub session_shared_secret: Option<&'a str>,
    pub record_id: Option<&'a str>,
    pub person_id: Option<&'a str>,
    pub language: &'a str,
    pub country: &'a str,
    pub msg_time: OffsetDateTime,
    pub msg_ttl: u32,
    pub platform_version: &'a str,
}

impl<'a> Envelope<'a> {
    /// An unauthenticated envelope with no record context.
    pub fn new(request: &'a Request, msg_time: OffsetDateTime) -> Self {
        Self {
            request,
            app_id: None,
            auth_token: None,
            session_shared_secret: None,
            record_id: request.record_id.as_deref(),
            person_id: request.person_id.as_deref(),
            language: crate::config::DEFAULT_LANGUAGE,
            country: crate::config::DEFAULT_COUNTRY,
            msg_time,
            msg_ttl: DEFAULT_MSG_TTL,
            platform_version: crate::config::DEFAULT_PLATFORM_VERSION,
        }
    }

    pub fn to_xml(&self) -> Result<String, Error> {
        if self.msg_ttl == 0 {
            return Err(Error::InvalidTtl);
        }
        if self.request.method_name.trim().is_empty() {
            return Err(Error::MissingMethodName);
        }
        let version = self.request.method_version;
        if !version.is_finite() || version.is_sign_negative() || version.fract() != 0.0 {
            return Err(Error::InvalidMethodVersion(version));
        }

        let info = self.request.info_xml.as_str();
        let mut xml = String::with_capacity(512 + info.len());
        xml.push_str(&format!(
            r#"<wc-request:request xmlns:wc-request="{REQUEST_NAMESPACE}">"#
        ));
        xml.push_str(&self.auth_info());
        xml.push_str(&self.header()?);
        xml.push_str(info);
        xml.push_str("</wc-request:request>");
        Ok(xml)
    }

    fn auth_info(&self) -> String {
        let mut block = String::from("<auth-info>");
        if let Some(app_id) = self.app_id {
            block.push_str(&format!("<app-id>{}</app-id>", escape(app_id)));
        }
        if let Some(token) = self.auth_token.filter(|t| !t.is_empty()) {
            block.push_str(&format!("<token>{}</token>", escape(token)));
        }
        block.push_str("</auth-info>");
        block
    }

    fn header(&self) -> Result<String, Error> {
        let mut header = String::from("<header>");
        header.push_str(&format!(
            "<method>{}</method><method-version>{}</method-version>",
            escape(&self.request.method_name),
            self.request.method_version
        ));
        if let Some(record_id) = self.record_id {
            header.push_str(&format!("<record-id>{}</record-id>", escape(record_id)));
        }
        if let (Some(person_id), Some(_)) = (self.person_id, self.auth_token) {
            header.push_str(&format!(
                "<offline-person-info><offline-person-id>{}</offline-person-id></offline-person-info>",
                escape(person_id)
            ));
        }
        header.push_str(&format!(
            "<language>{}</language><country>{}</country><msg-time>{}</msg-time><msg-ttl>{}</msg-ttl><version>{}</version>",
            escape(self.language),
            escape(self.country),
            datetime::to_utc_string(self.msg_time)?,
            self.msg_ttl,
            escape(self.platform_version),
        ));
        if let Some(secret) = self.session_shared_secret.filter(|s| !s.is_empty()) {
            let key = crypto::decode_key(secret)?;
            let info = self.request.info_xml.as_str();
            header.push_str(&format!(
                "<info-hash>{}</info-hash><auth>{}</auth>",
                crypto::sha256_wrapped(info),
                crypto::hmac_sha256_wrapped(&key, info)?
            ));
        }
        header.push_str("</header>");
        Ok(header)
    }
}
