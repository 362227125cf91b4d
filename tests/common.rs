use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::macros::datetime;
use tokio::sync::Notify;

use hvmobile::datetime::FixedClock;
use hvmobile::settings::MemorySettingsStore;
use hvmobile::xml::{self, XmlNode};
use hvmobile::{HealthVaultService, ServiceConfig, Transport, TransportError};

#[allow(dead_code)]
pub const MASTER_APP_ID: &str = "master-app";
#[allow(dead_code)]
pub const INSTANCE_ID: &str = "instance-1";
#[allow(dead_code)]
pub const APP_SECRET: &str = "YXBwbGljYXRpb24tc2VjcmV0";
#[allow(dead_code)]
pub const SHELL_URL: &str = "https://shell.example";

#[allow(dead_code)]
fn main() {}

/// Answers POSTs from a script, in order, and keeps every request body it was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<String, TransportError>>>,
    requests: Mutex<Vec<String>>,
    held: Mutex<Option<(String, Arc<Notify>)>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, body: impl Into<String>) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(body.into()));
        self
    }

    pub fn fail(&self, error: TransportError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// `<method>` of every request sent so far.
    pub fn methods(&self) -> Vec<String> {
        self.requests().iter().map(|body| method_of(body)).collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    /// Holds back the reply to the next call of `method` until the returned gate is notified.
    pub fn hold(&self, method: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.held.lock().unwrap() = Some((method.to_string(), gate.clone()));
        gate
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, _url: &str, body: String) -> Result<String, TransportError> {
        let method = method_of(&body);
        self.requests.lock().unwrap().push(body);
        let gate = {
            let mut held = self.held.lock().unwrap();
            match held.as_ref() {
                Some((name, _)) if *name == method => held.take().map(|(_, gate)| gate),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        // Yield so concurrent callers interleave the way they would on a real network.
        tokio::task::yield_now().await;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("script exhausted".into())))
    }
}

#[allow(dead_code)]
pub fn envelope(body: &str) -> XmlNode {
    xml::parse(body).expect("request envelope is well formed")
}

fn method_of(body: &str) -> String {
    envelope(body)
        .select_path("header/method")
        .map(|method| method.text().to_string())
        .unwrap_or_default()
}

#[allow(dead_code)]
pub fn ok(info: &str) -> String {
    format!(
        r#"<response><status><code>0</code></status><wc:info xmlns:wc="urn:com.microsoft.wc.methods.response">{info}</wc:info></response>"#
    )
}

#[allow(dead_code)]
pub fn status(code: i32, message: &str) -> String {
    format!(
        "<response><status><code>{code}</code><error><message>{message}</message></error></status></response>"
    )
}

#[allow(dead_code)]
pub fn creation_info(app_token: &str) -> String {
    ok(&format!(
        "<app-id>{INSTANCE_ID}</app-id><shared-secret>{APP_SECRET}</shared-secret><app-token>{app_token}</app-token>"
    ))
}

#[allow(dead_code)]
pub fn session_token(token: &str) -> String {
    ok(&format!(
        "<token>{token}</token><shared-secret>{}</shared-secret>",
        base64::encode(format!("{token}-secret"))
    ))
}

#[allow(dead_code)]
pub fn people(records: &[(&str, &str)]) -> String {
    let records: String = records
        .iter()
        .map(|(id, name)| {
            format!(r#"<record id="{id}" app-record-auth-action="NoActionRequired">{name}</record>"#)
        })
        .collect();
    ok(&format!(
        "<response-results><person-info><person-id>person-1</person-id><name>Pat</name>{records}</person-info></response-results>"
    ))
}

#[allow(dead_code)]
pub fn config() -> ServiceConfig {
    ServiceConfig::new(MASTER_APP_ID).with_urls("https://platform.example/wildcat.ashx", SHELL_URL)
}

#[allow(dead_code)]
pub fn service(
    transport: &Arc<ScriptedTransport>,
    settings: &Arc<MemorySettingsStore>,
) -> Arc<HealthVaultService> {
    Arc::new(
        HealthVaultService::new(config(), transport.clone(), settings.clone())
            .expect("valid configuration")
            .with_clock(Arc::new(FixedClock(datetime!(2024-05-06 07:08:09.010 UTC)))),
    )
}

/// A service whose application was provisioned and confirmed in an earlier run.
#[allow(dead_code)]
pub async fn provisioned_service(
    transport: &Arc<ScriptedTransport>,
) -> (Arc<HealthVaultService>, Arc<MemorySettingsStore>) {
    let settings = Arc::new(MemorySettingsStore::new());
    settings
        .insert_raw(
            hvmobile::config::DEFAULT_SETTINGS_NAME,
            format!(
                r#"{{"version":"1.0","session":{{"applicationInstanceId":"{INSTANCE_ID}","sharedSecret":"{APP_SECRET}","language":"en","country":"US"}}}}"#
            ),
        )
        .unwrap();
    let service = service(transport, &settings);
    assert!(service.load_settings().await.unwrap());
    (service, settings)
}
