#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use locktree::codec::encode_body;
use locktree::protocol::PushPollData;
use locktree::session::PUSH_POLL_DATA;
use locktree::{
    Encrypter, FieldCipher, Host, HttpRequest, HttpResponse, Interceptor, LockConfig, LockResult,
    MemoryStore, Secret, Transport,
};

pub const SECRET: &str = "correct-horse";

/// Defaults with a cheap KDF so tests stay fast.
pub fn fast_config() -> LockConfig {
    let mut config = LockConfig::default();
    config.crypto.kdf_iterations = 1_000;
    config
}

pub fn endpoint(path: &str) -> String {
    format!("https://workflowy.com{path}")
}

pub async fn encrypter(secret: &str) -> Arc<Encrypter> {
    let encrypter = Encrypter::open(&fast_config(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    encrypter
        .set_secret(Secret::new(secret).unwrap())
        .await
        .unwrap();
    Arc::new(encrypter)
}

/// Records every request; answers from a script, then with `{"results":[]}`.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<HttpRequest>>,
    script: Mutex<VecDeque<HttpResponse>>,
}

impl RecordingTransport {
    pub fn respond_with(&self, response: HttpResponse) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// The `push_poll_data` batches of every recorded push, in send order.
    pub fn pushed_batches(&self) -> Vec<Vec<PushPollData>> {
        self.sent()
            .iter()
            .filter_map(|request| request.body.as_deref())
            .filter_map(|body| encode_body(body).get(PUSH_POLL_DATA).cloned())
            .map(|value| serde_json::from_value(value).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: HttpRequest) -> LockResult<HttpResponse> {
        self.sent.lock().unwrap().push(request);
        let scripted = self.script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| HttpResponse::ok(r#"{"results":[]}"#)))
    }
}

/// Answers every confirmation with a fixed choice.
pub struct ScriptedHost {
    pub answer: bool,
    pub prompts: Mutex<Vec<String>>,
    pub reloads: AtomicUsize,
}

impl ScriptedHost {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
            reloads: AtomicUsize::new(0),
        }
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Host for ScriptedHost {
    async fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub interceptor: Interceptor,
    pub cipher: Arc<Encrypter>,
    pub transport: Arc<RecordingTransport>,
    pub host: Arc<ScriptedHost>,
}

pub async fn harness(confirm: bool) -> Harness {
    let cipher = encrypter(SECRET).await;
    let transport = Arc::new(RecordingTransport::default());
    let host = Arc::new(ScriptedHost::answering(confirm));
    let interceptor = Interceptor::new(
        fast_config(),
        cipher.clone() as Arc<dyn FieldCipher>,
        transport.clone(),
        host.clone(),
    );
    Harness {
        interceptor,
        cipher,
        transport,
        host,
    }
}

/// A form-encoded push carrying `batches`.
pub fn push_request(batches: serde_json::Value) -> HttpRequest {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", "2026-01-01 00:00:00")
        .append_pair("client_version", "21")
        .append_pair("push_poll_id", "abcd1234")
        .append_pair(PUSH_POLL_DATA, &batches.to_string())
        .finish();
    HttpRequest::post(endpoint("/push_and_poll"), body)
}
