//! Session-scoped protocol fields.
//!
//! The web client stamps every push with its client id, build date
//! (`client_version`), and per-document transaction ids. Subtree submissions
//! are requests the client never made, so they replay whatever the client
//! most recently sent.

use std::collections::HashMap;

use crate::codec::{decode_body, FormBody};
use crate::crypto;
use crate::error::LockResult;
use crate::protocol::PushPollData;

pub const CLIENT_ID: &str = "client_id";
pub const CLIENT_VERSION: &str = "client_version";
pub const CROSSCHECK_USER_ID: &str = "crosscheck_user_id";
pub const PUSH_POLL_ID: &str = "push_poll_id";
pub const PUSH_POLL_DATA: &str = "push_poll_data";

#[derive(Debug, Clone, Default)]
pub struct SessionFields {
    pub client_id: Option<String>,
    /// The web client's build date.
    pub client_version: Option<String>,
    pub crosscheck_user_id: Option<String>,
    /// Headers of the last intercepted push, replayed on nested pushes.
    pub headers: Vec<(String, String)>,
    /// Most recent transaction id per share (`None` = primary document).
    transaction_ids: HashMap<Option<String>, String>,
}

impl SessionFields {
    /// Capture fields from an outbound push body.
    pub fn observe_request(&mut self, body: &FormBody, headers: &[(String, String)]) {
        let text = |key: &str| body.get_str(key).map(str::to_owned);
        if let Some(id) = text(CLIENT_ID) {
            self.client_id = Some(id);
        }
        if let Some(version) = text(CLIENT_VERSION) {
            self.client_version = Some(version);
        }
        if let Some(user) = text(CROSSCHECK_USER_ID) {
            self.crosscheck_user_id = Some(user);
        }
        self.headers = headers.to_vec();
    }

    /// Record a transaction id, keeping the known one when `id` is absent.
    pub fn observe_transaction(&mut self, share_id: Option<&str>, id: Option<&str>) {
        if let Some(id) = id {
            self.transaction_ids
                .insert(share_id.map(str::to_owned), id.to_owned());
        }
    }

    pub fn transaction_id(&self, share_id: Option<&str>) -> Option<&str> {
        self.transaction_ids
            .get(&share_id.map(str::to_owned))
            .map(String::as_str)
    }

    /// Build the form body of a push that carries `batches`.
    pub fn push_body(&self, batches: &[PushPollData]) -> LockResult<String> {
        let mut body = FormBody::new();
        if let Some(id) = &self.client_id {
            body.insert(CLIENT_ID, id.clone().into());
        }
        if let Some(version) = &self.client_version {
            body.insert(CLIENT_VERSION, version.clone().into());
        }
        body.insert(PUSH_POLL_ID, crypto::random_token(4)?.into());
        body.insert(PUSH_POLL_DATA, serde_json::to_value(batches)?);
        if let Some(user) = &self.crosscheck_user_id {
            body.insert(CROSSCHECK_USER_ID, user.clone().into());
        }
        Ok(decode_body(&body))
    }
}
