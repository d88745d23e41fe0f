//! Collaborators supplied by the embedding application: the network and
//! the user-facing shell.

use async_trait::async_trait;

use crate::error::LockResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The real network. Errors are transport failures; HTTP error statuses
/// come back as ordinary responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> LockResult<HttpResponse>;
}

/// The user-facing shell around the interceptor.
#[async_trait]
pub trait Host: Send + Sync {
    /// Ask the user a yes/no question.
    async fn confirm(&self, prompt: &str) -> bool;

    /// Reload the application, discarding client-side state.
    fn reload(&self);

    fn show_progress(&self, _message: &str) {}

    fn hide_progress(&self) {}
}
