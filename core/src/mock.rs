//! Scripted in-memory transport.
//!
//! Responses are served first-in first-out; once the script runs dry the
//! fallback answers, and without one the call fails with a network error.
//! Every request is recorded. Clones share the same script and log, so a
//! test keeps a handle after moving one into an [`AppContext`].
//!
//! [`AppContext`]: crate::app::AppContext

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::Transport;

type Scripted = Result<HttpResponse, String>;

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Scripted>,
    fallback: Option<HttpResponse>,
    requests: Vec<HttpRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn respond(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push(HttpResponse::new(status, body))
    }

    pub fn respond_json(&self, status: u16, body: &Value) -> &Self {
        self.push(HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        })
    }

    pub fn push(&self, response: HttpResponse) -> &Self {
        self.state().script.push_back(Ok(response));
        self
    }

    /// The next call fails as if the connection broke.
    pub fn fail(&self, message: impl Into<String>) -> &Self {
        self.state().script.push_back(Err(message.into()));
        self
    }

    /// Answer given whenever the script is empty.
    pub fn with_fallback(&self, status: u16, body: impl Into<String>) -> &Self {
        self.state().fallback = Some(HttpResponse::new(status, body));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().requests.clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.state().requests.last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.state().requests.len()
    }
}

impl Transport for MockTransport {
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut state = self.state();
        state.requests.push(request.clone());
        match state.script.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(ApiError::Network(message)),
            None => state
                .fallback
                .clone()
                .ok_or_else(|| ApiError::Network(format!("no scripted response for {}", request.url))),
        }
    }
}
