//! Scripted upstream used by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::executor::{HttpMethod, HttpResponse, Transport};

#[derive(Debug, Clone)]
pub enum Reply {
    Response(u16, String),
    TransportError(String),
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Reply::Response(200, body.into())
    }

    pub fn json(value: serde_json::Value) -> Self {
        Reply::Response(200, value.to_string())
    }

    pub fn status(status: u16) -> Self {
        Reply::Response(status, String::new())
    }

    pub fn transport_error(msg: &str) -> Self {
        Reply::TransportError(msg.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Vec<u8>>,
}

impl RecordedRequest {
    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(self.body.as_deref().unwrap_or_default()).unwrap()
    }
}

/// Replays canned replies in order and records every request it sees.
pub struct FakeTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, GatewayError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.map(<[u8]>::to_vec),
        });
        let reply = self.replies.lock().unwrap().pop_front();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Some(Reply::Response(status, body)) => Ok(HttpResponse {
                status,
                body: body.into_bytes(),
            }),
            Some(Reply::TransportError(msg)) => Err(GatewayError::Transport(msg)),
            None => Err(GatewayError::Transport(format!("no scripted reply for {url}"))),
        }
    }
}
