//! In-process [`Transport`] fakes so retry and pipeline logic can be tested
//! without binding sockets.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use reqwest::header::HeaderMap;

use crate::download::{DownloadError, Transport, TransportResponse};

/// One canned response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Status plus full body.
    Full(u16, Vec<u8>),
    /// 200 whose body stream fails after the given bytes.
    Truncated(Vec<u8>),
    /// Transport-level timeout.
    Timeout,
}

impl ScriptedReply {
    pub fn ok(body: &[u8]) -> Self {
        Self::Full(200, body.to_vec())
    }

    pub fn text(body: &str) -> Self {
        Self::Full(200, body.as_bytes().to_vec())
    }

    pub fn status(status: u16) -> Self {
        Self::Full(status, Vec::new())
    }

    pub fn truncated(body: &[u8]) -> Self {
        Self::Truncated(body.to_vec())
    }

    fn into_response(self, url: &str) -> Result<TransportResponse, DownloadError> {
        match self {
            Self::Full(status, body) => Ok(TransportResponse::from_bytes(url, status, body)),
            Self::Truncated(body) => {
                let owned = url.to_string();
                let chunks: Vec<Result<Bytes, DownloadError>> = vec![
                    Ok(Bytes::from(body)),
                    Err(DownloadError::network(
                        owned,
                        std::io::Error::new(std::io::ErrorKind::ConnectionReset, "stream cut"),
                    )),
                ];
                Ok(TransportResponse::new(url, 200, stream::iter(chunks).boxed()))
            }
            Self::Timeout => Err(DownloadError::timeout(url)),
        }
    }
}

/// Replies in order regardless of URL; 404 once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, _headers: &HeaderMap) -> Result<TransportResponse, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::status(404));
        reply.into_response(url)
    }
}

/// Replies by exact URL; unknown URLs get 404. Records every request.
#[derive(Debug, Default)]
pub struct RouteTransport {
    routes: Mutex<HashMap<String, ScriptedReply>>,
    requested: Mutex<Vec<String>>,
}

impl RouteTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: impl Into<String>, reply: ScriptedReply) -> Self {
        self.routes.lock().unwrap().insert(url.into(), reply);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub fn was_requested(&self, url: &str) -> bool {
        self.requested.lock().unwrap().iter().any(|u| u == url)
    }
}

#[async_trait]
impl Transport for RouteTransport {
    async fn get(&self, url: &str, _headers: &HeaderMap) -> Result<TransportResponse, DownloadError> {
        self.requested.lock().unwrap().push(url.to_string());
        let reply = self
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| ScriptedReply::status(404));
        reply.into_response(url)
    }
}
