use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

/// Parameters for opening one stream.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// Full URL of the streaming endpoint.
    pub url: String,
    pub session_token: String,
}

impl StreamRequest {
    /// JSON request body: `{"apiKey": "<token>"}`.
    pub fn body(&self) -> String {
        serde_json::json!({ "apiKey": self.session_token }).to_string()
    }
}

/// Opens the long-lived response body for a stream request.
///
/// The returned reader yields the raw body bytes; transfer encoding is the
/// transport's concern.
pub trait StreamTransport {
    fn open(&mut self, request: &StreamRequest) -> Result<Box<dyn Read + Send>>;
}

impl<T: StreamTransport + ?Sized> StreamTransport for Box<T> {
    fn open(&mut self, request: &StreamRequest) -> Result<Box<dyn Read + Send>> {
        (**self).open(request)
    }
}

/// HTTP transport over a blocking ureq agent.
///
/// Only the connect phase is bounded; reads block until data or close, so a
/// stalled connection surfaces only when the server ends the body.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .build();
        Self { agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl StreamTransport for HttpTransport {
    fn open(&mut self, request: &StreamRequest) -> Result<Box<dyn Read + Send>> {
        let response = match self
            .agent
            .post(&request.url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/x-ndjson")
            .send_string(&request.body())
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(anyhow!(
                    "failed to open detection stream: server returned status {}",
                    code
                ))
            }
            Err(e) => {
                return Err(e).with_context(|| format!("connect to {}", request.url));
            }
        };
        log::debug!(
            "stream opened: status={} content_type={}",
            response.status(),
            response.content_type()
        );
        Ok(Box::new(response.into_reader()))
    }
}

/// Transport over bytes already in memory, delivered in fixed chunks.
///
/// Used by tests and by replaying a captured stream.
pub struct ReplayTransport {
    chunks: Vec<Vec<u8>>,
    open_error: Option<String>,
    opens: usize,
}

impl ReplayTransport {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            open_error: None,
            opens: 0,
        }
    }

    pub fn from_str_chunks(chunks: &[&str]) -> Self {
        Self::new(chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    /// Transport whose every open fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            chunks: Vec::new(),
            open_error: Some(message.to_string()),
            opens: 0,
        }
    }

    /// Replay a captured body, split into `chunk_bytes`-sized reads.
    pub fn from_bytes(bytes: &[u8], chunk_bytes: usize) -> Self {
        Self::new(bytes.chunks(chunk_bytes.max(1)).map(<[u8]>::to_vec).collect())
    }

    pub fn opens(&self) -> usize {
        self.opens
    }
}

impl StreamTransport for ReplayTransport {
    fn open(&mut self, _request: &StreamRequest) -> Result<Box<dyn Read + Send>> {
        self.opens += 1;
        if let Some(message) = &self.open_error {
            return Err(anyhow!("{}", message));
        }
        Ok(Box::new(ChunkedReader {
            chunks: self.chunks.clone().into_iter().collect(),
            current: Vec::new(),
        }))
    }
}

/// Reader that never returns more than one chunk per `read` call.
struct ChunkedReader {
    chunks: std::collections::VecDeque<Vec<u8>>,
    current: Vec<u8>,
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.current.is_empty() {
            match self.chunks.pop_front() {
                Some(next) => self.current = next,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.drain(..n);
        Ok(n)
    }
}
