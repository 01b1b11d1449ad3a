//! Byte-level HTTP exchange used by the HTTP transport tube.

use crate::config::HttpConfig;
use crate::error::{Result, SoapError};
use crate::transport::{header_value, HeaderMap, CONTENT_ENCODING};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

/// Chunks buffered between the encoder and the connection.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Size of one streamed body chunk.
const BODY_CHUNK_SIZE: usize = 8 * 1024;

/// Request entity: fully encoded, or produced while it is being sent.
#[derive(Debug)]
pub enum RequestBody {
    /// Sent with a Content-Length
    Buffered(Bytes),
    /// Sent chunked; ends when the encoder drops its [`BodyWriter`]
    Streamed(mpsc::Receiver<Bytes>),
}

impl RequestBody {
    /// A streamed body and the writer that feeds it.
    pub fn channel() -> (BodyWriter, Self) {
        let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        (
            BodyWriter {
                tx,
                buf: Vec::with_capacity(BODY_CHUNK_SIZE),
            },
            Self::Streamed(rx),
        )
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, Self::Streamed(_))
    }

    /// Length, when known up front.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Buffered(b) => Some(b.len()),
            Self::Streamed(_) => None,
        }
    }

    /// Drain the whole body.
    pub async fn collect(self) -> Bytes {
        match self {
            Self::Buffered(b) => b,
            Self::Streamed(mut rx) => {
                let mut out = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    out.extend_from_slice(&chunk);
                }
                Bytes::from(out)
            }
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        Self::Buffered(b)
    }
}

/// Blocking writer half of a streamed body. Must not be used on an async
/// worker thread.
#[derive(Debug)]
pub struct BodyWriter {
    tx: mpsc::Sender<Bytes>,
    buf: Vec<u8>,
}

impl BodyWriter {
    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(BODY_CHUNK_SIZE),
        ));
        self.tx
            .blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "request body receiver dropped"))
    }
}

impl Write for BodyWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= BODY_CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// One outbound HTTP POST.
#[derive(Debug)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub connect_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

/// What came back. The body is already inflated when it was gzip-encoded.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Sends requests over the network. Implemented by [`ReqwestClient`]; tests
/// script their own.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// gzip-compress a request body.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip body.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Inflate `body` when `headers` declare `Content-Encoding: gzip`.
pub fn decode_body(headers: &HeaderMap, body: Bytes) -> Result<Bytes> {
    match header_value(headers, CONTENT_ENCODING) {
        Some(enc) if enc.trim().eq_ignore_ascii_case("gzip") => Ok(Bytes::from(gunzip(&body)?)),
        _ => Ok(body),
    }
}

/// [`HttpClient`] over reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl ReqwestClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        Ok(Self {
            client: Self::build(connect_timeout)?,
            connect_timeout,
        })
    }

    fn build(connect_timeout: Duration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| SoapError::Config(format!("HTTP client: {}", e)))
    }
}

fn map_error(url: &str, e: reqwest::Error) -> SoapError {
    if e.is_timeout() {
        SoapError::Connection(format!("{}: timed out", url))
    } else {
        SoapError::Connection(format!("{}: {}", url, e))
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        // A per-call connect timeout needs its own connection pool.
        let client = match request.connect_timeout {
            Some(t) if t != self.connect_timeout => Self::build(t)?,
            _ => self.client.clone(),
        };

        let mut builder = client.post(&request.url);
        for (name, values) in &request.headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(timeout) = request.request_timeout {
            builder = builder.timeout(timeout);
        }

        let body = match request.body {
            RequestBody::Buffered(bytes) => reqwest::Body::from(bytes),
            RequestBody::Streamed(rx) => reqwest::Body::wrap_stream(
                ReceiverStream::new(rx).map(Ok::<Bytes, io::Error>),
            ),
        };
        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|e| map_error(&request.url, e))?;

        let status = response.status();
        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(v.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| map_error(&request.url, e))?;
        debug!(
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "HTTP response received"
        );
        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body: decode_body(&headers, body)?,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip() {
        let data = b"<S:Envelope/>".repeat(20);
        let packed = gzip(&data).unwrap();
        assert_ne!(packed, data);
        assert_eq!(gunzip(&packed).unwrap(), data);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_streamed_body_is_reassembled() {
        let (mut writer, body) = RequestBody::channel();
        assert!(body.is_streamed());
        assert_eq!(body.len(), None);
        let data: Vec<u8> = (0..BODY_CHUNK_SIZE * 3 + 5).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();
        let encoder = tokio::task::spawn_blocking(move || {
            writer.write_all(&data)?;
            writer.flush()
        });
        assert_eq!(body.collect().await.as_ref(), expected.as_slice());
        encoder.await.unwrap().unwrap();
    }

    #[test]
    fn test_decode_body_honors_encoding() {
        let mut headers = HeaderMap::new();
        let plain = Bytes::from_static(b"<x/>");
        assert_eq!(decode_body(&headers, plain.clone()).unwrap(), plain);

        headers.insert("content-encoding".to_string(), vec!["gzip".to_string()]);
        let packed = Bytes::from(gzip(b"<x/>").unwrap());
        assert_eq!(decode_body(&headers, packed).unwrap(), plain);
        assert!(decode_body(&headers, Bytes::from_static(b"not gzip")).is_err());
    }
}
