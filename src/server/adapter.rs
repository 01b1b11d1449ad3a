//! Runs server tubelines for HTTP exchanges.

use crate::codec::{binding_codec, Codec, MediaType};
use crate::config::{RuntimeConfig, SoapVersion};
use crate::error::{Result, SoapError};
use crate::message::{FaultMessage, Message, SoapFault};
use crate::packet::{keys, Packet, TransportBackChannel};
use crate::parser::parse_soap_action;
use crate::pipe::{Fiber, Tubeline, TubelinePool};
use crate::property::PropertyValue;
use crate::transport::{header_value, set_header, HeaderMap, ACCEPT, CONTENT_TYPE, SOAP_ACTION};
use crate::xml::XmlWriterFactory;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Idle tubeline copies kept per adapter.
const POOL_CAPACITY: usize = 32;

/// One HTTP request and the response written for it, independent of the
/// server library carrying it.
#[derive(Debug, Clone, Default)]
pub struct HttpExchange {
    pub request_headers: HeaderMap,
    pub request_body: Bytes,
    pub status: u16,
    pub response_headers: HeaderMap,
    pub response_body: Bytes,
}

impl HttpExchange {
    pub fn new(request_headers: HeaderMap, request_body: impl Into<Bytes>) -> Self {
        Self {
            request_headers,
            request_body: request_body.into(),
            status: 200,
            ..Default::default()
        }
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        header_value(&self.request_headers, name)
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        header_value(&self.response_headers, name)
    }
}

/// Back channel of an exchange. Closing it accepts the request without a
/// response: the adapter answers 202 at once and the fiber finishes on its
/// own task.
#[derive(Debug, Default)]
struct ExchangeBackChannel {
    closed: AtomicBool,
    notify: Notify,
}

impl ExchangeBackChannel {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn closed(&self) {
        if !self.is_closed() {
            self.notify.notified().await;
        }
    }
}

impl TransportBackChannel for ExchangeBackChannel {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // notify_one keeps a permit when nobody waits yet.
            self.notify.notify_one();
        }
    }
}

/// Processed/faulted counters of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterMetrics {
    pub requests_processed: u64,
    pub requests_faulted: u64,
}

/// Decodes HTTP requests into server packets, runs them through a pooled
/// server tubeline and encodes the response with the matching status.
pub struct HttpAdapter {
    name: String,
    version: Option<SoapVersion>,
    codec: Box<dyn Codec>,
    pool: Arc<TubelinePool>,
    max_body_size: usize,
    requests_processed: AtomicU64,
    requests_faulted: AtomicU64,
}

impl HttpAdapter {
    /// Adapter over a server tubeline assembled for `config`.
    pub fn new(
        config: &RuntimeConfig,
        line: Tubeline,
        writers: Arc<XmlWriterFactory>,
    ) -> Result<Self> {
        Ok(Self {
            name: config.server.endpoint_name.clone(),
            version: config.binding.soap_version,
            codec: binding_codec(&config.binding, writers)?,
            pool: TubelinePool::new(line, POOL_CAPACITY),
            max_body_size: config.server.max_body_size,
            requests_processed: AtomicU64::new(0),
            requests_faulted: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<SoapVersion> {
        self.version
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn metrics(&self) -> AdapterMetrics {
        AdapterMetrics {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_faulted: self.requests_faulted.load(Ordering::Relaxed),
        }
    }

    /// Process one exchange: fills in the response status, headers and body.
    pub async fn handle(&self, exchange: &mut HttpExchange) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        let codec = self.codec.copy();
        let content_type = exchange.request_header(CONTENT_TYPE).map(String::from);

        debug!(
            endpoint = %self.name,
            content_type = ?content_type,
            bytes = exchange.request_body.len(),
            "Processing SOAP request"
        );

        if exchange.request_body.len() > self.max_body_size {
            let error = SoapError::InvalidEnvelope(format!(
                "Request body size {} exceeds maximum {}",
                exchange.request_body.len(),
                self.max_body_size
            ));
            self.write_error(codec.as_ref(), &Packet::new(None), error, exchange);
            return;
        }

        let back_channel = Arc::new(ExchangeBackChannel::default());
        let mut request = self.request_packet(exchange, content_type.as_deref(), back_channel.clone());
        if let Err(e) = codec.decode(
            exchange.request_body.clone(),
            content_type.as_deref(),
            &mut request,
        ) {
            self.write_error(codec.as_ref(), &request, e, exchange);
            return;
        }
        let template = match request.copy(false) {
            Ok(t) => t,
            Err(e) => {
                self.write_error(codec.as_ref(), &request, e, exchange);
                return;
            }
        };

        let mut fiber = Fiber::new(self.pool.take());
        let pool = self.pool.clone();
        let mut run = Box::pin(async move {
            let result = fiber.run(request).await;
            if result.is_ok() {
                pool.recycle(fiber.into_line());
            }
            result
        });

        let result = tokio::select! {
            biased;
            result = &mut run => result,
            _ = back_channel.closed() => {
                let endpoint = self.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = run.await {
                        warn!(endpoint = %endpoint, error = %e, "Request failed after its back channel closed");
                    }
                });
                debug!(endpoint = %self.name, "Back channel closed early, request accepted");
                exchange.status = 202;
                return;
            }
        };

        match result {
            Ok(_) if back_channel.is_closed() => {
                debug!(endpoint = %self.name, "Back channel closed, response discarded");
                exchange.status = 202;
            }
            Ok(response) if !response.has_message() => {
                back_channel.close();
                debug!(endpoint = %self.name, "One-way request accepted");
                exchange.status = 202;
            }
            Ok(response) => self.write_response(codec.as_ref(), response, exchange),
            Err(e) => self.write_error(codec.as_ref(), &template, e, exchange),
        }
    }

    fn request_packet(
        &self,
        exchange: &HttpExchange,
        content_type: Option<&str>,
        back_channel: Arc<ExchangeBackChannel>,
    ) -> Packet {
        let mut packet = Packet::new(None);
        packet.server_side = true;
        packet.back_channel = Some(back_channel);
        packet.accept = exchange.request_header(ACCEPT).map(String::from);
        packet.soap_action = match exchange.request_header(SOAP_ACTION) {
            Some(action) => Some(parse_soap_action(action)),
            None => content_type
                .and_then(|ct| MediaType::parse(ct).ok())
                .and_then(|m| m.param("action").map(String::from)),
        };
        packet.invocation_properties.insert(
            keys::REQUEST_HEADERS.to_string(),
            PropertyValue::Headers(exchange.request_headers.clone()),
        );
        packet
    }

    fn write_response(&self, codec: &dyn Codec, mut response: Packet, exchange: &mut HttpExchange) {
        let fault = response.message_mut().and_then(|m| fault_of(m));
        let status = match (&fault, self.version) {
            (None, _) => 200,
            (Some(f), Some(SoapVersion::Soap12)) if f.is_sender_fault() => 400,
            (Some(_), _) => 500,
        };
        if let Some(f) = &fault {
            self.requests_faulted.fetch_add(1, Ordering::Relaxed);
            info!(
                endpoint = %self.name,
                status = status,
                code = %f.code.local,
                reason = %f.reason,
                "Responding with SOAP fault"
            );
        }

        let mut body = Vec::new();
        match codec.encode(&mut response, &mut body) {
            Ok(ct) => {
                exchange.status = status;
                set_header(&mut exchange.response_headers, CONTENT_TYPE, ct.content_type);
                exchange.response_body = Bytes::from(body);
            }
            Err(e) => {
                warn!(endpoint = %self.name, error = %e, "Failed to encode response");
                exchange.status = 500;
                exchange.response_body = Bytes::new();
            }
        }
    }

    fn write_error(
        &self,
        codec: &dyn Codec,
        request: &Packet,
        error: SoapError,
        exchange: &mut HttpExchange,
    ) {
        warn!(
            endpoint = %self.name,
            kind = error.kind().as_str(),
            error = %error,
            "SOAP request failed"
        );

        if let SoapError::UnsupportedMedia { .. } = error {
            self.requests_faulted.fetch_add(1, Ordering::Relaxed);
            exchange.status = 415;
            exchange.response_body = Bytes::new();
            return;
        }

        let version = match self.version {
            Some(v) => v,
            None => {
                self.requests_faulted.fetch_add(1, Ordering::Relaxed);
                exchange.status = 500;
                set_header(&mut exchange.response_headers, CONTENT_TYPE, "text/plain; charset=utf-8");
                exchange.response_body = Bytes::from(error.to_string());
                return;
            }
        };
        let fault = fault_for_error(version, error);
        let response = request.create_server_response(Some(Box::new(FaultMessage::new(version, fault))));
        self.write_response(codec, response, exchange);
    }
}

impl std::fmt::Debug for HttpAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAdapter")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("pool", &self.pool)
            .field("metrics", &self.metrics())
            .finish()
    }
}

/// The fault a failed exchange is answered with.
pub fn fault_for_error(version: SoapVersion, error: SoapError) -> SoapFault {
    match error {
        SoapError::Fault(fault) => *fault,
        SoapError::VersionMismatch { .. } => SoapFault::version_mismatch(version),
        e @ (SoapError::UnsupportedCharset(_)
        | SoapError::XmlParse(_)
        | SoapError::InvalidEnvelope(_)
        | SoapError::Mime(_)) => SoapFault::sender(version, e.to_string()),
        e => SoapFault::receiver(version, e.to_string()),
    }
}

fn fault_of(message: &mut dyn Message) -> Option<SoapFault> {
    if !message.is_fault() {
        return None;
    }
    let mut copy = message.copy().ok()?;
    SoapFault::from_message(copy.as_mut()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::FnTube;

    const REQUEST_11: &str = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><m:ping xmlns:m="urn:m"/></S:Body></S:Envelope>"#;

    fn adapter(config: &RuntimeConfig, f: fn(Packet) -> Result<Packet>) -> HttpAdapter {
        let mut line = Tubeline::new();
        line.push(Box::new(FnTube::new("endpoint", f)));
        HttpAdapter::new(config, line, Arc::new(XmlWriterFactory::default())).unwrap()
    }

    fn exchange(content_type: &str, body: &'static str) -> HttpExchange {
        let mut headers = HeaderMap::new();
        headers.insert("content-type".to_string(), vec![content_type.to_string()]);
        headers.insert("SOAPAction".to_string(), vec!["\"urn:ping\"".to_string()]);
        HttpExchange::new(headers, body)
    }

    fn echo(mut p: Packet) -> Result<Packet> {
        let msg = p.take_message();
        Ok(p.create_server_response(msg))
    }

    #[tokio::test]
    async fn test_echo_is_200() {
        let adapter = adapter(&RuntimeConfig::default(), echo);
        let mut ex = exchange("text/xml; charset=utf-8", REQUEST_11);
        adapter.handle(&mut ex).await;
        assert_eq!(ex.status, 200);
        assert!(ex.response_header("content-type").unwrap().starts_with("text/xml"));
        assert!(String::from_utf8_lossy(&ex.response_body).contains("ping"));
        assert_eq!(adapter.metrics().requests_processed, 1);
        assert_eq!(adapter.metrics().requests_faulted, 0);
    }

    #[tokio::test]
    async fn test_soap_action_reaches_packet() {
        fn check(p: Packet) -> Result<Packet> {
            assert_eq!(p.soap_action.as_deref(), Some("urn:ping"));
            echo(p)
        }
        let adapter = adapter(&RuntimeConfig::default(), check);
        let mut ex = exchange("text/xml", REQUEST_11);
        adapter.handle(&mut ex).await;
        assert_eq!(ex.status, 200);
    }

    #[tokio::test]
    async fn test_one_way_is_202() {
        fn sink(p: Packet) -> Result<Packet> {
            Ok(p.create_server_response(None))
        }
        let adapter = adapter(&RuntimeConfig::default(), sink);
        let mut ex = exchange("text/xml", REQUEST_11);
        adapter.handle(&mut ex).await;
        assert_eq!(ex.status, 202);
        assert!(ex.response_body.is_empty());
    }

    /// Closes the back channel, then waits for the test to let it answer.
    struct EarlyAccept {
        release: Arc<Notify>,
        finished: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl crate::pipe::Tube for EarlyAccept {
        fn name(&self) -> &str {
            "early-accept"
        }

        async fn process_request(&mut self, mut packet: Packet) -> crate::pipe::NextAction {
            if let Some(channel) = &packet.back_channel {
                channel.close();
            }
            self.release.notified().await;
            self.finished.store(true, Ordering::SeqCst);
            let msg = packet.take_message();
            crate::pipe::NextAction::Return(packet.create_server_response(msg))
        }

        fn copy(&self, _cloner: &crate::pipe::TubeCloner) -> Box<dyn crate::pipe::Tube> {
            Box::new(EarlyAccept {
                release: self.release.clone(),
                finished: self.finished.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_early_close_answers_202_before_endpoint_finishes() {
        let release = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));
        let mut line = Tubeline::new();
        line.push(Box::new(EarlyAccept {
            release: release.clone(),
            finished: finished.clone(),
        }));
        let adapter = HttpAdapter::new(
            &RuntimeConfig::default(),
            line,
            Arc::new(XmlWriterFactory::default()),
        )
        .unwrap();

        let mut ex = exchange("text/xml", REQUEST_11);
        tokio::time::timeout(std::time::Duration::from_secs(5), adapter.handle(&mut ex))
            .await
            .expect("adapter waited for the endpoint");
        assert_eq!(ex.status, 202);
        assert!(ex.response_body.is_empty());
        assert!(!finished.load(Ordering::SeqCst));

        release.notify_one();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !finished.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("endpoint never finished");
    }

    #[tokio::test]
    async fn test_unsupported_media_is_415() {
        let adapter = adapter(&RuntimeConfig::default(), echo);
        let mut ex = exchange("application/json", "{}");
        adapter.handle(&mut ex).await;
        assert_eq!(ex.status, 415);
        assert_eq!(adapter.metrics().requests_faulted, 1);
    }

    #[tokio::test]
    async fn test_thrown_error_is_500_fault() {
        fn broken(_: Packet) -> Result<Packet> {
            Err(SoapError::Pipeline("boom".to_string()))
        }
        let adapter = adapter(&RuntimeConfig::default(), broken);
        let mut ex = exchange("text/xml", REQUEST_11);
        adapter.handle(&mut ex).await;
        assert_eq!(ex.status, 500);
        let body = String::from_utf8_lossy(&ex.response_body);
        assert!(body.contains("Fault"));
        assert!(body.contains("boom"));
    }

    #[tokio::test]
    async fn test_soap12_sender_fault_is_400() {
        let mut config = RuntimeConfig::default();
        config.binding.soap_version = Some(SoapVersion::Soap12);
        let adapter = adapter(&config, echo);
        let mut ex = exchange("application/soap+xml", "<not-closed>");
        adapter.handle(&mut ex).await;
        assert_eq!(ex.status, 400);
        assert!(ex
            .response_header("Content-Type")
            .unwrap()
            .starts_with("application/soap+xml"));
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let mut config = RuntimeConfig::default();
        config.server.max_body_size = 16;
        let adapter = adapter(&config, echo);
        let mut ex = exchange("text/xml", REQUEST_11);
        adapter.handle(&mut ex).await;
        assert_eq!(ex.status, 500);
        assert!(String::from_utf8_lossy(&ex.response_body).contains("exceeds maximum"));
    }
}
