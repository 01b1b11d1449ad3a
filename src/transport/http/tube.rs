//! The terminal tube of a client pipeline over HTTP.

use super::client::{gzip, HttpClient, HttpRequest, RequestBody};
use super::cookie::CookieJar;
use super::HttpResponseProperties;
use crate::codec::{Codec, ContentType};
use crate::config::{HttpConfig, SoapVersion};
use crate::error::{Result, SoapError};
use crate::packet::{keys, Packet};
use crate::pipe::{NextAction, Tube, TubeCloner};
use crate::transport::{
    check_response_status, header_value, header_values, is_empty_response, request_headers,
    set_header, HeaderMap, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, SET_COOKIE,
    SET_COOKIE2, USER_AGENT,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Encodes the request, posts it and decodes the response.
pub struct HttpTransportTube {
    codec: Box<dyn Codec>,
    version: Option<SoapVersion>,
    client: Arc<dyn HttpClient>,
    config: Arc<HttpConfig>,
    cookies: Arc<CookieJar>,
    /// Used when the packet names no endpoint
    address: String,
}

impl HttpTransportTube {
    pub fn new(
        codec: Box<dyn Codec>,
        version: Option<SoapVersion>,
        client: Arc<dyn HttpClient>,
        config: Arc<HttpConfig>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            version,
            client,
            config,
            cookies: Arc::new(CookieJar::new()),
            address: address.into(),
        }
    }

    /// Share a cookie jar, e.g. between the copies of one client's line.
    pub fn with_cookie_jar(mut self, cookies: Arc<CookieJar>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn cookie_jar(&self) -> &Arc<CookieJar> {
        &self.cookies
    }

    fn timeout(packet: &Packet, key: &str, default_ms: u64) -> Option<Duration> {
        let ms = packet
            .property_int(key)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default_ms);
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    /// Encode the request body. With streaming enabled and a content type
    /// known before encoding, the body is produced on a blocking thread
    /// while it is sent; the packet comes back through the returned handle.
    fn encode(&self, packet: &mut Packet) -> Result<(HeaderMap, RequestBody, Option<Encoder>)> {
        let static_type = if self.config.streaming {
            self.codec.static_content_type(packet).ok()
        } else {
            None
        };

        if let Some(content_type) = static_type {
            let mut headers = self.headers(packet, &content_type);
            if !wants_gzip(&headers, &self.config) {
                headers.retain(|k, _| !k.eq_ignore_ascii_case(CONTENT_LENGTH));
                let (mut writer, body) = RequestBody::channel();
                let codec = self.codec.copy();
                let mut outgoing = std::mem::replace(packet, Packet::new(None));
                let encoder = tokio::task::spawn_blocking(move || {
                    let result = codec
                        .encode_to(&mut outgoing, &mut writer)
                        .and_then(|_| writer.flush().map_err(SoapError::from));
                    (outgoing, result)
                });
                return Ok((headers, body, Some(encoder)));
            }
        }

        let mut buf = Vec::new();
        let content_type = self.codec.encode(packet, &mut buf)?;
        let mut headers = self.headers(packet, &content_type);
        let body = if wants_gzip(&headers, &self.config) {
            set_header(&mut headers, CONTENT_ENCODING, "gzip");
            Bytes::from(gzip(&buf)?)
        } else {
            Bytes::from(buf)
        };
        Ok((headers, RequestBody::Buffered(body), None))
    }

    fn headers(&self, packet: &Packet, content_type: &ContentType) -> HeaderMap {
        let mut headers = request_headers(packet, self.version, content_type);
        if header_value(&headers, USER_AGENT).is_none() {
            set_header(&mut headers, USER_AGENT, self.config.user_agent.clone());
        }
        headers
    }

    async fn exchange(&self, mut packet: Packet) -> Result<Packet> {
        let url = packet
            .endpoint_address
            .clone()
            .unwrap_or_else(|| self.address.clone());
        let maintain = packet
            .property_bool(keys::SESSION_MAINTAIN)
            .unwrap_or(self.config.session_maintain);
        let connect_timeout =
            Self::timeout(&packet, keys::CONNECT_TIMEOUT, self.config.connect_timeout_ms);
        let request_timeout =
            Self::timeout(&packet, keys::REQUEST_TIMEOUT, self.config.request_timeout_ms);

        let (mut headers, body, encoder) = self.encode(&mut packet)?;

        if maintain {
            let explicit = header_value(&headers, COOKIE).map(String::from);
            if let Some(cookie) = self.cookies.cookie_header(&url, explicit.as_deref()) {
                set_header(&mut headers, COOKIE, cookie);
            }
        }

        debug!(
            endpoint = %url,
            content_type = ?header_value(&headers, CONTENT_TYPE),
            bytes = ?body.len(),
            streamed = body.is_streamed(),
            "Sending HTTP request"
        );
        let sent = self
            .client
            .send(HttpRequest {
                url: url.clone(),
                headers,
                body,
                connect_timeout,
                request_timeout,
            })
            .await;

        if let Some(encoder) = encoder {
            let (outgoing, encoded) = encoder
                .await
                .map_err(|e| SoapError::Pipeline(format!("request encoder failed: {}", e)))?;
            packet = outgoing;
            // A failed send drops the body channel, so its error wins.
            if let (Ok(_), Err(e)) = (&sent, encoded) {
                warn!(endpoint = %url, error = %e, "Streaming request body failed");
                return Err(e);
            }
        }
        let response = sent?;

        if maintain {
            let mut set_cookies = header_values(&response.headers, SET_COOKIE);
            set_cookies.extend(header_values(&response.headers, SET_COOKIE2));
            self.cookies.record(&url, set_cookies);
        }

        let response_type = response.header(CONTENT_TYPE).map(String::from);
        let empty = is_empty_response(response.status, &response.body);
        if let Err(e) = check_response_status(
            self.version,
            response.status,
            &response.reason,
            response_type.as_deref(),
            !empty,
        ) {
            warn!(endpoint = %url, status = response.status, error = %e, "HTTP response rejected");
            return Err(e);
        }

        let mut reply = packet.create_client_response(None);
        reply.add_satellite(HttpResponseProperties {
            status: response.status,
            reason: response.reason.clone(),
            headers: response.headers.clone(),
        });
        if empty || !packet.expects_reply() {
            debug!(endpoint = %url, status = response.status, "No response message");
            return Ok(reply);
        }
        self.codec
            .decode(response.body, response_type.as_deref(), &mut reply)?;
        Ok(reply)
    }
}

/// Encoder task of a streamed request: hands the packet back with the
/// outcome.
type Encoder = JoinHandle<(Packet, Result<()>)>;

/// The body is compressed when configured or when the caller asked for it.
fn wants_gzip(headers: &HeaderMap, config: &HttpConfig) -> bool {
    config.gzip_requests
        || header_value(headers, CONTENT_ENCODING).is_some_and(|e| e.eq_ignore_ascii_case("gzip"))
}

#[async_trait]
impl Tube for HttpTransportTube {
    fn name(&self) -> &str {
        "http-transport"
    }

    async fn process_request(&mut self, packet: Packet) -> NextAction {
        match self.exchange(packet).await {
            Ok(reply) => NextAction::Return(reply),
            Err(e) => NextAction::Throw(e),
        }
    }

    async fn process_response(&mut self, packet: Packet) -> NextAction {
        NextAction::Return(packet)
    }

    async fn process_exception(&mut self, error: SoapError) -> NextAction {
        NextAction::Throw(error)
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(Self {
            codec: self.codec.copy(),
            version: self.version,
            client: self.client.clone(),
            config: self.config.clone(),
            cookies: self.cookies.clone(),
            address: self.address.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SoapCodec;
    use crate::message::{DomMessage, Message};
    use crate::transport::http::HttpResponse;
    use crate::transport::HeaderMap;
    use crate::xml::XmlWriterFactory;
    use parking_lot::Mutex;

    /// Answers every request with the same canned response.
    struct Canned {
        status: u16,
        content_type: &'static str,
        body: &'static str,
        set_cookie: Option<&'static str>,
        seen: Mutex<Vec<Sent>>,
    }

    /// A request as it reached the wire.
    struct Sent {
        url: String,
        headers: HeaderMap,
        body: Bytes,
        streamed: bool,
    }

    impl Canned {
        fn new(status: u16, content_type: &'static str, body: &'static str) -> Arc<Self> {
            Self::with_cookie(status, content_type, body, None)
        }

        fn with_cookie(
            status: u16,
            content_type: &'static str,
            body: &'static str,
            set_cookie: Option<&'static str>,
        ) -> Arc<Self> {
            Arc::new(Self {
                status,
                content_type,
                body,
                set_cookie,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for Canned {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            let streamed = request.body.is_streamed();
            let body = request.body.collect().await;
            self.seen.lock().push(Sent {
                url: request.url,
                headers: request.headers,
                body,
                streamed,
            });
            let mut headers = HeaderMap::new();
            headers.insert("Content-Type".to_string(), vec![self.content_type.to_string()]);
            if let Some(c) = self.set_cookie {
                headers.insert("Set-Cookie".to_string(), vec![c.to_string()]);
            }
            Ok(HttpResponse {
                status: self.status,
                reason: "canned".to_string(),
                headers,
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    const RESPONSE: &str = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><r:pong xmlns:r="urn:r"/></S:Body></S:Envelope>"#;

    fn tube(client: Arc<dyn HttpClient>, config: HttpConfig) -> HttpTransportTube {
        let codec = SoapCodec::new(SoapVersion::Soap11, Arc::new(XmlWriterFactory::default()));
        HttpTransportTube::new(
            Box::new(codec),
            Some(SoapVersion::Soap11),
            client,
            Arc::new(config),
            "http://localhost:9/soap",
        )
    }

    fn request() -> Packet {
        let msg = DomMessage::from_xml(Some(SoapVersion::Soap11), b"<m:ping xmlns:m=\"urn:m\"/>")
            .unwrap();
        let mut p = Packet::new(Some(Box::new(msg)));
        p.soap_action = Some("urn:ping".to_string());
        p
    }

    #[tokio::test]
    async fn test_request_headers_and_response() {
        let client = Canned::new(200, "text/xml; charset=utf-8", RESPONSE);
        let mut tube = tube(client.clone(), HttpConfig::default());
        let reply = match tube.process_request(request()).await {
            NextAction::Return(p) => p,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(reply.message().unwrap().payload_local_part(), Some("pong"));
        assert_eq!(reply.satellite::<HttpResponseProperties>().unwrap().status, 200);

        let seen = client.seen.lock();
        let sent = &seen[0];
        assert_eq!(sent.url, "http://localhost:9/soap");
        assert_eq!(header_value(&sent.headers, "SOAPAction"), Some("\"urn:ping\""));
        assert_eq!(
            header_value(&sent.headers, "User-Agent"),
            Some(HttpConfig::default().user_agent.as_str())
        );
    }

    #[tokio::test]
    async fn test_status_gate_applies() {
        let client = Canned::new(500, "text/xml", "");
        let mut tube = tube(client, HttpConfig::default());
        match tube.process_request(request()).await {
            NextAction::Throw(SoapError::Transport { status, .. }) => assert_eq!(status, 500),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gzip_and_cookies() {
        let client = Canned::with_cookie(202, "text/xml", "", Some("JSESSIONID=s1; Path=/"));
        let config = HttpConfig {
            gzip_requests: true,
            session_maintain: true,
            ..Default::default()
        };
        let mut tube = tube(client.clone(), config);
        for _ in 0..2 {
            match tube.process_request(request()).await {
                NextAction::Return(reply) => assert!(!reply.has_message()),
                other => panic!("unexpected {other:?}"),
            }
        }
        let seen = client.seen.lock();
        assert_eq!(header_value(&seen[0].headers, "Content-Encoding"), Some("gzip"));
        assert_eq!(header_value(&seen[0].headers, "Cookie"), None);
        assert_eq!(header_value(&seen[1].headers, "Cookie"), Some("JSESSIONID=s1"));
    }

    #[tokio::test]
    async fn test_buffered_by_default() {
        let client = Canned::new(200, "text/xml", RESPONSE);
        let mut tube = tube(client.clone(), HttpConfig::default());
        assert!(matches!(tube.process_request(request()).await, NextAction::Return(_)));

        let seen = client.seen.lock();
        assert!(!seen[0].streamed);
        assert!(String::from_utf8_lossy(&seen[0].body).contains("ping"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_streaming_sends_chunked_body() {
        let client = Canned::new(200, "text/xml", RESPONSE);
        let config = HttpConfig {
            streaming: true,
            ..Default::default()
        };
        let mut tube = tube(client.clone(), config);
        let reply = match tube.process_request(request()).await {
            NextAction::Return(p) => p,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(reply.message().unwrap().payload_local_part(), Some("pong"));

        let seen = client.seen.lock();
        let sent = &seen[0];
        assert!(sent.streamed);
        assert_eq!(header_value(&sent.headers, "Content-Length"), None);
        assert!(header_value(&sent.headers, "Content-Type")
            .is_some_and(|ct| ct.starts_with("text/xml")));
        assert!(String::from_utf8_lossy(&sent.body).contains("ping"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_streaming_falls_back_to_buffer_for_gzip() {
        let client = Canned::new(202, "text/xml", "");
        let config = HttpConfig {
            streaming: true,
            gzip_requests: true,
            ..Default::default()
        };
        let mut tube = tube(client.clone(), config);
        assert!(matches!(tube.process_request(request()).await, NextAction::Return(_)));

        let seen = client.seen.lock();
        assert!(!seen[0].streamed);
        assert_eq!(header_value(&seen[0].headers, "Content-Encoding"), Some("gzip"));
    }
}
