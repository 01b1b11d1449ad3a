//! In-process transport: hands encoded requests straight to a server
//! adapter, with the same headers and status handling as HTTP.

use crate::codec::Codec;
use crate::config::{ContentNegotiation, SoapVersion};
use crate::error::{Result, SoapError};
use crate::packet::Packet;
use crate::pipe::{NextAction, Tube, TubeCloner};
use crate::server::{HttpAdapter, HttpExchange};
use crate::transport::{
    check_response_status, header_value, is_empty_response, request_headers, ACCEPT, CONTENT_TYPE,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

const FAST_INFOSET: &str = "fastinfoset";

/// Verify that Fast Infoset negotiation produced what the request asked
/// for.
pub fn check_fi_conneg_integrity(
    negotiation: ContentNegotiation,
    request_content_type: &str,
    request_accept: Option<&str>,
    response_content_type: &str,
) -> Result<()> {
    let request_ct = request_content_type.to_ascii_lowercase();
    let accept = request_accept.unwrap_or_default().to_ascii_lowercase();
    let response_fi = response_content_type
        .to_ascii_lowercase()
        .contains(FAST_INFOSET);

    let problem = if request_ct.contains(FAST_INFOSET) {
        if !response_fi {
            Some(format!(
                "Request is encoded using Fast Infoset but response ({}) is not",
                response_content_type
            ))
        } else if negotiation == ContentNegotiation::None {
            Some("Request is encoded but Fast Infoset content negotiation is set to none".to_string())
        } else {
            None
        }
    } else if accept.contains(FAST_INFOSET) {
        if !response_fi {
            Some("Fast Infoset is acceptable but response is not encoded in Fast Infoset".to_string())
        } else if negotiation == ContentNegotiation::None {
            Some(
                "Fast Infoset is acceptable but Fast Infoset content negotiation is set to none"
                    .to_string(),
            )
        } else {
            None
        }
    } else {
        match negotiation {
            ContentNegotiation::Pessimistic => Some(
                "Content negotiation is set to pessimistic but Fast Infoset is not acceptable"
                    .to_string(),
            ),
            ContentNegotiation::Optimistic => Some(format!(
                "Content negotiation is set to optimistic but the request ({}) is not encoded using Fast Infoset",
                request_content_type
            )),
            ContentNegotiation::None => None,
        }
    };

    match problem {
        Some(message) => Err(SoapError::ContentNegotiation(message)),
        None => Ok(()),
    }
}

/// Terminal client tube bound to an in-process [`HttpAdapter`].
pub struct LocalTransportTube {
    codec: Box<dyn Codec>,
    version: Option<SoapVersion>,
    negotiation: ContentNegotiation,
    adapter: Arc<HttpAdapter>,
}

impl LocalTransportTube {
    pub fn new(
        codec: Box<dyn Codec>,
        version: Option<SoapVersion>,
        negotiation: ContentNegotiation,
        adapter: Arc<HttpAdapter>,
    ) -> Self {
        Self {
            codec,
            version,
            negotiation,
            adapter,
        }
    }

    async fn exchange(&self, mut packet: Packet) -> Result<Packet> {
        let mut body = Vec::new();
        let content_type = self.codec.encode(&mut packet, &mut body)?;
        let headers = request_headers(&packet, self.version, &content_type);
        let accept = header_value(&headers, ACCEPT).map(String::from);

        let mut exchange = HttpExchange::new(headers, Bytes::from(body));
        self.adapter.handle(&mut exchange).await;
        debug!(
            endpoint = %self.adapter.name(),
            status = exchange.status,
            bytes = exchange.response_body.len(),
            "Local exchange completed"
        );

        let response_type = exchange.response_header(CONTENT_TYPE).map(String::from);
        let empty = is_empty_response(exchange.status, &exchange.response_body);
        let reason = match exchange.status {
            202 => "Accepted",
            415 => "Unsupported Media Type",
            _ => "",
        };
        check_response_status(
            self.version,
            exchange.status,
            reason,
            response_type.as_deref(),
            !empty,
        )?;

        if empty {
            return Ok(packet.create_client_response(None));
        }

        let response_type = response_type.unwrap_or_default();
        check_fi_conneg_integrity(
            self.negotiation,
            &content_type.content_type,
            accept.as_deref(),
            &response_type,
        )?;

        let mut reply = packet.create_client_response(None);
        self.codec
            .decode(exchange.response_body, Some(&response_type), &mut reply)?;
        Ok(reply)
    }
}

#[async_trait]
impl Tube for LocalTransportTube {
    fn name(&self) -> &str {
        "local-transport"
    }

    async fn process_request(&mut self, packet: Packet) -> NextAction {
        match self.exchange(packet).await {
            Ok(reply) => NextAction::Return(reply),
            Err(e) => NextAction::Throw(e),
        }
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(Self {
            codec: self.codec.copy(),
            version: self.version,
            negotiation: self.negotiation,
            adapter: self.adapter.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conneg_none_plain_xml_passes() {
        assert!(check_fi_conneg_integrity(
            ContentNegotiation::None,
            "text/xml; charset=utf-8",
            Some("text/xml, multipart/related"),
            "text/xml; charset=utf-8",
        )
        .is_ok());
    }

    #[test]
    fn test_conneg_fi_request_needs_fi_response() {
        let err = check_fi_conneg_integrity(
            ContentNegotiation::Optimistic,
            "application/fastinfoset",
            None,
            "text/xml",
        )
        .unwrap_err();
        assert!(err.to_string().contains("response (text/xml) is not"));

        assert!(check_fi_conneg_integrity(
            ContentNegotiation::Optimistic,
            "application/fastinfoset",
            None,
            "application/fastinfoset",
        )
        .is_ok());
    }

    #[test]
    fn test_conneg_mode_mismatches() {
        let accept = Some("application/fastinfoset, text/xml");
        assert!(matches!(
            check_fi_conneg_integrity(ContentNegotiation::Pessimistic, "text/xml", accept, "text/xml"),
            Err(SoapError::ContentNegotiation(_))
        ));
        assert!(check_fi_conneg_integrity(
            ContentNegotiation::Pessimistic,
            "text/xml",
            None,
            "text/xml"
        )
        .is_err());
        assert!(check_fi_conneg_integrity(
            ContentNegotiation::None,
            "text/xml",
            accept,
            "application/fastinfoset"
        )
        .is_err());
    }
}
