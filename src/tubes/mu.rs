//! mustUnderstand processing for both ends of an exchange.

use crate::config::SoapVersion;
use crate::message::{FaultMessage, SoapFault};
use crate::packet::Packet;
use crate::pipe::{NextAction, Tube, TubeCloner};
use crate::xml::QName;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Headers and roles an endpoint takes responsibility for.
#[derive(Debug, Clone)]
pub struct UnderstoodHeaders {
    version: SoapVersion,
    roles: Arc<Vec<String>>,
    known: Arc<Vec<QName>>,
}

impl UnderstoodHeaders {
    /// `roles` are added to the roles every node of `version` plays.
    pub fn new(version: SoapVersion, roles: &[String], known: Vec<QName>) -> Self {
        let mut all: Vec<String> = version
            .implicit_roles()
            .iter()
            .map(|r| r.to_string())
            .collect();
        for role in roles {
            if !all.contains(role) {
                all.push(role.clone());
            }
        }
        Self {
            version,
            roles: Arc::new(all),
            known: Arc::new(known),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// mustUnderstand headers of the packet's message nobody understood.
    pub fn check(&self, packet: &Packet) -> Vec<QName> {
        match packet.message() {
            Some(m) => m
                .headers()
                .not_understood(self.version, &self.roles, &self.known),
            None => Vec::new(),
        }
    }
}

/// Answers requests carrying unknown mustUnderstand headers with a
/// MustUnderstand fault instead of passing them to the endpoint.
#[derive(Debug, Clone)]
pub struct ServerMUTube {
    understood: UnderstoodHeaders,
}

impl ServerMUTube {
    pub fn new(understood: UnderstoodHeaders) -> Self {
        Self { understood }
    }
}

#[async_trait]
impl Tube for ServerMUTube {
    fn name(&self) -> &str {
        "server-mu"
    }

    async fn process_request(&mut self, packet: Packet) -> NextAction {
        let not_understood = self.understood.check(&packet);
        if not_understood.is_empty() {
            return NextAction::Invoke(packet);
        }
        warn!(
            headers = ?not_understood.iter().map(|q| q.to_string()).collect::<Vec<_>>(),
            "Request carries mustUnderstand headers that are not understood"
        );
        match FaultMessage::must_understand(self.understood.version, &not_understood) {
            Ok(fault) => NextAction::Return(packet.create_server_response(Some(Box::new(fault)))),
            Err(e) => NextAction::Throw(e),
        }
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(self.clone())
    }
}

/// Rejects responses carrying unknown mustUnderstand headers.
#[derive(Debug, Clone)]
pub struct ClientMUTube {
    understood: UnderstoodHeaders,
}

impl ClientMUTube {
    pub fn new(understood: UnderstoodHeaders) -> Self {
        Self { understood }
    }
}

#[async_trait]
impl Tube for ClientMUTube {
    fn name(&self) -> &str {
        "client-mu"
    }

    async fn process_request(&mut self, packet: Packet) -> NextAction {
        NextAction::Invoke(packet)
    }

    async fn process_response(&mut self, packet: Packet) -> NextAction {
        let not_understood = self.understood.check(&packet);
        if not_understood.is_empty() {
            return NextAction::Return(packet);
        }
        let names: Vec<String> = not_understood.iter().map(|q| q.to_string()).collect();
        warn!(headers = ?names, "Response carries mustUnderstand headers that are not understood");
        let version = self.understood.version;
        let fault = SoapFault::new(
            QName::new(version.ns_uri(), "MustUnderstand"),
            format!("MustUnderstand headers [{}] are not understood", names.join(", ")),
        );
        NextAction::Throw(fault.into_error())
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DomMessage, Header, Message};
    use crate::pipe::{Fiber, FnTube, Tubeline};
    use crate::SoapError;

    fn request(version: SoapVersion, role: Option<&str>) -> Packet {
        let mut msg = DomMessage::from_xml(Some(version), b"<m:op xmlns:m=\"urn:m\"/>").unwrap();
        let header = match role {
            Some(r) => Header::from_xml(format!(
                "<t:Tx xmlns:t=\"urn:tx\" xmlns:S=\"{ns}\" S:mustUnderstand=\"1\" S:{attr}=\"{r}\">1</t:Tx>",
                ns = version.ns_uri(),
                attr = version.role_attribute(),
            ))
            .unwrap(),
            None => Header::must_understand_text(version, "urn:tx", "t", "Tx", "1").unwrap(),
        };
        msg.headers_mut().add(header);
        let mut packet = Packet::new(Some(Box::new(msg)));
        packet.server_side = true;
        packet
    }

    fn server_line(understood: UnderstoodHeaders) -> Tubeline {
        let mut line = Tubeline::new();
        line.push(Box::new(ServerMUTube::new(understood)));
        line.push(Box::new(FnTube::new("endpoint", |p: Packet| {
            Ok(p.create_server_response(None))
        })));
        line
    }

    #[tokio::test]
    async fn test_unknown_header_faults() {
        for version in [SoapVersion::Soap11, SoapVersion::Soap12] {
            let understood = UnderstoodHeaders::new(version, &[], Vec::new());
            let mut fiber = Fiber::new(server_line(understood));
            let response = fiber.run(request(version, None)).await.unwrap();
            let msg = response.message().unwrap();
            assert!(msg.is_fault());
            assert_eq!(
                msg.headers().len(),
                usize::from(version == SoapVersion::Soap12)
            );
        }
    }

    #[tokio::test]
    async fn test_known_header_passes() {
        let understood = UnderstoodHeaders::new(
            SoapVersion::Soap11,
            &[],
            vec![QName::new("urn:tx", "Tx")],
        );
        let mut fiber = Fiber::new(server_line(understood));
        let response = fiber.run(request(SoapVersion::Soap11, None)).await.unwrap();
        assert!(!response.has_message());
    }

    #[tokio::test]
    async fn test_header_for_other_role_is_ignored() {
        let understood = UnderstoodHeaders::new(SoapVersion::Soap12, &[], Vec::new());
        let mut fiber = Fiber::new(server_line(understood));
        let response = fiber
            .run(request(SoapVersion::Soap12, Some("urn:some-other-node")))
            .await
            .unwrap();
        assert!(!response.has_message());
    }

    #[tokio::test]
    async fn test_client_rejects_response() {
        let understood = UnderstoodHeaders::new(SoapVersion::Soap11, &[], Vec::new());
        let mut line = Tubeline::new();
        line.push(Box::new(ClientMUTube::new(understood)));
        line.push(Box::new(FnTube::new("transport", |_| {
            Ok(request(SoapVersion::Soap11, None))
        })));
        let mut fiber = Fiber::new(line);
        let err = fiber.run(Packet::new(None)).await.unwrap_err();
        match err {
            SoapError::Fault(f) => assert_eq!(f.code.local, "MustUnderstand"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
