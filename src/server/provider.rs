//! Endpoint implementations and the terminal tubes that invoke them.

use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::message::{FaultMessage, Message, SoapFault};
use crate::packet::Packet;
use crate::pipe::{completion_channel, Completion, NextAction, Tube, TubeCloner};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Synchronous endpoint: returns the response message, or `None` for a
/// one-way operation.
///
/// Returning `Err(SoapError::Fault(..))` sends that fault; any other error
/// becomes a receiver fault.
pub trait Provider: Send + Sync {
    fn invoke(&self, request: &mut Packet) -> Result<Option<Box<dyn Message>>>;
}

impl<F> Provider for F
where
    F: Fn(&mut Packet) -> Result<Option<Box<dyn Message>>> + Send + Sync,
{
    fn invoke(&self, request: &mut Packet) -> Result<Option<Box<dyn Message>>> {
        self(request)
    }
}

/// Callback-based endpoint. The provider may answer through the
/// [`Responder`] before returning, or later from another task.
pub trait AsyncProvider: Send + Sync {
    fn invoke(&self, request: Packet, responder: Responder);
}

/// Answers one asynchronous invocation exactly once.
#[derive(Debug)]
pub struct Responder {
    request: Packet,
    version: Option<SoapVersion>,
    completion: Completion,
}

impl Responder {
    pub fn send(self, response: Option<Box<dyn Message>>) {
        self.complete(Ok(response));
    }

    pub fn fail(self, error: SoapError) {
        self.complete(Err(error));
    }

    pub fn complete(self, result: Result<Option<Box<dyn Message>>>) {
        let response = response_packet(&self.request, self.version, result);
        debug!(ok = response.is_ok(), "Resuming asynchronous invocation");
        self.completion.complete(response);
    }
}

/// Turn an endpoint's answer into the server response packet. Errors
/// become fault messages for SOAP bindings and stay errors for XML/HTTP.
pub fn response_packet(
    request: &Packet,
    version: Option<SoapVersion>,
    result: Result<Option<Box<dyn Message>>>,
) -> Result<Packet> {
    match (result, version) {
        (Ok(message), _) => Ok(request.create_server_response(message)),
        (Err(e), Some(version)) => {
            let fault = match e {
                SoapError::Fault(fault) => *fault,
                other => {
                    warn!(error = %other, kind = other.kind().as_str(), "Endpoint failed");
                    SoapFault::receiver(version, other.to_string())
                }
            };
            let message = FaultMessage::new(version, fault);
            Ok(request.create_server_response(Some(Box::new(message))))
        }
        (Err(e), None) => Err(e),
    }
}

/// Terminal server tube calling a [`Provider`].
pub struct ProviderInvokerTube {
    provider: Arc<dyn Provider>,
    version: Option<SoapVersion>,
}

impl ProviderInvokerTube {
    pub fn new(provider: Arc<dyn Provider>, version: Option<SoapVersion>) -> Self {
        Self { provider, version }
    }
}

#[async_trait]
impl Tube for ProviderInvokerTube {
    fn name(&self) -> &str {
        "provider"
    }

    async fn process_request(&mut self, mut packet: Packet) -> NextAction {
        let result = self.provider.invoke(&mut packet);
        match response_packet(&packet, self.version, result) {
            Ok(response) => NextAction::Return(response),
            Err(e) => NextAction::Throw(e),
        }
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(Self {
            provider: self.provider.clone(),
            version: self.version,
        })
    }
}

/// Terminal server tube calling an [`AsyncProvider`]. The fiber suspends
/// until the responder answers; an answer given before the provider
/// returns is picked up without parking.
pub struct AsyncProviderInvokerTube {
    provider: Arc<dyn AsyncProvider>,
    version: Option<SoapVersion>,
}

impl AsyncProviderInvokerTube {
    pub fn new(provider: Arc<dyn AsyncProvider>, version: Option<SoapVersion>) -> Self {
        Self { provider, version }
    }
}

#[async_trait]
impl Tube for AsyncProviderInvokerTube {
    fn name(&self) -> &str {
        "async-provider"
    }

    async fn process_request(&mut self, packet: Packet) -> NextAction {
        let template = match packet.copy(false) {
            Ok(t) => t,
            Err(e) => return NextAction::Throw(e),
        };
        let (completion, suspension) = completion_channel();
        let responder = Responder {
            request: template,
            version: self.version,
            completion,
        };
        self.provider.invoke(packet, responder);
        NextAction::Suspend(suspension)
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(Self {
            provider: self.provider.clone(),
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DomMessage;
    use crate::pipe::{Fiber, Tubeline};

    fn request() -> Packet {
        let msg = DomMessage::from_xml(Some(SoapVersion::Soap11), b"<m:ping xmlns:m=\"urn:m\"/>")
            .unwrap();
        let mut p = Packet::new(Some(Box::new(msg)));
        p.server_side = true;
        p
    }

    fn echo(request: &mut Packet) -> Result<Option<Box<dyn Message>>> {
        Ok(request.take_message())
    }

    #[tokio::test]
    async fn test_provider_echo() {
        let mut tube = ProviderInvokerTube::new(Arc::new(echo), Some(SoapVersion::Soap11));
        match tube.process_request(request()).await {
            NextAction::Return(p) => {
                assert!(p.server_side);
                assert_eq!(p.message().unwrap().payload_local_part(), Some("ping"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_provider_error_becomes_fault() {
        let failing = |_: &mut Packet| -> Result<Option<Box<dyn Message>>> {
            Err(SoapError::Pipeline("database down".to_string()))
        };
        let mut tube = ProviderInvokerTube::new(Arc::new(failing), Some(SoapVersion::Soap12));
        let mut response = match tube.process_request(request()).await {
            NextAction::Return(p) => p,
            other => panic!("unexpected {other:?}"),
        };
        let msg = response.message_mut().unwrap();
        assert!(msg.is_fault());
        let fault = SoapFault::from_message(msg).unwrap();
        assert!(!fault.is_sender_fault());
        assert!(fault.reason.contains("database down"));
    }

    #[tokio::test]
    async fn test_xml_binding_error_is_thrown() {
        let failing = |_: &mut Packet| -> Result<Option<Box<dyn Message>>> {
            Err(SoapError::Pipeline("nope".to_string()))
        };
        let mut tube = ProviderInvokerTube::new(Arc::new(failing), None);
        assert!(matches!(
            tube.process_request(request()).await,
            NextAction::Throw(SoapError::Pipeline(_))
        ));
    }

    struct Immediate;

    impl AsyncProvider for Immediate {
        fn invoke(&self, mut request: Packet, responder: Responder) {
            responder.send(request.take_message());
        }
    }

    struct Deferred;

    impl AsyncProvider for Deferred {
        fn invoke(&self, mut request: Packet, responder: Responder) {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                responder.send(request.take_message());
            });
        }
    }

    async fn run_async(provider: Arc<dyn AsyncProvider>) -> Packet {
        let mut line = Tubeline::new();
        line.push(Box::new(AsyncProviderInvokerTube::new(
            provider,
            Some(SoapVersion::Soap11),
        )));
        Fiber::new(line).run(request()).await.unwrap()
    }

    #[tokio::test]
    async fn test_async_provider_answers_before_suspend() {
        let response = run_async(Arc::new(Immediate)).await;
        assert_eq!(response.message().unwrap().payload_local_part(), Some("ping"));
    }

    #[tokio::test]
    async fn test_async_provider_answers_later() {
        let response = run_async(Arc::new(Deferred)).await;
        assert_eq!(response.message().unwrap().payload_local_part(), Some("ping"));
    }
}
