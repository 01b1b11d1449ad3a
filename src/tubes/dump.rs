//! Message dumping to the log.

use crate::error::SoapError;
use crate::message::to_bytes;
use crate::packet::Packet;
use crate::pipe::{NextAction, Tube, TubeCloner};
use async_trait::async_trait;
use tracing::debug;

/// Logs every message passing in either direction at debug level.
#[derive(Debug, Clone)]
pub struct DumpTube {
    name: String,
    threshold: usize,
}

impl DumpTube {
    pub fn new(name: impl Into<String>, threshold: usize) -> Self {
        Self {
            name: name.into(),
            threshold,
        }
    }

    /// The message of `packet` as text, cut at the threshold. Serializes a
    /// copy so the original stays readable.
    pub fn render(&self, packet: &Packet) -> String {
        let message = match packet.message() {
            Some(m) => m,
            None => return "<no message>".to_string(),
        };
        let bytes = match message.copy().and_then(|mut copy| to_bytes(copy.as_mut())) {
            Ok(b) => b,
            Err(e) => return format!("<unprintable message: {}>", e),
        };
        let text = String::from_utf8_lossy(&bytes);
        if text.len() <= self.threshold {
            return text.into_owned();
        }
        let mut end = self.threshold;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} bytes total)", &text[..end], text.len())
    }

    fn dump(&self, direction: &str, packet: &Packet) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                dump = %self.name,
                direction,
                endpoint = ?packet.endpoint_address,
                action = ?packet.soap_action,
                message = %self.render(packet),
                "Message dump"
            );
        }
    }
}

#[async_trait]
impl Tube for DumpTube {
    fn name(&self) -> &str {
        "dump"
    }

    async fn process_request(&mut self, packet: Packet) -> NextAction {
        self.dump("request", &packet);
        NextAction::Invoke(packet)
    }

    async fn process_response(&mut self, packet: Packet) -> NextAction {
        self.dump("response", &packet);
        NextAction::Return(packet)
    }

    async fn process_exception(&mut self, error: SoapError) -> NextAction {
        debug!(dump = %self.name, error = %error, "Exception dump");
        NextAction::Throw(error)
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoapVersion;
    use crate::message::DomMessage;

    fn packet() -> Packet {
        let msg = DomMessage::from_xml(
            Some(SoapVersion::Soap11),
            b"<m:echo xmlns:m=\"urn:m\">hello world</m:echo>",
        )
        .unwrap();
        Packet::new(Some(Box::new(msg)))
    }

    #[test]
    fn test_render_keeps_message_readable() {
        let dump = DumpTube::new("client", 4096);
        let mut p = packet();
        let text = dump.render(&p);
        assert!(text.contains("Envelope"));
        assert!(text.contains("hello world"));
        let payload = p.message_mut().unwrap().read_payload_as_source().unwrap();
        assert!(payload.is_some());
    }

    #[test]
    fn test_render_truncates() {
        let dump = DumpTube::new("client", 16);
        let text = dump.render(&packet());
        assert!(text.contains("... ("));
        assert!(text.ends_with("bytes total)"));
        assert_eq!(DumpTube::new("c", 16).render(&Packet::new(None)), "<no message>");
    }
}
