//! Application handler chain.

use crate::error::{Result, SoapError};
use crate::packet::Packet;
use crate::pipe::{NextAction, Tube, TubeCloner};
use crate::xml::QName;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// User code that sees every message passing through the pipeline.
///
/// Outbound messages visit the chain in order; inbound messages visit it in
/// reverse. Returning `false` stops processing in the current direction: the
/// packet, usually with a replaced message, is sent back through the handlers
/// already called.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    fn handle_message(&self, packet: &mut Packet, outbound: bool) -> Result<bool>;

    /// Called instead of `handle_message` for fault messages.
    fn handle_fault(&self, _packet: &mut Packet, _outbound: bool) -> Result<bool> {
        Ok(true)
    }

    /// Called once per exchange after the handler last saw a message.
    fn close(&self) {}

    /// Headers this handler processes, for mustUnderstand checks.
    fn understood_headers(&self) -> Vec<QName> {
        Vec::new()
    }
}

pub type HandlerChain = Arc<Vec<Arc<dyn Handler>>>;

/// Runs a handler chain around the rest of the pipeline.
pub struct HandlerTube {
    handlers: HandlerChain,
    client: bool,
    /// Handlers that saw the request, in call order
    called: Vec<usize>,
}

impl HandlerTube {
    pub fn new(handlers: HandlerChain, client: bool) -> Self {
        Self {
            handlers,
            client,
            called: Vec::new(),
        }
    }

    /// Call order for a message in the given direction.
    fn order(&self, outbound: bool) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.handlers.len()).collect();
        if !outbound {
            order.reverse();
        }
        order
    }

    fn call(&self, index: usize, packet: &mut Packet, outbound: bool) -> Result<bool> {
        let handler = &self.handlers[index];
        let is_fault = packet.message().is_some_and(|m| m.is_fault());
        let proceed = if is_fault {
            handler.handle_fault(packet, outbound)?
        } else {
            handler.handle_message(packet, outbound)?
        };
        if !proceed {
            debug!(handler = handler.name(), outbound, "Handler reversed message direction");
        }
        Ok(proceed)
    }

    /// Run `indices` in order until one returns false. Returns how many ran
    /// to completion.
    fn run(&self, indices: &[usize], packet: &mut Packet, outbound: bool) -> Result<Option<usize>> {
        for (n, &i) in indices.iter().enumerate() {
            if !self.call(i, packet, outbound)? {
                return Ok(Some(n));
            }
        }
        Ok(None)
    }

    fn close_all(&mut self) {
        for i in self.called.drain(..).rev() {
            self.handlers[i].close();
        }
    }
}

#[async_trait]
impl Tube for HandlerTube {
    fn name(&self) -> &str {
        if self.client {
            "client-handler"
        } else {
            "server-handler"
        }
    }

    async fn process_request(&mut self, mut packet: Packet) -> NextAction {
        // A client request goes out; a server request comes in.
        let outbound = self.client;
        let order = self.order(outbound);
        self.called.clear();
        match self.run(&order, &mut packet, outbound) {
            Ok(None) => {
                self.called = order;
                NextAction::Invoke(packet)
            }
            Ok(Some(stopped_at)) => {
                self.called = order[..=stopped_at].to_vec();
                // The stopping handler is not called again.
                let back: Vec<usize> = order[..stopped_at].iter().rev().copied().collect();
                let result = self.run(&back, &mut packet, !outbound);
                self.close_all();
                match result {
                    Ok(_) => NextAction::Return(packet),
                    Err(e) => NextAction::Throw(e),
                }
            }
            Err(e) => {
                self.close_all();
                NextAction::Throw(e)
            }
        }
    }

    async fn process_response(&mut self, mut packet: Packet) -> NextAction {
        let back: Vec<usize> = self.called.iter().rev().copied().collect();
        let result = self.run(&back, &mut packet, !self.client);
        self.close_all();
        match result {
            Ok(_) => NextAction::Return(packet),
            Err(e) => NextAction::Throw(e),
        }
    }

    async fn process_exception(&mut self, error: SoapError) -> NextAction {
        self.close_all();
        NextAction::Throw(error)
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(HandlerTube::new(self.handlers.clone(), self.client))
    }

    fn pre_destroy(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{Fiber, FnTube, Tubeline};
    use parking_lot::Mutex;

    struct Logging {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        stop_outbound: bool,
    }

    impl Handler for Logging {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle_message(&self, _packet: &mut Packet, outbound: bool) -> Result<bool> {
            let dir = if outbound { "out" } else { "in" };
            self.log.lock().push(format!("{}:{}", self.name, dir));
            Ok(!(outbound && self.stop_outbound))
        }

        fn close(&self) {
            self.log.lock().push(format!("{}:close", self.name));
        }
    }

    fn chain(log: &Arc<Mutex<Vec<String>>>, stop: Option<&str>) -> HandlerChain {
        Arc::new(
            ["a", "b", "c"]
                .iter()
                .map(|n| {
                    Arc::new(Logging {
                        name: n.to_string(),
                        log: log.clone(),
                        stop_outbound: stop == Some(*n),
                    }) as Arc<dyn Handler>
                })
                .collect(),
        )
    }

    fn line(handlers: HandlerChain) -> Tubeline {
        let mut line = Tubeline::new();
        line.push(Box::new(HandlerTube::new(handlers, true)));
        line.push(Box::new(FnTube::new("terminal", Ok)));
        line
    }

    #[tokio::test]
    async fn test_client_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut fiber = Fiber::new(line(chain(&log, None)));
        fiber.run(Packet::new(None)).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                "a:out", "b:out", "c:out", "c:in", "b:in", "a:in", "c:close", "b:close",
                "a:close"
            ]
        );
    }

    #[tokio::test]
    async fn test_false_reverses_direction() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut fiber = Fiber::new(line(chain(&log, Some("b"))));
        fiber.run(Packet::new(None)).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["a:out", "b:out", "a:in", "b:close", "a:close"]
        );
    }
}
