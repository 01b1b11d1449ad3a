//! Composes tubelines for clients and endpoints.

use super::tube::{Tube, Tubeline};
use crate::config::RuntimeConfig;
use crate::tubes::{
    ClientMUTube, DumpTube, HandlerChain, HandlerTube, MessageValidator, ServerMUTube,
    UnderstoodHeaders, ValidationTube,
};
use crate::xml::QName;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builds one tube from the runtime configuration.
pub type TubeFactory = Arc<dyn Fn(&RuntimeConfig) -> Box<dyn Tube> + Send + Sync>;

/// What a client tubeline is assembled from.
#[derive(Clone)]
pub struct ClientAssemblerContext {
    pub config: Arc<RuntimeConfig>,
    pub address: String,
    pub handlers: HandlerChain,
    /// Response headers understood beyond those the handlers declare
    pub known_headers: Vec<QName>,
    pub transport: TubeFactory,
    pub addressing: Option<TubeFactory>,
    pub security: Option<TubeFactory>,
}

impl ClientAssemblerContext {
    pub fn new(config: Arc<RuntimeConfig>, address: impl Into<String>, transport: TubeFactory) -> Self {
        Self {
            config,
            address: address.into(),
            handlers: Arc::new(Vec::new()),
            known_headers: Vec::new(),
            transport,
            addressing: None,
            security: None,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerChain) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_known_headers(mut self, headers: Vec<QName>) -> Self {
        self.known_headers = headers;
        self
    }

    pub fn with_addressing(mut self, factory: TubeFactory) -> Self {
        self.addressing = Some(factory);
        self
    }

    pub fn with_security(mut self, factory: TubeFactory) -> Self {
        self.security = Some(factory);
        self
    }
}

impl fmt::Debug for ClientAssemblerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssemblerContext")
            .field("address", &self.address)
            .field("handlers", &self.handlers.len())
            .field("addressing", &self.addressing.is_some())
            .field("security", &self.security.is_some())
            .finish()
    }
}

/// What an endpoint tubeline is assembled from.
#[derive(Clone)]
pub struct ServerAssemblerContext {
    pub config: Arc<RuntimeConfig>,
    pub handlers: HandlerChain,
    /// Request headers the endpoint itself understands
    pub known_headers: Vec<QName>,
    /// The endpoint invoker
    pub terminal: TubeFactory,
    pub security: Option<TubeFactory>,
    pub addressing: Option<TubeFactory>,
    pub monitoring: Option<TubeFactory>,
}

impl ServerAssemblerContext {
    pub fn new(config: Arc<RuntimeConfig>, terminal: TubeFactory) -> Self {
        Self {
            config,
            handlers: Arc::new(Vec::new()),
            known_headers: Vec::new(),
            terminal,
            security: None,
            addressing: None,
            monitoring: None,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerChain) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_known_headers(mut self, headers: Vec<QName>) -> Self {
        self.known_headers = headers;
        self
    }

    pub fn with_security(mut self, factory: TubeFactory) -> Self {
        self.security = Some(factory);
        self
    }

    pub fn with_addressing(mut self, factory: TubeFactory) -> Self {
        self.addressing = Some(factory);
        self
    }

    pub fn with_monitoring(mut self, factory: TubeFactory) -> Self {
        self.monitoring = Some(factory);
        self
    }
}

impl fmt::Debug for ServerAssemblerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerAssemblerContext")
            .field("handlers", &self.handlers.len())
            .field("security", &self.security.is_some())
            .field("addressing", &self.addressing.is_some())
            .field("monitoring", &self.monitoring.is_some())
            .finish()
    }
}

/// Assembles tubes in the fixed standalone order.
///
/// Client: handler, validation, mustUnderstand, addressing, dump, security,
/// transport. Server: security, dump, addressing, mustUnderstand,
/// monitoring, handler, validation, endpoint. Stages without configuration
/// or factory are left out.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandaloneTubelineAssembler;

impl StandaloneTubelineAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn create_client(&self, ctx: &ClientAssemblerContext) -> Tubeline {
        let config = &ctx.config;
        let mut line = Tubeline::new();
        let tubes = [
            self.create_handler_tube(&ctx.handlers, true),
            self.create_validation_tube(config, false),
            self.create_client_mu_tube(config, &ctx.handlers, &ctx.known_headers),
            ctx.addressing.as_ref().map(|f| f(config)),
            self.create_dump_tube(config, "client"),
            ctx.security.as_ref().map(|f| f(config)),
            Some((ctx.transport)(config)),
        ];
        for tube in tubes.into_iter().flatten() {
            line.push(tube);
        }
        debug!(address = %ctx.address, tubes = ?line.names(), "Assembled client tubeline");
        line
    }

    pub fn create_server(&self, ctx: &ServerAssemblerContext) -> Tubeline {
        let config = &ctx.config;
        let mut line = Tubeline::new();
        let tubes = [
            ctx.security.as_ref().map(|f| f(config)),
            self.create_dump_tube(config, "server"),
            ctx.addressing.as_ref().map(|f| f(config)),
            self.create_server_mu_tube(config, &ctx.handlers, &ctx.known_headers),
            ctx.monitoring.as_ref().map(|f| f(config)),
            self.create_handler_tube(&ctx.handlers, false),
            self.create_validation_tube(config, true),
            Some((ctx.terminal)(config)),
        ];
        for tube in tubes.into_iter().flatten() {
            line.push(tube);
        }
        debug!(
            endpoint = %config.server.endpoint_name,
            tubes = ?line.names(),
            "Assembled server tubeline"
        );
        line
    }

    pub fn create_handler_tube(&self, handlers: &HandlerChain, client: bool) -> Option<Box<dyn Tube>> {
        if handlers.is_empty() {
            return None;
        }
        Some(Box::new(HandlerTube::new(handlers.clone(), client)))
    }

    pub fn create_validation_tube(&self, config: &RuntimeConfig, server: bool) -> Option<Box<dyn Tube>> {
        if !config.validation.enabled {
            return None;
        }
        let validator = Arc::new(MessageValidator::new(config.validation.clone()));
        Some(Box::new(ValidationTube::new(
            validator,
            config.binding.soap_version,
            server,
        )))
    }

    pub fn create_dump_tube(&self, config: &RuntimeConfig, name: &str) -> Option<Box<dyn Tube>> {
        config
            .http
            .dump
            .then(|| Box::new(DumpTube::new(name, config.http.dump_threshold)) as Box<dyn Tube>)
    }

    pub fn create_client_mu_tube(
        &self,
        config: &RuntimeConfig,
        handlers: &HandlerChain,
        known: &[QName],
    ) -> Option<Box<dyn Tube>> {
        let understood = understood_headers(config, handlers, known)?;
        Some(Box::new(ClientMUTube::new(understood)))
    }

    pub fn create_server_mu_tube(
        &self,
        config: &RuntimeConfig,
        handlers: &HandlerChain,
        known: &[QName],
    ) -> Option<Box<dyn Tube>> {
        let understood = understood_headers(config, handlers, known)?;
        Some(Box::new(ServerMUTube::new(understood)))
    }
}

/// `None` for the XML/HTTP binding, which has no headers.
fn understood_headers(
    config: &RuntimeConfig,
    handlers: &HandlerChain,
    known: &[QName],
) -> Option<UnderstoodHeaders> {
    let version = config.binding.soap_version?;
    let mut names = known.to_vec();
    for handler in handlers.iter() {
        for name in handler.understood_headers() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Some(UnderstoodHeaders::new(version, &config.binding.roles, names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::packet::Packet;
    use crate::pipe::FnTube;
    use crate::tubes::Handler;

    struct Noop;

    impl Handler for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn handle_message(&self, _packet: &mut Packet, _outbound: bool) -> Result<bool> {
            Ok(true)
        }
    }

    fn named(name: &'static str) -> TubeFactory {
        Arc::new(move |_: &RuntimeConfig| -> Box<dyn Tube> { Box::new(FnTube::new(name, Ok)) })
    }

    #[test]
    fn test_minimal_client_line() {
        let ctx = ClientAssemblerContext::new(
            Arc::new(RuntimeConfig::default()),
            "http://localhost/soap",
            named("transport"),
        );
        let line = StandaloneTubelineAssembler::new().create_client(&ctx);
        assert_eq!(line.names(), vec!["client-mu", "transport"]);
    }

    #[test]
    fn test_full_client_order() {
        let mut config = RuntimeConfig::default();
        config.validation.enabled = true;
        config.http.dump = true;
        let ctx = ClientAssemblerContext::new(Arc::new(config), "local://svc", named("transport"))
            .with_handlers(Arc::new(vec![Arc::new(Noop) as Arc<dyn Handler>]))
            .with_addressing(named("addressing"))
            .with_security(named("security"));
        let line = StandaloneTubelineAssembler::new().create_client(&ctx);
        assert_eq!(
            line.names(),
            vec![
                "client-handler",
                "validation",
                "client-mu",
                "addressing",
                "dump",
                "security",
                "transport"
            ]
        );
    }

    #[test]
    fn test_full_server_order() {
        let mut config = RuntimeConfig::default();
        config.validation.enabled = true;
        config.http.dump = true;
        let ctx = ServerAssemblerContext::new(Arc::new(config), named("invoker"))
            .with_handlers(Arc::new(vec![Arc::new(Noop) as Arc<dyn Handler>]))
            .with_security(named("security"))
            .with_addressing(named("addressing"))
            .with_monitoring(named("monitoring"));
        let line = StandaloneTubelineAssembler::new().create_server(&ctx);
        assert_eq!(
            line.names(),
            vec![
                "security",
                "dump",
                "addressing",
                "server-mu",
                "monitoring",
                "server-handler",
                "validation",
                "invoker"
            ]
        );
    }

    #[test]
    fn test_xml_binding_has_no_mu_tube() {
        let mut config = RuntimeConfig::default();
        config.binding.soap_version = None;
        let ctx = ServerAssemblerContext::new(Arc::new(config), named("invoker"));
        let line = StandaloneTubelineAssembler::new().create_server(&ctx);
        assert_eq!(line.names(), vec!["invoker"]);
    }
}
