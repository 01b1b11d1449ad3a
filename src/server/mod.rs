//! Server side: endpoint traits, their invoker tubes and the HTTP adapter.

pub mod adapter;
pub mod provider;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::pipe::{ServerAssemblerContext, StandaloneTubelineAssembler, Tube, TubeFactory};
use crate::xml::XmlWriterFactory;
use std::sync::Arc;

pub use adapter::{fault_for_error, AdapterMetrics, HttpAdapter, HttpExchange};
pub use provider::{
    response_packet, AsyncProvider, AsyncProviderInvokerTube, Provider, ProviderInvokerTube,
    Responder,
};

/// Terminal tube factory for a synchronous provider.
pub fn provider_tube(provider: Arc<dyn Provider>) -> TubeFactory {
    Arc::new(move |config: &RuntimeConfig| -> Box<dyn Tube> {
        Box::new(ProviderInvokerTube::new(
            provider.clone(),
            config.binding.soap_version,
        ))
    })
}

/// Terminal tube factory for an asynchronous provider.
pub fn async_provider_tube(provider: Arc<dyn AsyncProvider>) -> TubeFactory {
    Arc::new(move |config: &RuntimeConfig| -> Box<dyn Tube> {
        Box::new(AsyncProviderInvokerTube::new(
            provider.clone(),
            config.binding.soap_version,
        ))
    })
}

/// Assemble the server tubeline for `ctx` and wrap it in an adapter.
pub fn create_endpoint(
    ctx: &ServerAssemblerContext,
    writers: Arc<XmlWriterFactory>,
) -> Result<Arc<HttpAdapter>> {
    let line = StandaloneTubelineAssembler::new().create_server(ctx);
    Ok(Arc::new(HttpAdapter::new(&ctx.config, line, writers)?))
}
