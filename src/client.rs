//! Dispatch-style client over an assembled client tubeline.

use crate::codec::{binding_codec, Codec};
use crate::config::{RuntimeConfig, SoapVersion};
use crate::error::{Result, SoapError};
use crate::message::{Message, SoapFault};
use crate::packet::Packet;
use crate::pipe::{
    ClientAssemblerContext, Fiber, StandaloneTubelineAssembler, Tube, TubeFactory, Tubeline,
    TubelinePool,
};
use crate::property::PropertyValue;
use crate::server::HttpAdapter;
use crate::transport::{CookieJar, HttpClient, HttpTransportTube, LocalTransportTube, ReqwestClient};
use crate::xml::{QName, XmlWriterFactory};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

const POOL_CAPACITY: usize = 16;

/// Per-operation binding facts looked up by payload element name.
pub trait OperationModel: Send + Sync {
    fn soap_action(&self, payload: &QName) -> Option<String>;

    fn is_one_way(&self, payload: &QName) -> bool {
        let _ = payload;
        false
    }
}

/// A client bound to one endpoint.
///
/// Properties in the request context are copied onto every request packet.
/// Each call runs on its own copy of the tubeline.
pub struct Stub {
    address: String,
    version: Option<SoapVersion>,
    pool: Arc<TubelinePool>,
    request_context: Mutex<BTreeMap<String, PropertyValue>>,
    operations: Option<Arc<dyn OperationModel>>,
}

impl Stub {
    /// Assemble the client tubeline described by `ctx`.
    pub fn new(ctx: &ClientAssemblerContext) -> Self {
        let line = StandaloneTubelineAssembler::new().create_client(ctx);
        Self::with_line(&ctx.config, ctx.address.clone(), line)
    }

    /// Client over an already assembled line.
    pub fn with_line(config: &RuntimeConfig, address: impl Into<String>, line: Tubeline) -> Self {
        Self {
            address: address.into(),
            version: config.binding.soap_version,
            pool: TubelinePool::new(line, POOL_CAPACITY),
            request_context: Mutex::new(BTreeMap::new()),
            operations: None,
        }
    }

    /// HTTP client for `address` using reqwest.
    pub fn http(
        config: Arc<RuntimeConfig>,
        address: impl Into<String>,
        writers: Arc<XmlWriterFactory>,
    ) -> Result<Self> {
        let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(&config.http)?);
        Self::http_with_client(config, address, writers, client)
    }

    /// HTTP client sending through `client`.
    pub fn http_with_client(
        config: Arc<RuntimeConfig>,
        address: impl Into<String>,
        writers: Arc<XmlWriterFactory>,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let address = address.into();
        let codec: Arc<dyn Codec> = Arc::from(binding_codec(&config.binding, writers)?);
        let cookies = Arc::new(CookieJar::new());
        let default_address = address.clone();
        let transport: TubeFactory = Arc::new(move |config: &RuntimeConfig| -> Box<dyn Tube> {
            Box::new(
                HttpTransportTube::new(
                    codec.copy(),
                    config.binding.soap_version,
                    client.clone(),
                    Arc::new(config.http.clone()),
                    default_address.clone(),
                )
                .with_cookie_jar(cookies.clone()),
            )
        });
        Ok(Self::new(&ClientAssemblerContext::new(config, address, transport)))
    }

    /// Client calling an in-process adapter.
    pub fn local(
        config: Arc<RuntimeConfig>,
        adapter: Arc<HttpAdapter>,
        writers: Arc<XmlWriterFactory>,
    ) -> Result<Self> {
        let codec: Arc<dyn Codec> = Arc::from(binding_codec(&config.binding, writers)?);
        let address = format!("local://{}", adapter.name());
        let transport: TubeFactory = Arc::new(move |config: &RuntimeConfig| -> Box<dyn Tube> {
            Box::new(LocalTransportTube::new(
                codec.copy(),
                config.binding.soap_version,
                config.binding.content_negotiation,
                adapter.clone(),
            ))
        });
        Ok(Self::new(&ClientAssemblerContext::new(config, address, transport)))
    }

    pub fn with_operations(mut self, operations: Arc<dyn OperationModel>) -> Self {
        self.operations = Some(operations);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn version(&self) -> Option<SoapVersion> {
        self.version
    }

    /// Set a request context property.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.request_context.lock().insert(key.into(), value.into());
    }

    pub fn remove_property(&self, key: &str) -> Option<PropertyValue> {
        self.request_context.lock().remove(key)
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.request_context.lock().get(key).cloned()
    }

    /// Request packet for `message` carrying the request context.
    pub fn create_packet(&self, message: Box<dyn Message>) -> Result<Packet> {
        let payload = message
            .payload_local_part()
            .map(|local| QName::new(message.payload_namespace_uri().unwrap_or_default(), local));
        let mut packet = Packet::new(Some(message));
        packet.endpoint_address = Some(self.address.clone());

        let context = self.request_context.lock().clone();
        for (key, value) in context {
            packet.put(&key, value)?;
        }

        if let (Some(model), Some(payload)) = (&self.operations, &payload) {
            if packet.soap_action.is_none() {
                packet.soap_action = model.soap_action(payload);
            }
            if model.is_one_way(payload) {
                packet.expect_reply = Some(false);
            }
        }
        Ok(packet)
    }

    /// Run a packet through a pooled line.
    pub async fn process(&self, packet: Packet) -> Result<Packet> {
        let mut fiber = Fiber::new(self.pool.take());
        let result = fiber.run(packet).await;
        if result.is_ok() {
            self.pool.recycle(fiber.into_line());
        }
        result
    }

    /// Send `message` and wait for the response. A fault response is
    /// returned as [`SoapError::Fault`].
    pub async fn invoke(&self, message: Box<dyn Message>) -> Result<Box<dyn Message>> {
        let packet = self.create_packet(message)?;
        let response = self.process(packet).await?;
        response_message(response)
    }

    /// Send `message` without waiting for a response message.
    pub async fn invoke_one_way(&self, message: Box<dyn Message>) -> Result<()> {
        let mut packet = self.create_packet(message)?;
        packet.expect_reply = Some(false);
        let mut response = self.process(packet).await?;
        if let Some(mut msg) = response.take_message() {
            if msg.is_fault() {
                return Err(SoapFault::from_message(msg.as_mut())?.into_error());
            }
        }
        Ok(())
    }

    /// Start the call on its own task; the outcome is read from the handle.
    pub fn invoke_async(&self, message: Box<dyn Message>) -> Result<ResponseHandle> {
        let (tx, rx) = oneshot::channel();
        self.invoke_with_callback(message, move |result| {
            let _ = tx.send(result);
        })?;
        Ok(ResponseHandle { rx })
    }

    /// Start the call on its own task and hand the outcome to `callback`.
    pub fn invoke_with_callback<F>(
        &self,
        message: Box<dyn Message>,
        callback: F,
    ) -> Result<tokio::task::JoinHandle<()>>
    where
        F: FnOnce(Result<Box<dyn Message>>) + Send + 'static,
    {
        let packet = self.create_packet(message)?;
        let pool = self.pool.clone();
        let fiber = Fiber::new(pool.take());
        debug!(fiber = fiber.id(), endpoint = %self.address, "Starting asynchronous invocation");
        Ok(fiber.start(packet, move |result, line| {
            if result.is_ok() {
                pool.recycle(line);
            }
            callback(result.and_then(response_message));
        }))
    }
}

impl std::fmt::Debug for Stub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stub")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Pending outcome of [`Stub::invoke_async`].
#[derive(Debug)]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Result<Box<dyn Message>>>,
}

impl ResponseHandle {
    /// Wait for the response; faults surface here as errors.
    pub async fn get(self) -> Result<Box<dyn Message>> {
        self.rx.await.unwrap_or_else(|_| {
            Err(SoapError::Pipeline(
                "asynchronous invocation ended without a result".to_string(),
            ))
        })
    }
}

/// The response message of a two-way call, with faults turned into errors.
pub fn response_message(mut response: Packet) -> Result<Box<dyn Message>> {
    let mut message = response
        .take_message()
        .ok_or_else(|| SoapError::Pipeline("no response message".to_string()))?;
    if message.is_fault() {
        let fault = SoapFault::from_message(message.as_mut())?;
        debug!(code = %fault.code.local, reason = %fault.reason, "Fault response");
        return Err(fault.into_error());
    }
    Ok(message)
}
