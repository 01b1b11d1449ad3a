//! Tubes, the actions they return and the arena they live in.

use super::completion::Suspension;
use crate::error::{Result, SoapError};
use crate::packet::Packet;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Index of a tube in its [`Tubeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TubeRef(pub(crate) usize);

impl TubeRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// What the fiber does after a tube returns.
pub enum NextAction {
    /// Pass the packet to the next tube; this tube sees the response.
    Invoke(Packet),
    /// Jump forward to a specific tube; this tube sees the response.
    InvokeAt(TubeRef, Packet),
    /// Pass the packet on without waiting to see the response.
    InvokeAndForget(Packet),
    /// Turn around: the packet is the response for the earlier tubes.
    Return(Packet),
    /// Unwind through the earlier tubes' exception hooks.
    Throw(SoapError),
    /// Park the fiber until the suspension completes.
    Suspend(Suspension),
}

impl NextAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Invoke(_) => "invoke",
            Self::InvokeAt(..) => "invoke-at",
            Self::InvokeAndForget(_) => "invoke-and-forget",
            Self::Return(_) => "return",
            Self::Throw(_) => "throw",
            Self::Suspend(_) => "suspend",
        }
    }
}

impl fmt::Debug for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One stage of a tubeline.
///
/// A tube may keep per-call state: every fiber runs on its own copy of the
/// line, made with [`Tube::copy`].
#[async_trait]
pub trait Tube: Send + Sync {
    fn name(&self) -> &str;

    async fn process_request(&mut self, packet: Packet) -> NextAction;

    /// Called in reverse order once a response comes back. The default
    /// passes it through.
    async fn process_response(&mut self, packet: Packet) -> NextAction {
        NextAction::Return(packet)
    }

    /// Called in reverse order when a later stage failed. Returning
    /// `Return` turns the error into a response.
    async fn process_exception(&mut self, error: SoapError) -> NextAction {
        NextAction::Throw(error)
    }

    /// Structurally equal copy with fresh per-call state. References to
    /// sibling tubes are translated through `cloner`.
    fn copy(&self, cloner: &TubeCloner) -> Box<dyn Tube>;

    /// Release resources when the line is discarded.
    fn pre_destroy(&mut self) {}
}

/// Maps tube references of a line being copied to the copy.
#[derive(Debug, Clone)]
pub struct TubeCloner {
    map: Vec<Option<TubeRef>>,
}

impl TubeCloner {
    /// Cloner for copying the tubes from `start` on out of a line of `len`.
    fn new(len: usize, start: usize) -> Self {
        let map = (0..len)
            .map(|i| (i >= start).then(|| TubeRef(i - start)))
            .collect();
        Self { map }
    }

    /// Where `original` lands in the copy; `None` when it is not copied.
    pub fn map(&self, original: TubeRef) -> Option<TubeRef> {
        self.map.get(original.0).copied().flatten()
    }
}

/// Ordered tubes of one pipeline.
#[derive(Default)]
pub struct Tubeline {
    tubes: Vec<Box<dyn Tube>>,
}

impl Tubeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tube; returns its reference.
    pub fn push(&mut self, tube: Box<dyn Tube>) -> TubeRef {
        self.tubes.push(tube);
        TubeRef(self.tubes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.tubes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tubes.is_empty()
    }

    pub fn head(&self) -> Option<TubeRef> {
        (!self.tubes.is_empty()).then_some(TubeRef(0))
    }

    /// Reference to the tube after `r`.
    pub fn next(&self, r: TubeRef) -> Option<TubeRef> {
        (r.0 + 1 < self.tubes.len()).then(|| TubeRef(r.0 + 1))
    }

    pub fn get(&self, r: TubeRef) -> Option<&dyn Tube> {
        self.tubes.get(r.0).map(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, r: TubeRef) -> Option<&mut (dyn Tube + 'static)> {
        self.tubes.get_mut(r.0).map(|t| t.as_mut())
    }

    pub fn names(&self) -> Vec<String> {
        self.tubes.iter().map(|t| t.name().to_string()).collect()
    }

    /// Copy the whole line for another fiber.
    pub fn copy(&self) -> Tubeline {
        self.copy_from(TubeRef(0))
    }

    /// Copy the tubes from `start` on into a new line whose head is the
    /// copy of `start`.
    pub fn copy_from(&self, start: TubeRef) -> Tubeline {
        let cloner = TubeCloner::new(self.tubes.len(), start.0);
        Tubeline {
            tubes: self
                .tubes
                .iter()
                .skip(start.0)
                .map(|t| t.copy(&cloner))
                .collect(),
        }
    }

    pub fn pre_destroy(&mut self) {
        for tube in &mut self.tubes {
            tube.pre_destroy();
        }
    }
}

impl fmt::Debug for Tubeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Template line plus copies ready for reuse.
pub struct TubelinePool {
    template: Tubeline,
    idle: Mutex<Vec<Tubeline>>,
    capacity: usize,
}

impl TubelinePool {
    pub fn new(template: Tubeline, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            template,
            idle: Mutex::new(Vec::new()),
            capacity,
        })
    }

    /// A line for exclusive use by one fiber.
    pub fn take(&self) -> Tubeline {
        self.idle.lock().pop().unwrap_or_else(|| self.template.copy())
    }

    /// Give a line back after its fiber completed.
    pub fn recycle(&self, mut line: Tubeline) {
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(line);
        } else {
            drop(idle);
            line.pre_destroy();
        }
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn template(&self) -> &Tubeline {
        &self.template
    }
}

impl fmt::Debug for TubelinePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TubelinePool")
            .field("template", &self.template)
            .field("idle", &self.idle())
            .finish()
    }
}

/// Terminal tube built from a closure; handy for tests and simple endpoints.
pub struct FnTube<F> {
    name: String,
    f: Arc<F>,
}

impl<F> FnTube<F>
where
    F: Fn(Packet) -> Result<Packet> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl<F> Tube for FnTube<F>
where
    F: Fn(Packet) -> Result<Packet> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_request(&mut self, packet: Packet) -> NextAction {
        match (self.f)(packet) {
            Ok(p) => NextAction::Return(p),
            Err(e) => NextAction::Throw(e),
        }
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(Self {
            name: self.name.clone(),
            f: self.f.clone(),
        })
    }
}
