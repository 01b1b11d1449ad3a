//! Drives one packet through a tubeline.

use super::tube::{NextAction, TubeRef, Tubeline};
use crate::error::{Result, SoapError};
use crate::packet::Packet;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Fiber lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Running,
    Suspended,
    Completed,
}

impl FiberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
        }
    }
}

enum Flow {
    Request(TubeRef, Packet),
    Response(Packet),
    Exception(SoapError),
}

/// One in-flight invocation over its own copy of a tubeline.
pub struct Fiber {
    id: u64,
    line: Tubeline,
    state: Arc<Mutex<FiberState>>,
}

impl Fiber {
    pub fn new(line: Tubeline) -> Self {
        Self {
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            line,
            state: Arc::new(Mutex::new(FiberState::Running)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> FiberState {
        *self.state.lock()
    }

    /// Shared view of the state for observers outside the fiber's task.
    pub fn state_handle(&self) -> Arc<Mutex<FiberState>> {
        self.state.clone()
    }

    /// Give the line back, e.g. to a pool.
    pub fn into_line(self) -> Tubeline {
        self.line
    }

    fn set_state(&self, state: FiberState) {
        *self.state.lock() = state;
    }

    /// Run `packet` through the line: requests head to tail, then responses
    /// (or exceptions) back through every tube that passed the request on.
    pub async fn run(&mut self, packet: Packet) -> Result<Packet> {
        self.set_state(FiberState::Running);
        let mut stack: Vec<TubeRef> = Vec::with_capacity(self.line.len());
        let mut flow = match self.line.head() {
            Some(head) => Flow::Request(head, packet),
            None => Flow::Response(packet),
        };

        let result = loop {
            flow = match flow {
                Flow::Request(at, packet) => {
                    let tube = match self.line.get_mut(at) {
                        Some(t) => t,
                        None => break Err(self.missing(at)),
                    };
                    let action = tube.process_request(packet).await;
                    debug!(fiber = self.id, tube = %tube.name(), action = action.name(), "Request processed");
                    match action {
                        NextAction::Invoke(p) => {
                            stack.push(at);
                            match self.line.next(at) {
                                Some(next) => Flow::Request(next, p),
                                None => Flow::Exception(SoapError::Pipeline(format!(
                                    "tube {} invoked past the end of the line",
                                    at.index()
                                ))),
                            }
                        }
                        NextAction::InvokeAt(target, p) if target > at => {
                            stack.push(at);
                            Flow::Request(target, p)
                        }
                        NextAction::InvokeAt(target, _) => Flow::Exception(SoapError::Pipeline(
                            format!("tube {} cannot invoke earlier tube {}", at.index(), target.index()),
                        )),
                        NextAction::InvokeAndForget(p) => match self.line.next(at) {
                            Some(next) => Flow::Request(next, p),
                            None => Flow::Response(p),
                        },
                        NextAction::Return(p) => Flow::Response(p),
                        NextAction::Throw(e) => Flow::Exception(e),
                        NextAction::Suspend(s) => self.suspend(s).await,
                    }
                }
                Flow::Response(packet) => {
                    let at = match stack.pop() {
                        Some(at) => at,
                        None => break Ok(packet),
                    };
                    let tube = match self.line.get_mut(at) {
                        Some(t) => t,
                        None => break Err(self.missing(at)),
                    };
                    let action = tube.process_response(packet).await;
                    self.unwind_step(action).await
                }
                Flow::Exception(error) => {
                    let at = match stack.pop() {
                        Some(at) => at,
                        None => break Err(error),
                    };
                    let tube = match self.line.get_mut(at) {
                        Some(t) => t,
                        None => break Err(self.missing(at)),
                    };
                    let action = tube.process_exception(error).await;
                    self.unwind_step(action).await
                }
            };
        };

        self.set_state(FiberState::Completed);
        if let Err(e) = &result {
            debug!(fiber = self.id, error_kind = e.kind().as_str(), "Fiber completed with error");
        }
        result
    }

    /// Next flow for an action returned while unwinding.
    async fn unwind_step(&self, action: NextAction) -> Flow {
        match action {
            NextAction::Return(p) => Flow::Response(p),
            NextAction::Throw(e) => Flow::Exception(e),
            NextAction::Suspend(s) => self.suspend(s).await,
            other => {
                warn!(fiber = self.id, action = other.name(), "Forward action while unwinding");
                Flow::Exception(SoapError::Pipeline(format!(
                    "{} is not allowed while processing a response",
                    other.name()
                )))
            }
        }
    }

    async fn suspend(&self, mut suspension: super::completion::Suspension) -> Flow {
        // An answer that arrived before we got here never parks the fiber.
        let result = match suspension.try_take() {
            Some(result) => result,
            None => {
                self.set_state(FiberState::Suspended);
                debug!(fiber = self.id, "Fiber suspended");
                let result = suspension.wait().await;
                self.set_state(FiberState::Running);
                debug!(fiber = self.id, "Fiber resumed");
                result
            }
        };
        match result {
            Ok(p) => Flow::Response(p),
            Err(e) => Flow::Exception(e),
        }
    }

    fn missing(&self, at: TubeRef) -> SoapError {
        SoapError::Pipeline(format!("fiber {} has no tube {}", self.id, at.index()))
    }

    /// Run on a new task and hand the result to `callback`. The line is
    /// returned with the result so it can be pooled again.
    pub fn start<F>(mut self, packet: Packet, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Result<Packet>, Tubeline) + Send + 'static,
    {
        tokio::spawn(async move {
            let result = self.run(packet).await;
            callback(result, self.into_line());
        })
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state().as_str())
            .field("line", &self.line)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::completion::completion_channel;
    use crate::pipe::tube::{FnTube, Tube, TubeCloner};
    use async_trait::async_trait;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        index: usize,
        log: Log,
        turn_around: bool,
    }

    #[async_trait]
    impl Tube for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn process_request(&mut self, packet: Packet) -> NextAction {
            self.log.lock().push(format!("req{}", self.index));
            if self.turn_around {
                NextAction::Return(packet)
            } else {
                NextAction::Invoke(packet)
            }
        }

        async fn process_response(&mut self, packet: Packet) -> NextAction {
            self.log.lock().push(format!("resp{}", self.index));
            NextAction::Return(packet)
        }

        async fn process_exception(&mut self, error: SoapError) -> NextAction {
            self.log.lock().push(format!("exc{}", self.index));
            NextAction::Throw(error)
        }

        fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
            Box::new(Recorder {
                index: self.index,
                log: self.log.clone(),
                turn_around: self.turn_around,
            })
        }
    }

    fn line(log: &Log, n: usize, turn_at: Option<usize>) -> Tubeline {
        let mut line = Tubeline::new();
        for i in 0..n {
            line.push(Box::new(Recorder {
                index: i,
                log: log.clone(),
                turn_around: turn_at == Some(i),
            }));
        }
        line.push(Box::new(FnTube::new("end", Ok)));
        line
    }

    #[tokio::test]
    async fn test_request_and_response_order() {
        let log = Log::default();
        let mut fiber = Fiber::new(line(&log, 3, None));
        fiber.run(Packet::new(None)).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["req0", "req1", "req2", "resp2", "resp1", "resp0"]
        );
        assert_eq!(fiber.state(), FiberState::Completed);
    }

    #[tokio::test]
    async fn test_return_turns_around() {
        let log = Log::default();
        let mut fiber = Fiber::new(line(&log, 4, Some(2)));
        fiber.run(Packet::new(None)).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["req0", "req1", "req2", "resp1", "resp0"]
        );
    }

    #[tokio::test]
    async fn test_exception_unwinds() {
        let log = Log::default();
        let mut line = Tubeline::new();
        for i in 0..2 {
            line.push(Box::new(Recorder {
                index: i,
                log: log.clone(),
                turn_around: false,
            }));
        }
        line.push(Box::new(FnTube::new("fail", |_| {
            Err(SoapError::Pipeline("terminal failed".to_string()))
        })));
        let mut fiber = Fiber::new(line);
        let err = fiber.run(Packet::new(None)).await.unwrap_err();
        assert!(matches!(err, SoapError::Pipeline(_)));
        assert_eq!(*log.lock(), vec!["req0", "req1", "exc1", "exc0"]);
    }

    struct Suspender {
        early: bool,
    }

    #[async_trait]
    impl Tube for Suspender {
        fn name(&self) -> &str {
            "suspender"
        }

        async fn process_request(&mut self, mut packet: Packet) -> NextAction {
            let (completion, suspension) = completion_channel();
            packet.put("resumed", true).ok();
            if self.early {
                completion.resume(packet);
            } else {
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    completion.resume(packet);
                });
            }
            NextAction::Suspend(suspension)
        }

        fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
            Box::new(Suspender { early: self.early })
        }
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        for early in [true, false] {
            let log = Log::default();
            let mut line = Tubeline::new();
            line.push(Box::new(Recorder {
                index: 0,
                log: log.clone(),
                turn_around: false,
            }));
            line.push(Box::new(Suspender { early }));
            let mut fiber = Fiber::new(line);
            let response = fiber.run(Packet::new(None)).await.unwrap();
            assert_eq!(response.property_bool("resumed"), Some(true));
            assert_eq!(*log.lock(), vec!["req0", "resp0"]);
        }
    }

    #[tokio::test]
    async fn test_start_with_callback() {
        let log = Log::default();
        let fiber = Fiber::new(line(&log, 1, None));
        let (tx, rx) = tokio::sync::oneshot::channel();
        fiber
            .start(Packet::new(None), move |result, line| {
                let _ = tx.send((result.is_ok(), line.len()));
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), (true, 2));
    }
}
