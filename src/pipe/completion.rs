//! One-shot rendezvous between a suspended fiber and whoever resumes it.
//!
//! The tube that suspends hands the [`Completion`] to its deferred work and
//! returns the [`Suspension`] to the fiber. Completing consumes the sender,
//! so a fiber is resumed at most once; a result delivered before the fiber
//! starts waiting is picked up by the non-blocking check in
//! [`Suspension::try_take`].

use crate::error::{Result, SoapError};
use crate::packet::Packet;
use std::fmt;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Sending half: resumes the fiber.
pub struct Completion {
    tx: oneshot::Sender<Result<Packet>>,
}

impl Completion {
    /// Resume with a response packet.
    pub fn resume(self, packet: Packet) {
        self.complete(Ok(packet));
    }

    /// Resume with an error, unwound through the earlier tubes.
    pub fn resume_with_error(self, error: SoapError) {
        self.complete(Err(error));
    }

    pub fn complete(self, result: Result<Packet>) {
        // The fiber is gone when the receiver was dropped; nothing to do.
        let _ = self.tx.send(result);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Receiving half: what a fiber parks on.
pub struct Suspension {
    rx: oneshot::Receiver<Result<Packet>>,
}

impl Suspension {
    /// The result if it has already been delivered.
    pub fn try_take(&mut self) -> Option<Result<Packet>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(abandoned())),
        }
    }

    /// Wait for the result.
    pub async fn wait(mut self) -> Result<Packet> {
        if let Some(result) = self.try_take() {
            return result;
        }
        self.rx.await.unwrap_or_else(|_| Err(abandoned()))
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension").finish()
    }
}

fn abandoned() -> SoapError {
    SoapError::Pipeline("suspended fiber was abandoned without a result".to_string())
}

/// A connected completion/suspension pair.
pub fn completion_channel() -> (Completion, Suspension) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx }, Suspension { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_result_before_wait() {
        let (completion, mut suspension) = completion_channel();
        completion.resume(Packet::new(None));
        assert!(matches!(suspension.try_take(), Some(Ok(_))));
    }

    #[tokio::test]
    async fn test_result_after_wait() {
        let (completion, suspension) = completion_channel();
        let waiter = tokio::spawn(suspension.wait());
        tokio::task::yield_now().await;
        completion.resume_with_error(SoapError::Pipeline("boom".to_string()));
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(SoapError::Pipeline(m)) if m == "boom"));
    }

    #[tokio::test]
    async fn test_dropped_completion() {
        let (completion, suspension) = completion_channel();
        drop(completion);
        assert!(matches!(suspension.wait().await, Err(SoapError::Pipeline(_))));
    }
}
