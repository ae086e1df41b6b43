//! One-shot rendezvous between a room command's issuer and the room worker.
//!
//! Every command carries a [`Completion`]; the issuer keeps the matching
//! [`Acknowledgement`]. Fire-and-forget commands get an *absent* pair, where
//! every operation is a no-op, so both call styles share one code path.

use tokio::sync::oneshot;

use super::error::{Error, Result};

struct Handoff {
    result: Result<()>,
    taken: oneshot::Sender<()>,
}

/// Creates a linked completion/acknowledgement pair.
///
/// With `requested == false` both halves are absent.
pub(crate) fn acknowledgement(requested: bool) -> (Completion, Acknowledgement) {
    if !requested {
        return (Completion { tx: None }, Acknowledgement { rx: None });
    }
    let (tx, rx) = oneshot::channel();
    (Completion { tx: Some(tx) }, Acknowledgement { rx: Some(rx) })
}

/// Worker half: delivers the command's result exactly once.
pub(crate) struct Completion {
    tx: Option<oneshot::Sender<Handoff>>,
}

impl Completion {
    /// Hands `result` to the waiting issuer and suspends until it was taken.
    ///
    /// Returns immediately when no acknowledgement was requested or the
    /// issuer stopped waiting.
    pub(crate) async fn complete(self, result: Result<()>) {
        let Some(tx) = self.tx else {
            return;
        };
        let (taken, took) = oneshot::channel();
        if tx.send(Handoff { result, taken }).is_err() {
            return;
        }
        let _ = took.await;
    }
}

/// Issuer half: awaits the worker's result.
pub(crate) struct Acknowledgement {
    rx: Option<oneshot::Receiver<Handoff>>,
}

impl Acknowledgement {
    /// Waits for the result, then releases the channel.
    ///
    /// A worker that drops its [`Completion`] without completing it (the
    /// room was torn down) reads as [`Error::RoomClosed`].
    pub(crate) async fn wait(mut self) -> Result<()> {
        let Some(rx) = self.rx.take() else {
            return Ok(());
        };
        match rx.await {
            Ok(Handoff { result, taken }) => {
                let _ = taken.send(());
                result
            }
            Err(_) => Err(Error::RoomClosed),
        }
    }

    /// Releases the channel without waiting. Idempotent.
    pub(crate) fn close(&mut self) {
        self.rx.take();
    }
}
