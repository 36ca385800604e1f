//! The envelope and receiver half of a named process's inbox.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A single message delivered to a process's mailbox. `topic` is an
/// application-level discriminator (`"commit"`, `"yield_request"`,
/// `"dataflow:<id>"`, `"user.<actor_id>"`, …); `payload` is caller-defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { topic: topic.into(), payload }
    }
}

/// The receiving half of a process's inbox, handed to the process body when
/// it is spawned. Also carries the cancellation token so the process body
/// can select between `recv()` and cooperative cancellation without a
/// separate channel.
pub struct Mailbox {
    receiver: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
}

impl Mailbox {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Envelope>, cancel: CancellationToken) -> Self {
        Self { receiver, cancel }
    }

    /// Wait for the next message. Returns `None` once every sender (every
    /// `Process` handle referencing this mailbox) has been dropped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Wait for either the next message or a cancel signal, whichever comes
    /// first. `Ok(None)` distinguishes "cancelled" from "channel closed"
    /// (`Err`).
    pub async fn recv_or_cancelled(&mut self) -> Result<Option<Envelope>, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            msg = self.receiver.recv() => Ok(msg),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Marker returned by [`Mailbox::recv_or_cancelled`] when the cancel signal
/// fired before a message arrived.
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;
