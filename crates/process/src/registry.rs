//! Name-registered process table: spawn/send/listen/cancel/terminate/lookup
//! over `tokio` tasks, modelling the abstract mailbox layer the orchestrator
//! and node runtime SDK are built on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mailbox::{Envelope, Mailbox};
use crate::ProcessError;

/// A handle to a spawned process. Opaque beyond what `cancel`/`terminate`
/// need; the underlying name also doubles as the process's registry key,
/// which is how uniqueness ("at most one driver per workflow") is enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pid(String);

impl Pid {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    sender: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// A one-shot reply slot, used for the yield/reply rendezvous
/// (`yield_reply:<node_id>`): registered before a request is sent, consumed
/// exactly once by whoever answers it.
pub struct ReplyReceiver {
    name: String,
    receiver: oneshot::Receiver<serde_json::Value>,
}

impl ReplyReceiver {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the reply arrives. `None` if the sender was dropped
    /// without ever replying (e.g. the driver crashed).
    pub async fn wait(self) -> Option<serde_json::Value> {
        self.receiver.await.ok()
    }
}

/// The process table. Cheap to clone — internally `Arc`-backed — so every
/// layer that needs to spawn, message, or reply to a process shares the same
/// table.
#[derive(Clone)]
pub struct Registry {
    processes: Arc<DashMap<String, Entry>>,
    replies: Arc<DashMap<String, oneshot::Sender<serde_json::Value>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self { processes: Arc::new(DashMap::new()), replies: Arc::new(DashMap::new()) }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished tasks are reaped lazily on the next lookup/send rather than
    /// self-removing, since a task can start running on another worker
    /// thread before `spawn` returns and would otherwise race the insert.
    fn is_alive(&self, name: &str) -> bool {
        let finished = match self.processes.get(name) {
            Some(entry) => entry.join.is_finished(),
            None => return false,
        };
        if finished {
            self.processes.remove(name);
            false
        } else {
            true
        }
    }

    /// Spawn `body` as a new named process. Fails if a live process is
    /// already registered under `name` — this is the mutual-exclusion lock
    /// the orchestrator relies on (`dataflow.<workflow_id>`).
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, body: F) -> Result<Pid, ProcessError>
    where
        F: FnOnce(Mailbox) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if self.is_alive(&name) {
            return Err(ProcessError::AlreadyRegistered(name));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mailbox = Mailbox::new(rx, cancel.clone());
        let join = tokio::spawn(body(mailbox));

        self.processes.insert(name.clone(), Entry { sender: tx, cancel, join });
        Ok(Pid(name))
    }

    /// Look up a live process by name.
    pub fn lookup(&self, name: &str) -> Option<Pid> {
        self.is_alive(name).then(|| Pid(name.to_string()))
    }

    /// Deliver an envelope to a named process's mailbox. `false` if no live
    /// process is registered under `name`, or its mailbox is closed.
    pub fn send(&self, name: &str, topic: impl Into<String>, payload: serde_json::Value) -> bool {
        if !self.is_alive(name) {
            return false;
        }
        match self.processes.get(name) {
            Some(entry) => entry.sender.send(Envelope::new(topic, payload)).is_ok(),
            None => false,
        }
    }

    /// Request cooperative cancellation and wait up to `timeout` for the
    /// process to finish on its own. Returns `true` if it finished in time.
    pub async fn cancel(&self, pid: &Pid, timeout: Duration) -> bool {
        let entry = match self.processes.remove(pid.name()) {
            Some((_, entry)) => entry,
            None => return false,
        };
        entry.cancel.cancel();
        tokio::time::timeout(timeout, entry.join).await.is_ok()
    }

    /// Hard-kill a process immediately, bypassing cooperative shutdown.
    pub fn terminate(&self, pid: &Pid) -> bool {
        match self.processes.remove(pid.name()) {
            Some((_, entry)) => {
                entry.join.abort();
                true
            }
            None => false,
        }
    }

    /// Register a one-shot reply slot under `name` (e.g.
    /// `yield_reply:<node_id>`), to be filled later by [`Registry::reply`].
    pub fn listen_for_reply(&self, name: impl Into<String>) -> ReplyReceiver {
        let name = name.into();
        let (tx, rx) = oneshot::channel();
        self.replies.insert(name.clone(), tx);
        ReplyReceiver { name, receiver: rx }
    }

    /// Answer a previously registered reply slot. `false` if nothing is
    /// listening under `name` (already answered, or never registered).
    pub fn reply(&self, name: &str, payload: serde_json::Value) -> bool {
        match self.replies.remove(name) {
            Some((_, tx)) => tx.send(payload).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_enforces_uniqueness_by_name() {
        let registry = Registry::new();
        let _pid = registry
            .spawn("dataflow.test", |mut mailbox: Mailbox| async move {
                let _ = mailbox.recv().await;
            })
            .unwrap();

        let second = registry.spawn("dataflow.test", |_mailbox: Mailbox| async move {});
        assert!(matches!(second, Err(ProcessError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn send_delivers_to_the_named_mailbox() {
        let registry = Registry::new();
        let (done_tx, done_rx) = oneshot::channel();
        registry
            .spawn("worker.1", move |mut mailbox: Mailbox| async move {
                let envelope = mailbox.recv().await.unwrap();
                done_tx.send(envelope.topic).unwrap();
            })
            .unwrap();

        assert!(registry.send("worker.1", "commit", serde_json::json!({})));
        let topic = tokio::time::timeout(Duration::from_secs(1), done_rx).await.unwrap().unwrap();
        assert_eq!(topic, "commit");
    }

    #[tokio::test]
    async fn reply_rendezvous_round_trips() {
        let registry = Registry::new();
        let receiver = registry.listen_for_reply("yield_reply:node-1");
        assert!(registry.reply("yield_reply:node-1", serde_json::json!({"ok": true})));
        let reply = receiver.wait().await.unwrap();
        assert_eq!(reply, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn cancel_signals_the_cancellation_token() {
        let registry = Registry::new();
        let pid = registry
            .spawn("dataflow.cancel-me", |mut mailbox: Mailbox| async move {
                let _ = mailbox.recv_or_cancelled().await;
            })
            .unwrap();

        let finished = registry.cancel(&pid, Duration::from_secs(1)).await;
        assert!(finished);
    }
}
