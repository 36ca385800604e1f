//! `process` crate — the abstract mailbox + registry shim.
//!
//! Named processes are plain `tokio` tasks; "sending" to a process delivers
//! an [`Envelope`] on its `mpsc` mailbox, "spawning" registers a task under
//! a unique name (used as a mutual-exclusion lock), and `cancel`/`terminate`
//! map to cooperative and non-cooperative shutdown respectively.

pub mod error;
pub mod mailbox;
pub mod registry;

pub use error::ProcessError;
pub use mailbox::{Cancelled, Envelope, Mailbox};
pub use registry::{Pid, Registry, ReplyReceiver};

/// Build the mailbox name of a workflow's driver process.
pub fn dataflow_mailbox(workflow_id: uuid::Uuid) -> String {
    format!("dataflow.{workflow_id}")
}

/// Build the reply-slot name for a node's yield rendezvous.
pub fn yield_reply_topic(node_id: uuid::Uuid) -> String {
    format!("yield_reply:{node_id}")
}

/// Build the broadcast topic name events for a workflow are published on.
pub fn dataflow_topic(workflow_id: uuid::Uuid) -> String {
    format!("dataflow:{workflow_id}")
}

/// Build the mailbox name an actor's own published events land on.
pub fn user_mailbox(actor_id: &str) -> String {
    format!("user.{actor_id}")
}
