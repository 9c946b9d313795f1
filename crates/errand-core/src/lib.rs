//! errand-core
//!
//! Middleware that lets a remote operator and a local agent rendezvous over
//! a shared state store with no shared memory: a pending-task mailbox with
//! destructive FIFO dequeue, a single-slot busy lock, and a
//! correlation-id approval handshake. The scheduler daemon and the chat
//! transport both build on these contracts; everything here tolerates
//! interleaved access from at least two actors, so every read, write and
//! delete is attempt-and-check.

pub mod agent;
pub mod approval;
pub mod error;
pub mod ids;
pub mod lock;
pub mod mailbox;
pub mod notify;
pub mod poll;
pub mod store;

pub use agent::AgentEndpoint;
pub use approval::{ApprovalChannel, Verdict};
pub use error::StoreError;
pub use lock::BusyLock;
pub use mailbox::{Mailbox, TaskEntry};
pub use notify::{Notifier, NullNotifier};
pub use poll::poll_until;
pub use store::{FsStore, MemoryStore, StateStore};

/// Key prefix for pending task entries.
pub const TASK_PREFIX: &str = "task.";
/// Key prefix for approval verdict entries.
pub const APPROVAL_PREFIX: &str = "approval.";
/// Holds the id of the task the consumer currently owns.
pub const BUSY_KEY: &str = "busy";
/// Id of the task currently being dispatched or supervised.
pub const CURRENT_TASK_KEY: &str = "current";
/// Present while the scheduler is supervising a dispatched task.
pub const WAITING_KEY: &str = "waiting";
/// Completion signal written by the consumer's done report.
pub const DONE_KEY: &str = "done";
