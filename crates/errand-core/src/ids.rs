//! Identifier minting for the two correlation namespaces.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use uuid::Uuid;

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Mint a task id.
///
/// Ids order lexicographically by creation: a zero-padded millisecond
/// timestamp, a process-local sequence number (tie-break within the same
/// millisecond), then a random suffix for uniqueness under concurrent
/// producers. The lowest pending key is therefore the oldest task, which
/// is what makes the mailbox's dequeue strict FIFO.
pub fn task_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0);
    let seq = TASK_SEQ.fetch_add(1, Ordering::Relaxed) % 1_000_000;
    let entropy = Uuid::new_v4().simple().to_string();
    format!("{millis:015}-{seq:06}-{}", &entropy[..6])
}

/// Mint an approval request id: a short uuid prefix, the same shape the
/// chat transport carries in button callback data.
///
/// The namespace stays disjoint from task ids by construction (no
/// timestamp, no separators, different length), so a consumer can never
/// mistake one for the other.
pub fn request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
