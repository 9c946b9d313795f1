//! Request/response rendezvous for human go/no-go decisions.
//!
//! The transport is store-and-forward text with no native correlation, so
//! the request id rides out in the notification's button metadata and
//! comes back as the key of a verdict entry written by the decision
//! recorder.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::ids;
use crate::notify::Notifier;
use crate::poll::poll_until;
use crate::store::StateStore;
use crate::APPROVAL_PREFIX;

/// Default bound on how long a consumer waits for a human decision.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_VERDICT_POLL: Duration = Duration::from_secs(1);

/// The operator's decision on an approval request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Approved => "APPROVED",
            Verdict::Rejected => "REJECTED",
        }
    }

    /// Anything that is not an explicit approval counts as rejection.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes == b"APPROVED" {
            Verdict::Approved
        } else {
            Verdict::Rejected
        }
    }

    pub fn is_approved(self) -> bool {
        matches!(self, Verdict::Approved)
    }
}

/// Correlation-id-keyed approval handshake over the shared store.
#[derive(Clone)]
pub struct ApprovalChannel {
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    verdict_poll: Duration,
}

impl ApprovalChannel {
    pub fn new(store: Arc<dyn StateStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            verdict_poll: DEFAULT_VERDICT_POLL,
        }
    }

    /// Override the verdict polling cadence (mainly for tests).
    pub fn with_verdict_poll(mut self, interval: Duration) -> Self {
        self.verdict_poll = interval;
        self
    }

    fn key_for(request_id: &str) -> String {
        format!("{APPROVAL_PREFIX}{request_id}")
    }

    /// Ask the operator for a go/no-go and block until they answer or the
    /// deadline passes. Timeouts and transport failures both come back as
    /// `Rejected`, the safe default; "no answer" is never an error.
    ///
    /// The verdict entry is consumed on read so a stale decision can never
    /// leak into a later request.
    pub async fn request(
        &self,
        question: &str,
        parent_task_id: Option<&str>,
        timeout: Duration,
    ) -> Verdict {
        let request_id = ids::request_id();
        let tag = parent_task_id
            .map(|id| format!(" `{id}`"))
            .unwrap_or_default();
        let text = format!("⚠️ *Approval needed*{tag}\n\n{question}");

        if !self.notifier.send_with_choice(&text, &request_id).await {
            warn!(%request_id, "approval request could not be delivered; rejecting");
            return Verdict::Rejected;
        }
        debug!(%request_id, "approval request sent; waiting for verdict");

        let key = Self::key_for(&request_id);
        let verdict = poll_until(self.verdict_poll, Some(timeout), || async {
            match self.store.take(&key).await {
                Ok(Some(bytes)) => Some(Verdict::from_bytes(&bytes)),
                Ok(None) => None,
                Err(err) => {
                    warn!(%request_id, error = %err, "verdict read failed; retrying");
                    None
                }
            }
        })
        .await;

        match verdict {
            Some(verdict) => {
                debug!(%request_id, verdict = verdict.as_str(), "approval resolved");
                verdict
            }
            None => {
                warn!(%request_id, "approval request timed out; rejecting");
                Verdict::Rejected
            }
        }
    }

    /// Record the operator's decision. Resolving the same id twice is
    /// last-write-wins; the request side reads at most one verdict anyway.
    pub async fn resolve(&self, request_id: &str, verdict: Verdict) -> Result<(), StoreError> {
        self.store
            .put(&Self::key_for(request_id), verdict.as_str().as_bytes())
            .await
    }
}
