//! Admission outcomes handed back to route handlers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::policy::PolicyKey;

/// Quota state after evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests still available in the current window
    pub remaining: u32,
    /// When the oldest counted request leaves the window
    pub reset_at: DateTime<Utc>,
    /// Configured limit of the tier that judged the request
    pub limit: u32,
    /// Tier that judged the request
    pub policy: PolicyKey,
}

impl AdmissionDecision {
    /// `reset_at` as Unix epoch seconds, rounded up so callers never retry early.
    pub fn reset_epoch_secs(&self) -> i64 {
        let secs = self.reset_at.timestamp();
        if self.reset_at.timestamp_subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Whole seconds until `reset_at`, never less than one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Outcome of [`AdmissionController::evaluate`](super::AdmissionController::evaluate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The request is within quota
    Admitted(AdmissionDecision),
    /// The caller has exhausted its quota for this window
    Throttled(AdmissionDecision),
    /// A strict tier could not establish who the caller is
    Unidentified { policy: PolicyKey, limit: u32 },
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Admitted(_))
    }

    /// Quota metadata, absent when the caller was never counted.
    pub fn decision(&self) -> Option<&AdmissionDecision> {
        match self {
            Verdict::Admitted(decision) | Verdict::Throttled(decision) => Some(decision),
            Verdict::Unidentified { .. } => None,
        }
    }

    /// Tier that produced this verdict.
    pub fn policy(&self) -> PolicyKey {
        match self {
            Verdict::Admitted(decision) | Verdict::Throttled(decision) => decision.policy,
            Verdict::Unidentified { policy, .. } => *policy,
        }
    }
}
