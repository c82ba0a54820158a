//! Approval signals
//!
//! External systems resolve a suspended run by delivering an
//! [`ApprovalSignal`]. Delivery is push-based; the runner never polls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The human's verdict on a pending approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// An approval resolution delivered to a waiting run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSignal {
    pub decision: ApprovalDecision,

    /// Identifier of the approver (email or user id)
    pub approved_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    pub sent_at: DateTime<Utc>,
}

impl ApprovalSignal {
    pub fn approve(approved_by: impl Into<String>) -> Self {
        Self {
            decision: ApprovalDecision::Approved,
            approved_by: approved_by.into(),
            comment: None,
            sent_at: Utc::now(),
        }
    }

    pub fn reject(approved_by: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            decision: ApprovalDecision::Rejected,
            approved_by: approved_by.into(),
            comment: Some(comment.into()),
            sent_at: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.decision == ApprovalDecision::Approved
    }
}
