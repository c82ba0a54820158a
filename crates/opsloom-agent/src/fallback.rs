//! Deterministic fallback computation
//!
//! The fallback is a first-class, independently callable computation of
//! the same task the reasoning loop attempts (e.g. straight-line
//! matching over the raw input rows). The loop is an optional
//! accelerator layered on top of it, never the sole path to a result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Result of the deterministic computation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackReport {
    /// Rows the algorithm matched
    pub matched_count: u64,

    /// Total input rows considered
    pub total_rows: u64,

    /// Human-readable summary of what was computed
    pub summary: String,
}

impl FallbackReport {
    /// Match percentage (0-100), only when input rows were present
    pub fn match_rate(&self) -> Option<u32> {
        if self.total_rows == 0 {
            return None;
        }
        Some(((self.matched_count * 100) / self.total_rows) as u32)
    }
}

/// Deterministic, non-AI computation of the task
///
/// Implementations must be pure over the supplied input: identical
/// input always yields an identical report.
#[async_trait]
pub trait Fallback: Send + Sync {
    async fn compute(&self, input: &serde_json::Value) -> Result<FallbackReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_rate() {
        let report = FallbackReport {
            matched_count: 7,
            total_rows: 10,
            summary: "matched 7 of 10 rows".to_string(),
        };
        assert_eq!(report.match_rate(), Some(70));
    }

    #[test]
    fn test_match_rate_without_rows() {
        let report = FallbackReport {
            matched_count: 0,
            total_rows: 0,
            summary: "no input rows".to_string(),
        };
        assert_eq!(report.match_rate(), None);
    }
}
