//! Read-only mode gate for classified statements

use serde::{Deserialize, Serialize};
use strata_core::{Result, StrataError};

/// How a statement was classified by the caller's SQL identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Listing,
    Information,
    Modification,
    Unknown,
}

impl ExecutionType {
    /// Only listings and information queries run in read-only mode
    pub fn is_read_only(&self) -> bool {
        matches!(self, ExecutionType::Listing | ExecutionType::Information)
    }
}

/// A statement together with its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedStatement {
    #[serde(default)]
    pub text: String,
    pub execution_type: ExecutionType,
}

pub fn is_allowed_read_only_query(statements: &[IdentifiedStatement], read_only_mode: bool) -> bool {
    !read_only_mode || statements.iter().all(|s| s.execution_type.is_read_only())
}

/// Fail with [`StrataError::ReadOnlyViolation`] when the batch would write in
/// read-only mode.
pub fn ensure_read_only_allowed(
    statements: &[IdentifiedStatement],
    read_only_mode: bool,
) -> Result<()> {
    if is_allowed_read_only_query(statements, read_only_mode) {
        Ok(())
    } else {
        tracing::warn!(
            statements = statements.len(),
            "rejected write statements in read-only mode"
        );
        Err(StrataError::ReadOnlyViolation)
    }
}
