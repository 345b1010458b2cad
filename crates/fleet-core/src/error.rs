//! Error types for cluster spec loading.

use thiserror::Error;

/// Errors produced while loading a cluster spec. Always fatal: the
/// control loop refuses to start on a bad spec.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to read cluster spec: {0}")]
    Read(String),

    #[error("failed to parse cluster spec: {0}")]
    Parse(String),

    #[error("invalid cluster spec: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ValidationError {
    /// The individual problems found, one per offending field.
    pub fn problems(&self) -> Vec<String> {
        match self {
            ValidationError::Invalid(problems) => problems.clone(),
            other => vec![other.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_lists_every_problem() {
        let err = ValidationError::Invalid(vec![
            "min_workers (5) exceeds max_workers (2)".to_string(),
            "idle_timeout_minutes must be > 0".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("min_workers"));
        assert!(msg.contains("idle_timeout_minutes"));
        assert_eq!(err.problems().len(), 2);
    }
}
