use thiserror::Error;

/// Failure classes the engines distinguish when driving the admin site.
///
/// `LoginFailed`, `MissingField` and `OptionNotFound` abort the whole job;
/// item-level engines catch everything else, record it against the item and
/// move on to the next one.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Authentication against the store admin failed; nothing else can run.
    #[error("login to store '{store}' failed: {reason}")]
    LoginFailed { store: String, reason: String },

    /// A required request field was empty or absent.
    #[error("required field '{0}' is missing or empty")]
    MissingField(&'static str),

    /// No product option matched the requested option text.
    #[error("no option matching '{requested}' among {available:?}")]
    OptionNotFound {
        requested: String,
        available: Vec<String>,
    },

    /// The order affordance never appeared for a product search.
    #[error("no order control appeared for product '{0}'")]
    OrderControlMissing(String),

    /// Quantity must be at least 1.
    #[error("invalid quantity {0}, must be greater than zero")]
    InvalidQuantity(u32),

    /// The dispatcher received a pattern it does not know.
    #[error("unrecognized pattern '{0}'")]
    UnknownPattern(String),

    /// The pattern was known but its data did not match the variant's
    /// contract.
    #[error("invalid payload for '{pattern}': {reason}")]
    InvalidPayload { pattern: String, reason: String },
}

impl WorkerError {
    /// Whether this failure must abort the whole job rather than a single
    /// item.
    pub fn is_fatal_for_job(&self) -> bool {
        matches!(
            self,
            WorkerError::LoginFailed { .. } | WorkerError::MissingField(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_failure_is_job_fatal() {
        let err = WorkerError::LoginFailed {
            store: "onch".to_string(),
            reason: "bad credentials".to_string(),
        };
        assert!(err.is_fatal_for_job());
    }

    #[test]
    fn option_mismatch_is_item_scoped() {
        let err = WorkerError::OptionNotFound {
            requested: "red / L".to_string(),
            available: vec!["blue / M".to_string()],
        };
        assert!(!err.is_fatal_for_job());
    }
}
