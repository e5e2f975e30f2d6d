//! Error handling for graph and domain operations.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// The three error kinds the core can surface.
///
/// Everything else — malformed `builds-on:` tag suffixes, registering a
/// nested topic before its parent, repeated explorations of the same
/// content — is accepted silently: those cases either produce dangling
/// edges (tolerated) or are the append-only expected behavior.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A direct lookup by id found nothing, e.g. `access` on an
    /// exploration id that was never written.
    #[error("not found: {0}")]
    NotFound(String),

    /// I/O, connectivity, or transaction failure inside a backend.
    /// Propagated as-is; the domain layer never catches these.
    #[error("backend failure: {0}")]
    Backend(String),

    /// Property maps failed to encode/decode as JSON (SQLite backend).
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for GraphError {
    fn from(err: sqlx::Error) -> Self {
        GraphError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = GraphError::NotFound("Exploration abc".to_string());
        assert_eq!(err.to_string(), "not found: Exploration abc");
    }

    #[test]
    fn test_result_propagation() {
        fn inner() -> Result<()> {
            Err(GraphError::Backend("connection reset".to_string()))
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        assert!(matches!(outer(), Err(GraphError::Backend(_))));
    }

    #[test]
    fn test_serialization_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: GraphError = json_err.into();
        assert!(matches!(err, GraphError::Serialization(_)));
    }
}
