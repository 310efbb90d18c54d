//! Error types for the session orchestrator

/// Session error type
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Discovery returned nothing to debug
    #[error("no functions discovered")]
    NoFunctions,

    /// Rediscovering the functions failed
    #[error("function discovery failed: {0}")]
    Discovery(String),

    /// File notifications could not be set up
    #[error("failed to watch sources: {0}")]
    Watch(#[from] notify::Error),
}

impl SessionError {
    /// Whether the session can keep running past this error
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Discovery(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SessionError::Discovery("stack not found".into()).is_transient());
        assert!(!SessionError::NoFunctions.is_transient());

        let watch = SessionError::from(notify::Error::generic("inotify watch limit reached"));
        assert!(!watch.is_transient());
        assert!(watch.to_string().starts_with("failed to watch sources"));
    }
}
