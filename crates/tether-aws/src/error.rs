//! Error types for the cloud adapters

/// Cloud adapter error type
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    /// No region was configured and none could be resolved
    #[error("no region configured; set `region` in the tether config or AWS_REGION")]
    NoRegion,

    /// The resolved configuration carries no credentials provider
    #[error("no credentials provider could be resolved")]
    NoCredentials,

    /// A function entry point failed to start
    #[error("function entry point failed: {0}")]
    Entry(#[from] tether_interceptor::InterceptorError),
}
