//! Bootstrap for functions running under the bridge in blocking mode
//!
//! Blocking mode forwards every invocation, so no handler has to be
//! compiled in. Mirror mode needs the real handler and therefore a binary
//! that registers it and calls [`tether_aws::serve`] itself.

use tether_interceptor::HandlerRegistry;

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    tether_aws::serve(HandlerRegistry::new()).await
}
