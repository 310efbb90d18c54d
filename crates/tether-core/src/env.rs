//! Environment variable names shared by the cloud and local sides
//!
//! The reconciler injects these into an intercepted function; the
//! interceptor reads them back at cold start.

/// Function id of the intercepted function
pub const FUNCTION_ID: &str = "TETHER_FUNCTION_ID";
/// Session id the function reports to
pub const SESSION_ID: &str = "TETHER_SESSION_ID";
/// Timeout configured before the bridge attached, or `-1`
pub const INITIAL_TIMEOUT: &str = "TETHER_INITIAL_TIMEOUT";
/// `true` when the function runs in mirror mode
pub const MIRROR_MODE: &str = "TETHER_MIRROR_MODE";
/// Minimum milliseconds between two mirrored publishes
pub const MIRROR_INTERVAL: &str = "TETHER_MIRROR_INTERVAL";
/// Milliseconds a blocking call waits for the developer machine
pub const FALLBACK_TIMEOUT: &str = "TETHER_FALLBACK_TIMEOUT";
/// `true` for verbose logging on the cloud side
pub const VERBOSE: &str = "TETHER_VERBOSE";
/// Execution wrapper the platform runs before the handler
pub const EXEC_WRAPPER: &str = "AWS_LAMBDA_EXEC_WRAPPER";
/// Wrapper that was configured before the bridge attached
pub const PREVIOUS_WRAPPER: &str = "TETHER_PREVIOUS_WRAPPER";
/// Original handler name, restored for chained wrappers
pub const ORIGINAL_HANDLER: &str = "TETHER_ORIGINAL_HANDLER";
/// Handler variable the platform and wrappers agree on
pub const PLATFORM_HANDLER: &str = "_HANDLER";
/// Marker set for local execution
pub const IS_LOCAL: &str = "IS_LOCAL";
/// Absolute project root for local execution
pub const LOCAL_PROJECT_DIR: &str = "LOCAL_PROJECT_DIR";

/// Path of the wrapper script shipped in the bridge layer
pub const WRAPPER_PATH: &str = "/opt/tether-wrapper";

/// Variables owned by the bridge, removed again on detach
pub const INJECTED: &[&str] = &[
    FUNCTION_ID,
    SESSION_ID,
    INITIAL_TIMEOUT,
    MIRROR_MODE,
    MIRROR_INTERVAL,
    FALLBACK_TIMEOUT,
    VERBOSE,
    EXEC_WRAPPER,
    PREVIOUS_WRAPPER,
];

/// Parse a `true`/`false` flag value
#[inline]
#[must_use]
pub fn flag(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v.eq_ignore_ascii_case("true"))
}
