/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field automatically so callers never need
/// to remember the string literal. Domains in use: `sys` (lifecycle), `conn`
/// (ingest connections), `pipe` (the processing pipeline), `pub`
/// (publishing/delivery), `conf` (configuration), `res` (resources:
/// mirrors, sweeps, metrics).
///
/// # Usage
///
/// ```ignore
/// use crate::log_macros::*;
///
/// ar_info!(sys, receivers = 2, routes = 5, "relay bootstrap complete");
/// ar_warn!(pub, target = %name, error = %e, "delivery failed");
/// ar_debug!(conn, peer = %peer, "accepted connection");
/// ```
///
/// The macros accept any tracing-compatible field syntax after the domain
/// identifier. The domain identifier is **not** a string — it is a bare
/// identifier that the macro converts to a `&str` literal.

// ---------------------------------------------------------------------------
// Core macro — dispatches to the matching tracing level macro.
// ---------------------------------------------------------------------------

/// Internal helper. Do not call directly; use `ar_error!` … `ar_trace!`.
#[doc(hidden)]
macro_rules! ar_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

// ---------------------------------------------------------------------------
// Public per-level macros
// ---------------------------------------------------------------------------

/// Log at ERROR level with an automatic `domain` field.
macro_rules! ar_error {
    ($domain:ident, $($rest:tt)*) => {
        ar_log!(error, $domain, $($rest)*)
    };
}

/// Log at WARN level with an automatic `domain` field.
macro_rules! ar_warn {
    ($domain:ident, $($rest:tt)*) => {
        ar_log!(warn, $domain, $($rest)*)
    };
}

/// Log at INFO level with an automatic `domain` field.
macro_rules! ar_info {
    ($domain:ident, $($rest:tt)*) => {
        ar_log!(info, $domain, $($rest)*)
    };
}

/// Log at DEBUG level with an automatic `domain` field.
macro_rules! ar_debug {
    ($domain:ident, $($rest:tt)*) => {
        ar_log!(debug, $domain, $($rest)*)
    };
}

/// Log at TRACE level with an automatic `domain` field.
#[allow(unused_macros)]
macro_rules! ar_trace {
    ($domain:ident, $($rest:tt)*) => {
        ar_log!(trace, $domain, $($rest)*)
    };
}
