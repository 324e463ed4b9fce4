//! ---
//! ct_section: "03-logging"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Structured logging context and sweep events."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
/// Emit an informational log enriched with device context.
#[macro_export]
macro_rules! power_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            device = ctx.device.unwrap_or(""),
            address = %ctx.address_hex(),
            sweep = ctx.sweep.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::power_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a warning enriched with device context.
#[macro_export]
macro_rules! power_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            device = ctx.device.unwrap_or(""),
            address = %ctx.address_hex(),
            sweep = ctx.sweep.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::power_warn!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a debug log enriched with device context.
#[macro_export]
macro_rules! power_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            device = ctx.device.unwrap_or(""),
            address = %ctx.address_hex(),
            sweep = ctx.sweep.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::power_debug!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
