use skyfsm_core::error::{CoreError, Severity};

/// Emit a `CoreError` through `tracing`, at the level its severity maps to,
/// tagged with the mission state, event and error kind.
pub fn log_core_error(err: &CoreError) {
    let (state, event) = err.transition_context().unwrap_or(("-", "-"));
    let kind = err.kind.label();
    match err.severity {
        Severity::Trace => tracing::trace!(state, event, kind, "{err}"),
        Severity::Debug => tracing::debug!(state, event, kind, "{err}"),
        Severity::Info => tracing::info!(state, event, kind, "{err}"),
        Severity::Warn => tracing::warn!(state, event, kind, "{err}"),
        Severity::Error | Severity::Fatal => tracing::error!(state, event, kind, "{err}"),
    }
}
