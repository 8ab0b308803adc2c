//! Logging macros for the scheduler with verbosity level control.
//!
//! Logging costs nothing when disabled (verbosity=0). Events go through
//! `tracing` under the `shift_schedule` target, so the host picks the
//! subscriber. Levels:
//! - 0: SILENT (nothing)
//! - 1: CHANGES (initialisation summary, rotation rounds, final liveness)
//! - 2: CHECKS (optimization passes, phase timings)
//! - 3: DEBUG (every accepted schedule change)

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log at CHANGES level (verbosity >= 1).
///
/// Used for: round summaries, window size transitions, final liveness.
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            ::tracing::info!(target: "shift_schedule", $($arg)*);
        }
    };
}

/// Log at CHECKS level (verbosity >= 2).
///
/// Used for: transitive closure optimization passes and timings.
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            ::tracing::debug!(target: "shift_schedule", $($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
///
/// Used for: individual schedule changes.
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            ::tracing::trace!(target: "shift_schedule", $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels_are_ordered() {
        assert!(VERBOSITY_SILENT < VERBOSITY_CHANGES);
        assert!(VERBOSITY_CHANGES < VERBOSITY_CHECKS);
        assert!(VERBOSITY_CHECKS < VERBOSITY_DEBUG);
    }

    #[test]
    fn test_log_macros_with_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            log_changes!(VERBOSITY_DEBUG, "round {} with {} changes", 1, 3);
            log_checks!(VERBOSITY_DEBUG, n_ops = 4, "closure built");
            log_debug!(VERBOSITY_DEBUG, "change {:?}", (0, 2, 1));
            log_changes!(VERBOSITY_SILENT, "never emitted");
        });
    }
}
