// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Structured logging for the remotefs workspace.
//!
//! Usage:
//! - Set REMOTEFS_LOG=off (default) - no logs
//! - Set REMOTEFS_LOG=error|warn - failures and retries
//! - Set REMOTEFS_LOG=info - reconciled outcomes
//! - Set REMOTEFS_LOG=debug - every mutation phase and request

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable holding the minimum level.
pub const LOG_ENV: &str = "REMOTEFS_LOG";

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Off,
    Min(emit::Level),
}

/// Parses a `REMOTEFS_LOG` value. Unknown values yield `None`.
#[must_use]
pub fn parse_verbosity(value: &str) -> Option<Verbosity> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Some(Verbosity::Off),
        "error" => Some(Verbosity::Min(emit::Level::Error)),
        "warn" => Some(Verbosity::Min(emit::Level::Warn)),
        "info" => Some(Verbosity::Min(emit::Level::Info)),
        "debug" => Some(Verbosity::Min(emit::Level::Debug)),
        _ => None,
    }
}

/// Initialize diagnostics from `REMOTEFS_LOG`.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV).unwrap_or_default();
        let parsed = parse_verbosity(&raw);
        let level = match parsed {
            Some(Verbosity::Off) => return,
            Some(Verbosity::Min(level)) => level,
            None => emit::Level::Info,
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();
        if parsed.is_none() {
            emit::warn!("Unknown {var} value {value}, using info", var: LOG_ENV, value: raw.as_str());
        }

        // The runtime must outlive every emitting thread.
        std::mem::forget(rt);
    });
}

/// Operations worth seeing in normal use, e.g. "Rename reconciled as applied".
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Per-request detail and mutation phase changes.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Recoverable trouble: retries, unconfirmed visibility.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Failures the caller will see, such as an exhausted retry budget.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
