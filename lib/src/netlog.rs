//! Firmware logging subsystem.
//!
//! All log output funnels through a single **backend** function pointer.  A
//! headless board has no console until its support code brings one up (UART,
//! RTT, semihosting, ...), so before a backend is registered every log line is
//! discarded.  Registration happens once, through a [`spin::Once`], and cannot
//! be undone — the backend outlives the stack.
//!
//! # Backend contract
//!
//! The backend receives the pre-formatted arguments for a **single log line**
//! and is responsible for:
//!
//! 1. Writing the formatted text atomically with respect to interrupt
//!    handlers that may also log.
//! 2. Appending a trailing newline after the text.
//!
//! # Registration
//!
//! ```ignore
//! // In your board support init:
//! leafnet_lib::netlog::netlog_register_backend(my_backend_fn);
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Once;

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl NetlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => NetlogLevel::Error,
            1 => NetlogLevel::Warn,
            2 => NetlogLevel::Info,
            _ => NetlogLevel::Debug,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(NetlogLevel::Info as u8);

#[inline(always)]
fn is_enabled(level: NetlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Backend dispatch
// ---------------------------------------------------------------------------

/// Signature of a netlog backend.
///
/// The backend must write the formatted text **and** a trailing newline under
/// whatever locking its transport needs so that lines do not interleave.
pub type NetlogBackend = fn(fmt::Arguments<'_>);

static BACKEND: Once<NetlogBackend> = Once::new();

/// Dispatch a log line through the registered backend, if any.
#[inline]
fn dispatch(args: fmt::Arguments<'_>) {
    if let Some(backend) = BACKEND.get() {
        backend(args);
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Register the output backend.  Only the first call takes effect.
pub fn netlog_register_backend(backend: NetlogBackend) {
    BACKEND.call_once(|| backend);
}

pub fn netlog_set_level(level: NetlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn netlog_get_level() -> NetlogLevel {
    NetlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

pub fn netlog_is_enabled(level: NetlogLevel) -> bool {
    is_enabled(level)
}

/// Emit a formatted log line at the given level.
///
/// The backend appends a trailing newline — callers should **not** include
/// one in their format string.
pub fn log_args(level: NetlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    dispatch(args);
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! netlog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::netlog::log_args($level, ::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! netlog_error {
    ($($arg:tt)*) => {
        $crate::netlog::log_args($crate::netlog::NetlogLevel::Error, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! netlog_warn {
    ($($arg:tt)*) => {
        $crate::netlog::log_args($crate::netlog::NetlogLevel::Warn, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! netlog_info {
    ($($arg:tt)*) => {
        $crate::netlog::log_args($crate::netlog::NetlogLevel::Info, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! netlog_debug {
    ($($arg:tt)*) => {
        $crate::netlog::log_args($crate::netlog::NetlogLevel::Debug, ::core::format_args!($($arg)*))
    };
}
