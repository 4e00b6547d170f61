// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::pipeline::run_pipeline;
use super::signal_handler_manager::reraise_default;
use super::stack_capture::capture_unsynchronized;
use super::symbolizer::InProcessResolver;
use crate::crash_info::SigInfo;
use crate::shared::configuration::CrashtraceConfiguration;
use libc::{c_void, siginfo_t};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8};

// Unlike a well-behaved signal handler, the reporting pipeline allocates, formats, writes files
// and talks to the network. Only the capture of raw return addresses is kept allocation free;
// everything after it is tolerated for its diagnostic value.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>

// Using mutexes inside a signal handler is not allowed, so use `AtomicPtr`
// instead to get atomicity.
// This should always be either: null_mut, or `Box::into_raw()`
static CONFIG: AtomicPtr<CrashtraceConfiguration> = AtomicPtr::new(ptr::null_mut());

static ENABLED: AtomicBool = AtomicBool::new(true);
static REPORTING: AtomicBool = AtomicBool::new(false);
static DISPATCH_STATE: AtomicU8 = AtomicU8::new(DispatchState::Uninstalled as u8);

// Tests touching the statics above must not interleave.
#[cfg(test)]
pub(crate) static GLOBAL_STATE_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[derive(Debug, thiserror::Error)]
pub enum CrashHandlerError {
    #[error("No crashtrace config available")]
    NoConfig,
    #[error("A crash report is already being produced")]
    Reentrant,
    #[error("Crash reporting failed: {0:#}")]
    Pipeline(anyhow::Error),
    #[error("Crash reporting panicked")]
    Panicked,
}

/// Where the dispatcher is in its lifecycle.
///
/// `Installed → Triggered → Reporting → Reraised`; `Reraised` is terminal for the process.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Uninstalled = 0,
    Installed = 1,
    Triggered = 2,
    Reporting = 3,
    Reraised = 4,
}

impl DispatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DispatchState::Installed,
            2 => DispatchState::Triggered,
            3 => DispatchState::Reporting,
            4 => DispatchState::Reraised,
            _ => DispatchState::Uninstalled,
        }
    }
}

pub fn dispatch_state() -> DispatchState {
    DispatchState::from_u8(DISPATCH_STATE.load(SeqCst))
}

pub(crate) fn set_dispatch_state(state: DispatchState) {
    DISPATCH_STATE.store(state as u8, SeqCst);
}

/// Updates the crashtrace config for this process.
/// Config is stored in a global variable and read by the handler when a crash occurs.
///
/// PRECONDITIONS:
///     None
/// SAFETY:
///     Crash-tracking functions are not guaranteed to be reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function uses a swap on an atomic pointer.
pub fn update_config(config: CrashtraceConfiguration) -> anyhow::Result<()> {
    let box_ptr = Box::into_raw(Box::new(config));
    let old = CONFIG.swap(box_ptr, SeqCst);
    if !old.is_null() {
        // Safety: This can only come from a box above.
        unsafe {
            std::mem::drop(Box::from_raw(old));
        }
    }
    Ok(())
}

/// Drops the stored config, if any.
pub(crate) fn clear_config() {
    let old = CONFIG.swap(ptr::null_mut(), SeqCst);
    if !old.is_null() {
        // Safety: This can only come from a box in `update_config`.
        unsafe {
            std::mem::drop(Box::from_raw(old));
        }
    }
}

/// Disables the crashtrace.
/// Handlers stay installed, but a fault goes straight to the default disposition without a
/// report.
///
/// # Atomicity
///   This function is atomic and idempotent.  Calling it multiple times is allowed.
pub fn disable() {
    ENABLED.store(false, SeqCst);
}

/// Enables the crashtrace, if had been previously disabled.
///
/// # Atomicity
///   This function is atomic and idempotent.  Calling it multiple times is allowed.
pub fn enable() {
    ENABLED.store(true, SeqCst);
}

pub fn is_enabled() -> bool {
    ENABLED.load(SeqCst)
}

pub(crate) extern "C" fn handle_posix_sigaction(
    signum: i32,
    _sig_info: *mut siginfo_t,
    _ucontext: *mut c_void,
) {
    set_dispatch_state(DispatchState::Triggered);
    if let Err(e) = handle_posix_signal_impl(signum) {
        let _ = writeln!(std::io::stderr(), "crashtrace: {e}");
    }
    // Whatever happened above, the fault must still end the process.
    set_dispatch_state(DispatchState::Reraised);
    reraise_default(signum);
}

fn handle_posix_signal_impl(signum: i32) -> Result<(), CrashHandlerError> {
    if !ENABLED.load(SeqCst) {
        return Ok(());
    }

    // A second fault (on this or another thread) while a report is in progress skips straight
    // to the re-raise.
    if REPORTING.swap(true, SeqCst) {
        return Err(CrashHandlerError::Reentrant);
    }

    // Leak the config to avoid calling `drop` during a crash.
    let config_ptr = CONFIG.swap(ptr::null_mut(), SeqCst);
    if config_ptr.is_null() {
        return Err(CrashHandlerError::NoConfig);
    }
    // SAFETY: non-null pointers in CONFIG come from `Box::into_raw`, and we now own it.
    let config = unsafe { &*config_ptr };

    // SAFETY: we are the only reporter (REPORTING), and cannot wait on the backtrace lock here.
    let raw = unsafe { capture_unsynchronized(config.skip_frames(), config.max_frames()) };

    set_dispatch_state(DispatchState::Reporting);
    // SAFETY: see above.
    let resolver = unsafe { InProcessResolver::unsynchronized(config.demangle_names()) };
    let mut stderr = std::io::stderr();
    panic::catch_unwind(AssertUnwindSafe(|| {
        run_pipeline(
            &raw,
            SigInfo::from_signum(signum),
            config,
            &resolver,
            &mut stderr,
        )
    }))
    .map_err(|_| CrashHandlerError::Panicked)?
    .map_err(CrashHandlerError::Pipeline)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_state_from_u8() {
        for state in [
            DispatchState::Uninstalled,
            DispatchState::Installed,
            DispatchState::Triggered,
            DispatchState::Reporting,
            DispatchState::Reraised,
        ] {
            assert_eq!(DispatchState::from_u8(state as u8), state);
        }
        assert_eq!(DispatchState::from_u8(200), DispatchState::Uninstalled);
    }

    #[test]
    fn test_config_update_atomic() {
        let _lock = GLOBAL_STATE_TEST_LOCK.lock().unwrap();
        let mut config = CrashtraceConfiguration::default();
        config.set_skip_frames(3);
        update_config(config).unwrap();

        let config_ptr = CONFIG.load(SeqCst);
        assert!(!config_ptr.is_null());
        unsafe {
            assert_eq!((*config_ptr).skip_frames(), 3);
        }

        update_config(CrashtraceConfiguration::default()).unwrap();
        let new_ptr = CONFIG.load(SeqCst);
        assert!(!new_ptr.is_null());
        unsafe {
            assert_eq!((*new_ptr).skip_frames(), 1);
        }
        clear_config();
        assert!(CONFIG.load(SeqCst).is_null());
    }

    #[test]
    fn test_second_fault_skips_reporting() {
        let _lock = GLOBAL_STATE_TEST_LOCK.lock().unwrap();
        enable();
        update_config(CrashtraceConfiguration::default()).unwrap();
        let config_ptr = CONFIG.load(SeqCst);
        REPORTING.store(true, SeqCst);

        let err = handle_posix_signal_impl(libc::SIGSEGV).unwrap_err();
        assert!(matches!(err, CrashHandlerError::Reentrant), "{err}");
        // The report in progress keeps its config.
        assert_eq!(CONFIG.load(SeqCst), config_ptr);
        assert!(REPORTING.load(SeqCst));

        REPORTING.store(false, SeqCst);
        clear_config();
    }

    #[test]
    fn test_fault_without_config() {
        let _lock = GLOBAL_STATE_TEST_LOCK.lock().unwrap();
        enable();
        clear_config();
        REPORTING.store(false, SeqCst);

        let err = handle_posix_signal_impl(libc::SIGBUS).unwrap_err();
        assert!(matches!(err, CrashHandlerError::NoConfig), "{err}");
        // Still counts as the one report attempt of the process.
        assert!(REPORTING.load(SeqCst));
        let err = handle_posix_signal_impl(libc::SIGBUS).unwrap_err();
        assert!(matches!(err, CrashHandlerError::Reentrant), "{err}");

        REPORTING.store(false, SeqCst);
    }

    #[test]
    fn test_disabled_fault_is_not_reported() {
        let _lock = GLOBAL_STATE_TEST_LOCK.lock().unwrap();
        update_config(CrashtraceConfiguration::default()).unwrap();
        let config_ptr = CONFIG.load(SeqCst);
        REPORTING.store(false, SeqCst);
        disable();

        handle_posix_signal_impl(libc::SIGABRT).unwrap();
        assert!(!REPORTING.load(SeqCst));
        assert_eq!(CONFIG.load(SeqCst), config_ptr);

        enable();
        clear_config();
    }

    #[test]
    fn test_enable_disable() {
        let _lock = GLOBAL_STATE_TEST_LOCK.lock().unwrap();
        disable();
        assert!(!is_enabled());
        disable();
        assert!(!is_enabled());
        enable();
        assert!(is_enabled());
    }
}
