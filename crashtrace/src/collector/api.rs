// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::crash_handler::{clear_config, set_dispatch_state, update_config, DispatchState};
use super::emitters::emit_installed;
use super::pipeline::resolve_and_filter;
use super::signal_handler_manager::HANDLER_TABLE;
use super::stack_capture::capture;
use super::symbolizer::InProcessResolver;
use crate::crash_info::{CrashReport, SigInfo, SignalKind, StackFrame};
use crate::shared::configuration::CrashtraceConfiguration;

/// Initialize the crash-tracking infrastructure.
///
/// PRECONDITIONS:
///     None.
/// SAFETY:
///     Crash-tracking functions are not reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function is not atomic. A crash during its execution may lead to
///     unexpected crash-handling behaviour.
pub fn init(config: CrashtraceConfiguration) -> anyhow::Result<()> {
    anyhow::ensure!(
        !HANDLER_TABLE.is_installed(),
        "Attempted to double register crash handlers"
    );
    // Store the config first, so that a crash detected right after registration has it.
    update_config(config.clone())?;
    if let Err(e) = HANDLER_TABLE.install(&config) {
        clear_config();
        return Err(e);
    }
    set_dispatch_state(DispatchState::Installed);
    let _ = emit_installed(&mut std::io::stderr(), config.signals());
    Ok(())
}

/// [`init`] with [`CrashtraceConfiguration::from_env`].
pub fn init_from_env() -> anyhow::Result<()> {
    init(CrashtraceConfiguration::from_env()?)
}

/// Cleans up after the crashtrace:
/// Unregister the crash handler and restore the previous handlers.
/// `init` may be called again afterwards.
///
/// PRECONDITIONS:
///     This function assumes that the crashtrace has previously been
///     initialized.
/// SAFETY:
///     Crash-tracking functions are not reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function is not atomic. A crash during its execution may lead to
///     unexpected crash-handling behaviour.
pub fn shutdown() -> anyhow::Result<()> {
    HANDLER_TABLE.restore()?;
    clear_config();
    set_dispatch_state(DispatchState::Uninstalled);
    Ok(())
}

pub fn is_installed() -> bool {
    HANDLER_TABLE.is_installed()
}

/// Resolved and filtered frames of the calling thread, innermost first. No fault required.
#[inline(never)]
pub fn capture_frames(config: &CrashtraceConfiguration) -> Vec<StackFrame> {
    let raw = capture(config.skip_frames(), config.max_frames());
    let resolver = InProcessResolver::new(config.demangle_names());
    resolve_and_filter(&raw, config, &resolver)
}

/// Builds a report of the calling thread's stack without any fault. The signal is reported as
/// `UNKNOWN` with code `0`.
#[inline(never)]
pub fn capture_report(config: &CrashtraceConfiguration) -> anyhow::Result<CrashReport> {
    let frames = capture_frames(config);
    CrashReport::build(frames, SigInfo::new(SignalKind::UNKNOWN, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::crash_handler::{dispatch_state, GLOBAL_STATE_TEST_LOCK};
    use crate::shared::configuration::DeliveryConfig;

    fn config() -> CrashtraceConfiguration {
        // SIGBUS/SIGILL never fire in a healthy test run.
        CrashtraceConfiguration::new(
            vec![libc::SIGBUS, libc::SIGILL],
            false,
            false,
            None,
            None,
            true,
            None,
            None,
            DeliveryConfig::disabled(),
        )
        .unwrap()
    }

    fn current_handler(signum: i32) -> nix::sys::signal::SigHandler {
        let signal = crate::signal_from_signum(signum).unwrap();
        let default_action = nix::sys::signal::SigAction::new(
            nix::sys::signal::SigHandler::SigDfl,
            nix::sys::signal::SaFlags::empty(),
            nix::sys::signal::SigSet::empty(),
        );
        // Read the current action by swapping it out and back in.
        let current = unsafe { nix::sys::signal::sigaction(signal, &default_action) }.unwrap();
        unsafe { nix::sys::signal::sigaction(signal, &current) }.unwrap();
        current.handler()
    }

    #[test]
    fn test_install_lifecycle() -> anyhow::Result<()> {
        let _lock = GLOBAL_STATE_TEST_LOCK.lock().unwrap();
        let before = current_handler(libc::SIGBUS);

        init(config())?;
        assert!(is_installed());
        assert_eq!(dispatch_state(), DispatchState::Installed);
        assert!(matches!(
            current_handler(libc::SIGBUS),
            nix::sys::signal::SigHandler::SigAction(_)
        ));
        init(config()).unwrap_err();
        assert!(is_installed());

        shutdown()?;
        assert!(!is_installed());
        assert_eq!(dispatch_state(), DispatchState::Uninstalled);
        assert_eq!(current_handler(libc::SIGBUS), before);
        shutdown().unwrap_err();

        // The table can be installed again.
        init(config())?;
        assert!(is_installed());
        shutdown()?;
        Ok(())
    }
}
