// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The process-wide fault handler table.
//!
//! POSIX has exactly one disposition slot per signal per process, so this table is a singleton
//! ([`HANDLER_TABLE`]) with an explicit `install`/`restore` lifecycle. It remembers the
//! dispositions it replaced so `restore` can put them back.

use super::crash_handler::handle_posix_sigaction;
use crate::shared::configuration::CrashtraceConfiguration;
use crate::signal_from_signum;
use libc::{
    mmap, sigaltstack, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE,
    SIGSTKSZ,
};
use anyhow::Context;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::cell::UnsafeCell;
use std::io;
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicU8};

// Linux seems to have the most, supporting up to 64 inclusive
// https://man7.org/linux/man-pages/man7/signal.7.html
const MAX_SIGNALS: usize = 65;

const ALT_STACK_PAGES: usize = 16;

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const INSTALLED: u8 = 2;

type PreviousHandlers = [Option<(Signal, SigAction)>; MAX_SIGNALS];

pub(crate) struct HandlerTable {
    state: AtomicU8,
    // Only touched by whoever moved `state` to BUSY.
    previous: UnsafeCell<PreviousHandlers>,
}

// SAFETY: `previous` is only accessed under the BUSY state, which a single caller can hold.
unsafe impl Sync for HandlerTable {}

pub(crate) static HANDLER_TABLE: HandlerTable = HandlerTable::new();

// sigaltstack is never torn down, so it only needs creating once.
static ALT_STACK_CREATED: AtomicBool = AtomicBool::new(false);

impl HandlerTable {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            previous: UnsafeCell::new([None; MAX_SIGNALS]),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.state.load(SeqCst) == INSTALLED
    }

    /// Registers the crash handler for every configured signal.
    ///
    /// Installing twice without a `restore` in between is an error. If any signal fails to
    /// register, the ones that did are rolled back.
    /// ATOMICITY:
    ///     Setting the handlers is not an atomic operation. A signal arriving midway is handled
    ///     by whichever disposition is in place at that instant.
    pub fn install(&self, config: &CrashtraceConfiguration) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.state
                .compare_exchange(EMPTY, BUSY, SeqCst, SeqCst)
                .is_ok(),
            "Attempted to double register crash handlers"
        );
        // SAFETY: we hold BUSY.
        let result = unsafe { self.install_locked(config) };
        if result.is_ok() {
            self.state.store(INSTALLED, SeqCst);
            tracing::info!(signals = ?config.signals(), "Crash handlers installed");
        } else {
            // SAFETY: we hold BUSY.
            let _ = unsafe { self.restore_locked() };
            self.state.store(EMPTY, SeqCst);
        }
        result
    }

    /// Puts back the dispositions that were in place before `install`.
    pub fn restore(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.state
                .compare_exchange(INSTALLED, BUSY, SeqCst, SeqCst)
                .is_ok(),
            "Crash handlers are not installed"
        );
        // SAFETY: we hold BUSY.
        let result = unsafe { self.restore_locked() };
        self.state.store(EMPTY, SeqCst);
        tracing::info!("Crash handlers restored");
        result
    }

    unsafe fn install_locked(&self, config: &CrashtraceConfiguration) -> anyhow::Result<()> {
        // Validate signal numbers will fit in the array.
        for signum in config.signals() {
            anyhow::ensure!(
                *signum > 0 && *signum < MAX_SIGNALS as i32,
                "Signal {signum} is out of range"
            );
        }

        if config.create_alt_stack()
            && ALT_STACK_CREATED
                .compare_exchange(false, true, SeqCst, SeqCst)
                .is_ok()
        {
            if let Err(e) = install_alt_stack() {
                ALT_STACK_CREATED.store(false, SeqCst);
                return Err(e);
            }
        }

        let previous = &mut *self.previous.get();
        let mut errors = vec![];
        for &signum in config.signals() {
            let swapped = signal_from_signum(signum).and_then(|signal| {
                let replaced = swap_in_handler(signal, config.use_alt_stack())?;
                Ok((signal, replaced))
            });
            match swapped {
                Ok(entry) => previous[signum as usize] = Some(entry),
                Err(e) => errors.push(format!("Unable to register signal for {signum}: {e:#}")),
            }
        }
        anyhow::ensure!(
            errors.is_empty(),
            "Errors registering signal handlers {errors:?}"
        );
        Ok(())
    }

    unsafe fn restore_locked(&self) -> anyhow::Result<()> {
        let previous = &mut *self.previous.get();
        let mut errors = vec![];
        for (signal, action) in previous.iter_mut().filter_map(Option::take) {
            if let Err(e) = signal::sigaction(signal, &action) {
                errors.push(format!("Unable to restore {signal}: {e}"));
            }
        }
        anyhow::ensure!(
            errors.is_empty(),
            "Errors restoring signal handlers {errors:?}"
        );
        Ok(())
    }
}

/// Resets `signum` to its default disposition and raises it again, so the process terminates
/// exactly as it would have without a handler (same exit status, same core dump eligibility).
///
/// For a synchronous fault `raise` may return; returning from the handler then re-executes the
/// faulting instruction under the default disposition.
pub(crate) fn reraise_default(signum: i32) {
    let Ok(signal) = signal_from_signum(signum) else {
        terminate()
    };
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: installing SIG_DFL has no preconditions.
    if unsafe { signal::sigaction(signal, &default) }.is_err() {
        terminate()
    }
    // The signal may be blocked if it arrived through a handler installed without SA_NODEFER.
    let mut mask = SigSet::empty();
    mask.add(signal);
    let _ = mask.thread_unblock();
    // SAFETY: No preconditions.
    unsafe { libc::raise(signum) };
}

fn terminate() -> ! {
    std::process::abort()
}

/// Maps an alternate signal stack for the calling thread, with one inaccessible page below it so
/// that overflowing it faults instead of running into neighbouring memory.
unsafe fn install_alt_stack() -> anyhow::Result<()> {
    let page = page_size::get();
    // Symbol resolution on this stack needs far more than SIGSTKSZ.
    let usable = SIGSTKSZ.max(ALT_STACK_PAGES * page);
    let mapped = usable + page;
    let base = mmap(
        ptr::null_mut(),
        mapped,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON,
        -1,
        0,
    );
    if base == MAP_FAILED {
        return Err(io::Error::last_os_error()).context("mapping the alternate signal stack");
    }
    if libc::mprotect(base, page, PROT_NONE) != 0 {
        let err = io::Error::last_os_error();
        libc::munmap(base, mapped);
        return Err(err).context("protecting the alternate signal stack guard page");
    }
    let stack = libc::stack_t {
        ss_sp: base.add(page),
        ss_flags: 0,
        ss_size: usable,
    };
    if sigaltstack(&stack, ptr::null_mut()) != 0 {
        let err = io::Error::last_os_error();
        libc::munmap(base, mapped);
        return Err(err).context("registering the alternate signal stack");
    }
    Ok(())
}

/// Points `signal` at the crash handler and hands back the disposition it replaced.
unsafe fn swap_in_handler(signal: Signal, on_alt_stack: bool) -> nix::Result<SigAction> {
    // SA_NODEFER: a fault inside the handler must reach the reentrancy guard, not stay pending.
    let mut flags = SaFlags::SA_NODEFER;
    if on_alt_stack {
        flags |= SaFlags::SA_ONSTACK;
    }
    let action = SigAction::new(
        SigHandler::SigAction(handle_posix_sigaction),
        flags,
        SigSet::empty(),
    );
    signal::sigaction(signal, &action)
}
