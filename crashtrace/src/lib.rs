// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! This crate implements a crash reporter based on catching UNIX signals.
//!
//! When one of the configured fatal signals (SIGSEGV, SIGABRT, SIGFPE, SIGILL, SIGBUS by
//! default) is delivered, the handler, running on the faulting thread:
//! 1. records the raw return addresses of the current stack, without allocating,
//! 2. resolves them to `{file, line, function}` and drops the frames that belong to the
//!    reporter itself, the C runtime or the process entry path,
//! 3. builds a [`CrashReport`] and renders it twice: a text artifact written to
//!    `crash_<unix-timestamp>.log`, and a JSON document POSTed to an optional collector under a
//!    connect timeout and an overall timeout,
//! 4. narrates every stage on stderr,
//! 5. restores the default disposition of the signal and raises it again, so the process dies
//!    exactly as it would have without the reporter (exit status, core dump).
//!
//! Safety issues
//! Everything after step 1 allocates, takes locks and does I/O inside a signal handler, which
//! POSIX does not allow. This is accepted for the diagnostic value. A second fault while a report
//! is being produced skips straight to step 5.
#![cfg(unix)]

mod collector;
mod crash_info;
mod export;
mod shared;

pub use collector::*;
pub use crash_info::*;
pub use export::{persister, transmitter};
pub use shared::configuration::{CrashtraceConfiguration, DeliveryConfig, Endpoint};
pub use shared::constants;

use anyhow::Context;

/// The signals handled when the configuration does not name any.
pub fn default_signals() -> Vec<libc::c_int> {
    vec![
        libc::SIGSEGV,
        libc::SIGABRT,
        libc::SIGFPE,
        libc::SIGILL,
        libc::SIGBUS,
    ]
}

pub fn signal_from_signum(value: libc::c_int) -> anyhow::Result<nix::sys::signal::Signal> {
    nix::sys::signal::Signal::try_from(value)
        .with_context(|| format!("invalid signal number {value}"))
}
