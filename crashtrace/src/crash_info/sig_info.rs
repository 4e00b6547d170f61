// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fatal signal that triggered a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[allow(clippy::upper_case_acronyms, non_camel_case_types)]
#[repr(C)]
/// See <https://man7.org/linux/man-pages/man7/signal.7.html>
pub enum SignalKind {
    SIGSEGV,
    SIGABRT,
    SIGFPE,
    SIGILL,
    SIGBUS,
    UNKNOWN,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::SIGSEGV => "SIGSEGV",
            SignalKind::SIGABRT => "SIGABRT",
            SignalKind::SIGFPE => "SIGFPE",
            SignalKind::SIGILL => "SIGILL",
            SignalKind::SIGBUS => "SIGBUS",
            SignalKind::UNKNOWN => "UNKNOWN",
        }
    }

    pub fn signum(&self) -> Option<libc::c_int> {
        match self {
            SignalKind::SIGSEGV => Some(libc::SIGSEGV),
            SignalKind::SIGABRT => Some(libc::SIGABRT),
            SignalKind::SIGFPE => Some(libc::SIGFPE),
            SignalKind::SIGILL => Some(libc::SIGILL),
            SignalKind::SIGBUS => Some(libc::SIGBUS),
            SignalKind::UNKNOWN => None,
        }
    }
}

impl From<libc::c_int> for SignalKind {
    fn from(value: libc::c_int) -> Self {
        match value {
            libc::SIGSEGV => SignalKind::SIGSEGV,
            libc::SIGABRT => SignalKind::SIGABRT,
            libc::SIGFPE => SignalKind::SIGFPE,
            libc::SIGILL => SignalKind::SIGILL,
            libc::SIGBUS => SignalKind::SIGBUS,
            _ => SignalKind::UNKNOWN,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which signal fired, and the raw code it was delivered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SigInfo {
    pub kind: SignalKind,
    pub code: libc::c_int,
}

impl SigInfo {
    pub fn new(kind: SignalKind, code: libc::c_int) -> Self {
        Self { kind, code }
    }

    pub fn from_signum(signum: libc::c_int) -> Self {
        Self::new(signum.into(), signum)
    }
}

#[cfg(test)]
impl super::test_utils::TestInstance for SigInfo {
    fn test_instance(_seed: u64) -> Self {
        Self::from_signum(libc::SIGSEGV)
    }
}
