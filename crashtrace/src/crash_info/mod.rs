// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod builder;
mod render;
mod sig_info;
mod stacktrace;
mod test_utils;

pub use builder::*;
pub use render::*;
pub use sig_info::*;
pub use stacktrace::*;
pub(crate) use stacktrace::demangle;

use crate::shared::constants::TIMESTAMP_FORMAT;
use chrono::{DateTime, Local};

/// Everything known about one fault: process metadata plus the filtered, innermost-first frames.
///
/// Built once per fault and never mutated afterwards; the text and wire forms are rendered from
/// it by [`render_text`] and [`render_wire`].
#[derive(Debug, Clone, PartialEq)]
pub struct CrashReport {
    frames: Vec<StackFrame>,
    hostname: String,
    pid: u32,
    sig_info: SigInfo,
    timestamp: DateTime<Local>,
    user: String,
}

impl CrashReport {
    /// Builds a report for the running process at the current instant.
    pub fn build(frames: Vec<StackFrame>, sig_info: SigInfo) -> anyhow::Result<Self> {
        let mut builder = CrashReportBuilder::new();
        builder.with_sig_info(sig_info)?;
        builder.with_frames(frames)?;
        builder.with_process_metadata()?;
        builder.build()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn sig_info(&self) -> SigInfo {
        self.sig_info
    }

    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
    pub fn timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.timestamp.timestamp()
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

#[cfg(test)]
impl test_utils::TestInstance for CrashReport {
    fn test_instance(seed: u64) -> Self {
        use chrono::TimeZone;
        use test_utils::TestInstance;
        let timestamp = Local
            .with_ymd_and_hms(2024, 3, 14, 15, 9, 26)
            .single()
            .unwrap_or_else(Local::now);
        Self {
            frames: (0..seed).map(StackFrame::test_instance).collect(),
            hostname: "testhost".to_string(),
            pid: 4242,
            sig_info: SigInfo::test_instance(seed),
            timestamp,
            user: "tester".to_string(),
        }
    }
}
