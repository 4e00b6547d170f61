// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The two byte forms of a [`CrashReport`]: the human readable artifact and the JSON document
//! POSTed to the collector. Both are pure functions of the report.

use super::CrashReport;
use crate::shared::constants::{CRASHTRACE_BEGIN_REPORT, CRASHTRACE_END_REPORT};
use schemars::JsonSchema;
use serde::Serialize;
use std::fmt::Write;

/// One `stacktrace` entry of the wire document.
#[derive(Debug, Serialize, JsonSchema)]
pub struct WireFrame {
    pub frame: usize,
    pub file: String,
    pub line: u32,
    pub function: String,
}

/// The wire document. Field order is the serialization order.
#[derive(Debug, Serialize, JsonSchema)]
pub struct WireReport {
    pub timestamp: String,
    pub signal: String,
    pub signal_code: libc::c_int,
    pub pid: u32,
    pub hostname: String,
    pub user: String,
    pub stacktrace: Vec<WireFrame>,
}

impl From<&CrashReport> for WireReport {
    fn from(report: &CrashReport) -> Self {
        let sig_info = report.sig_info();
        Self {
            timestamp: report.timestamp(),
            signal: sig_info.kind.name().to_string(),
            signal_code: sig_info.code,
            pid: report.pid(),
            hostname: report.hostname().to_string(),
            user: report.user().to_string(),
            stacktrace: report
                .frames()
                .iter()
                .enumerate()
                .map(|(frame, f)| WireFrame {
                    frame,
                    file: f.file().to_string(),
                    line: f.line(),
                    function: f.function().to_string(),
                })
                .collect(),
        }
    }
}

/// Formats one frame the way both the artifact and the console show it.
pub fn frame_line(index: usize, frame: &super::StackFrame) -> String {
    format!(
        "#{index} {}:{} in {}",
        frame.file(),
        frame.line(),
        frame.function()
    )
}

pub fn render_text(report: &CrashReport) -> String {
    let sig_info = report.sig_info();
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "{CRASHTRACE_BEGIN_REPORT}");
    let _ = writeln!(out, "Timestamp: {}", report.timestamp());
    let _ = writeln!(out, "Signal: {} ({})", sig_info.kind, sig_info.code);
    let _ = writeln!(out, "PID: {}", report.pid());
    let _ = writeln!(out, "Hostname: {}", report.hostname());
    let _ = writeln!(out, "User: {}", report.user());
    let _ = writeln!(out, "Stack trace ({} frames):", report.frames().len());
    for (i, frame) in report.frames().iter().enumerate() {
        let _ = writeln!(out, "  {}", frame_line(i, frame));
    }
    let _ = writeln!(out, "{CRASHTRACE_END_REPORT}");
    out
}

/// serde_json takes care of escaping quotes, backslashes and control characters in every field.
pub fn render_wire(report: &CrashReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&WireReport::from(report))?)
}
