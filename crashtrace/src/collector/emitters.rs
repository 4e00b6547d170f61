// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Console narration of the crash pipeline. Each stage reports its outcome on the given handle
//! (stderr in the signal path).

use crate::crash_info::{frame_line, SigInfo, StackFrame};
use crate::shared::configuration::Endpoint;
use crate::shared::constants::CRASH_REPORT_URL;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("Failed to write to output: {0}")]
    WriteError(#[from] std::io::Error),
}

/// What became of the network copy of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent(Endpoint),
    /// No endpoint configured; the transmitter was never invoked.
    Skipped,
    Failed(Endpoint),
}

pub fn emit_banner(w: &mut impl Write, sig_info: &SigInfo) -> Result<(), EmitterError> {
    writeln!(w, "FATAL ERROR: {} ({})", sig_info.kind, sig_info.code)?;
    w.flush()?;
    Ok(())
}

pub fn emit_installed(w: &mut impl Write, signals: &[i32]) -> Result<(), EmitterError> {
    let names: Vec<String> = signals
        .iter()
        .map(|signum| SigInfo::from_signum(*signum).kind.to_string())
        .collect();
    writeln!(w, "Crash handlers installed for {}", names.join(", "))?;
    w.flush()?;
    Ok(())
}

pub fn emit_captured(w: &mut impl Write, frame_count: usize) -> Result<(), EmitterError> {
    writeln!(w, "Captured {frame_count} frames")?;
    Ok(())
}

pub fn emit_frames(w: &mut impl Write, frames: &[StackFrame]) -> Result<(), EmitterError> {
    writeln!(w, "Stack trace:")?;
    for (i, frame) in frames.iter().enumerate() {
        writeln!(w, "  {}", frame_line(i, frame))?;
    }
    w.flush()?;
    Ok(())
}

pub fn emit_saved(w: &mut impl Write, saved_to: Option<&Path>) -> Result<(), EmitterError> {
    match saved_to {
        Some(path) => writeln!(w, "Crash report saved to: {}", path.display())?,
        None => writeln!(w, "Failed to save crash report")?,
    }
    w.flush()?;
    Ok(())
}

pub fn emit_delivery(w: &mut impl Write, outcome: &DeliveryOutcome) -> Result<(), EmitterError> {
    match outcome {
        DeliveryOutcome::Sent(endpoint) => {
            writeln!(w, "Crash report sent to: {}", endpoint.url())?
        }
        DeliveryOutcome::Skipped => {
            writeln!(w, "{CRASH_REPORT_URL} not set, skipping server upload")?
        }
        DeliveryOutcome::Failed(endpoint) => {
            writeln!(w, "Failed to send crash report to: {}", endpoint.url())?
        }
    }
    w.flush()?;
    Ok(())
}
