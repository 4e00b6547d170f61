// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::shared::constants::{UNKNOWN_USER, UNRESOLVED_PLACEHOLDER, USER_ENV};
use anyhow::Context;
use chrono::{DateTime, Local};

#[derive(Debug, Default, PartialEq)]
pub struct CrashReportBuilder {
    pub frames: Option<Vec<StackFrame>>,
    pub hostname: Option<String>,
    pub pid: Option<u32>,
    pub sig_info: Option<SigInfo>,
    pub timestamp: Option<DateTime<Local>>,
    pub user: Option<String>,
}

impl CrashReportBuilder {
    pub fn build(self) -> anyhow::Result<CrashReport> {
        let sig_info = self.sig_info.context("required field 'sig_info' missing")?;
        let frames = self.frames.unwrap_or_default();
        let hostname = self.hostname.unwrap_or_else(|| UNRESOLVED_PLACEHOLDER.to_string());
        let pid = self.pid.unwrap_or_else(std::process::id);
        let timestamp = self.timestamp.unwrap_or_else(Local::now);
        let user = self.user.unwrap_or_else(|| UNKNOWN_USER.to_string());
        Ok(CrashReport {
            frames,
            hostname,
            pid,
            sig_info,
            timestamp,
            user,
        })
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(&mut self, frames: Vec<StackFrame>) -> anyhow::Result<()> {
        self.frames = Some(frames);
        Ok(())
    }

    pub fn with_frame(&mut self, frame: StackFrame) -> anyhow::Result<()> {
        self.frames.get_or_insert_with(Vec::new).push(frame);
        Ok(())
    }

    pub fn with_hostname(&mut self, hostname: String) -> anyhow::Result<()> {
        anyhow::ensure!(!hostname.is_empty(), "Empty hostname not allowed");
        self.hostname = Some(hostname);
        Ok(())
    }

    pub fn with_hostname_this_machine(&mut self) -> anyhow::Result<()> {
        let hostname = nix::unistd::gethostname()?;
        let hostname = hostname
            .into_string()
            .map_err(|raw| anyhow::anyhow!("hostname {raw:?} is not valid UTF-8"))?;
        self.with_hostname(hostname)
    }

    pub fn with_pid(&mut self, pid: u32) -> anyhow::Result<()> {
        self.pid = Some(pid);
        Ok(())
    }

    pub fn with_pid_this_process(&mut self) -> anyhow::Result<()> {
        self.with_pid(std::process::id())
    }

    pub fn with_sig_info(&mut self, sig_info: SigInfo) -> anyhow::Result<()> {
        self.sig_info = Some(sig_info);
        Ok(())
    }

    pub fn with_timestamp(&mut self, timestamp: DateTime<Local>) -> anyhow::Result<()> {
        self.timestamp = Some(timestamp);
        Ok(())
    }

    pub fn with_timestamp_now(&mut self) -> anyhow::Result<()> {
        self.with_timestamp(Local::now())
    }

    /// An empty name is treated like a missing one.
    pub fn with_user(&mut self, user: String) -> anyhow::Result<()> {
        if user.trim().is_empty() {
            return Ok(());
        }
        self.user = Some(user);
        Ok(())
    }

    /// Reads `USER`; leaves the user unset (and so `"unknown"`) if it is absent.
    pub fn with_user_from_env(&mut self) -> anyhow::Result<()> {
        match std::env::var(USER_ENV) {
            Ok(user) => self.with_user(user),
            Err(_) => Ok(()),
        }
    }

    /// Fills in every field that describes the running process: time, pid, host and user.
    /// A hostname lookup failure leaves the placeholder in place rather than failing the report.
    pub fn with_process_metadata(&mut self) -> anyhow::Result<()> {
        self.with_timestamp_now()?;
        self.with_pid_this_process()?;
        if let Err(e) = self.with_hostname_this_machine() {
            tracing::debug!("Unable to read the hostname: {e:#}");
        }
        self.with_user_from_env()
    }
}
