// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Constants shared between the collector, the report renderers and the exporters.

use std::time::Duration;

/// Hard upper bound on the number of raw addresses a capture may hold.
///
/// This limit prevents runaway frame walking in case of stack corruption.
pub const MAX_BACKTRACE_FRAMES: usize = 128;

/// Number of raw addresses captured when the configuration does not say otherwise.
pub const CRASHTRACE_DEFAULT_MAX_FRAMES: usize = 32;

/// Innermost raw addresses dropped by default: the unwinder's own entry frame.
pub const CRASHTRACE_DEFAULT_SKIP_FRAMES: usize = 1;

pub const CRASHTRACE_DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const CRASHTRACE_DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Substituted for any frame field the symbolizer could not recover.
pub const UNRESOLVED_PLACEHOLDER: &str = "??";

/// Reported when the invoking user cannot be determined.
pub const UNKNOWN_USER: &str = "unknown";

/// strftime pattern of the report timestamp (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Text artifact markers
pub const CRASHTRACE_BEGIN_REPORT: &str = "=== CRASH REPORT ===";
pub const CRASHTRACE_END_REPORT: &str = "=== END CRASH REPORT ===";

// Artifact naming: `crash_<unix-timestamp>.log`
pub const CRASHTRACE_ARTIFACT_PREFIX: &str = "crash_";
pub const CRASHTRACE_ARTIFACT_EXTENSION: &str = "log";

// Environment
pub const CRASH_REPORT_URL: &str = "CRASH_REPORT_URL";
pub const CRASH_REPORT_DIR: &str = "CRASH_REPORT_DIR";
pub const CRASH_REPORT_CONNECT_TIMEOUT: &str = "CRASH_REPORT_CONNECT_TIMEOUT";
pub const CRASH_REPORT_TIMEOUT: &str = "CRASH_REPORT_TIMEOUT";
pub const USER_ENV: &str = "USER";
