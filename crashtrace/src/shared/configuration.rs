// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::collector::frame_filter::{default_filter_rules, FilterRule};
use crate::shared::{constants::*, parse_env};
use crate::{default_signals, signal_from_signum};
use anyhow::Context;
use http::Uri;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Remote collector the wire form is POSTed to.
///
/// `http` and `https` URIs are accepted.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    url: Uri,
}

impl Endpoint {
    pub fn from_url(url: &str) -> anyhow::Result<Self> {
        let url: Uri = url
            .parse()
            .with_context(|| format!("invalid collector url {url:?}"))?;
        anyhow::ensure!(
            matches!(url.scheme_str(), Some("http" | "https")),
            "unsupported scheme in {url}, expected http or https"
        );
        anyhow::ensure!(url.host().is_some(), "collector url {url} has no host");
        Ok(Self { url })
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }
}

impl TryFrom<String> for Endpoint {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_url(&value)
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.url.to_string()
    }
}

/// Network delivery settings. A missing endpoint turns delivery off entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    endpoint: Option<Endpoint>,
    connect_timeout: Duration,
    total_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl DeliveryConfig {
    pub fn new(
        endpoint: Option<Endpoint>,
        connect_timeout: Option<Duration>,
        total_timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let connect_timeout = connect_timeout.unwrap_or(CRASHTRACE_DEFAULT_CONNECT_TIMEOUT);
        let total_timeout = total_timeout.unwrap_or(CRASHTRACE_DEFAULT_TOTAL_TIMEOUT);
        anyhow::ensure!(
            !connect_timeout.is_zero() && !total_timeout.is_zero(),
            "Delivery timeouts must be non-zero"
        );
        Ok(Self {
            endpoint,
            connect_timeout,
            total_timeout,
        })
    }

    pub fn disabled() -> Self {
        Self {
            endpoint: None,
            connect_timeout: CRASHTRACE_DEFAULT_CONNECT_TIMEOUT,
            total_timeout: CRASHTRACE_DEFAULT_TOTAL_TIMEOUT,
        }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashtraceConfiguration {
    create_alt_stack: bool,
    delivery: DeliveryConfig,
    // Whether to demangle symbol names in stack traces
    demangle_names: bool,
    filter_rules: Vec<FilterRule>,
    max_frames: usize,
    // Directory receiving the `crash_<ts>.log` artifact
    output_dir: PathBuf,
    signals: Vec<i32>,
    skip_frames: usize,
    use_alt_stack: bool,
}

impl Default for CrashtraceConfiguration {
    fn default() -> Self {
        Self {
            create_alt_stack: true,
            delivery: DeliveryConfig::disabled(),
            demangle_names: true,
            filter_rules: default_filter_rules(),
            max_frames: CRASHTRACE_DEFAULT_MAX_FRAMES,
            output_dir: PathBuf::from("."),
            signals: default_signals(),
            skip_frames: CRASHTRACE_DEFAULT_SKIP_FRAMES,
            use_alt_stack: true,
        }
    }
}

impl CrashtraceConfiguration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut signals: Vec<i32>,
        create_alt_stack: bool,
        use_alt_stack: bool,
        max_frames: Option<usize>,
        skip_frames: Option<usize>,
        demangle_names: bool,
        output_dir: Option<PathBuf>,
        filter_rules: Option<Vec<FilterRule>>,
        delivery: DeliveryConfig,
    ) -> anyhow::Result<Self> {
        // Requesting to create, but not use, the altstack is considered paradoxical.
        anyhow::ensure!(
            !create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        let max_frames = max_frames.unwrap_or(CRASHTRACE_DEFAULT_MAX_FRAMES);
        anyhow::ensure!(
            (1..=MAX_BACKTRACE_FRAMES).contains(&max_frames),
            "max_frames must be between 1 and {MAX_BACKTRACE_FRAMES}, got {max_frames}"
        );
        if signals.is_empty() {
            signals = default_signals();
        } else {
            // Ensure we don't have double elements in the signals list.
            let before_len = signals.len();
            signals.sort();
            signals.dedup();
            anyhow::ensure!(
                before_len == signals.len(),
                "Signals contained duplicate elements"
            );
            // Ensure that all signal values translate to a valid signum
            signals
                .iter()
                .try_for_each(|x| signal_from_signum(*x).map(|_| ()))?;
        }

        Ok(Self {
            create_alt_stack,
            delivery,
            demangle_names,
            filter_rules: filter_rules.unwrap_or_else(default_filter_rules),
            max_frames,
            output_dir: output_dir.unwrap_or_else(|| PathBuf::from(".")),
            signals,
            skip_frames: skip_frames.unwrap_or(CRASHTRACE_DEFAULT_SKIP_FRAMES),
            use_alt_stack,
        })
    }

    /// Default configuration, with the delivery endpoint, the output directory and the delivery
    /// timeouts taken from the environment.
    ///
    /// A collector url or timeout that cannot be used only turns delivery off: the handlers are
    /// still installed and the local artifact is still written.
    pub fn from_env() -> anyhow::Result<Self> {
        let delivery = delivery_from_env().unwrap_or_else(|e| {
            tracing::warn!("Crash report delivery disabled: {e:#}");
            DeliveryConfig::disabled()
        });
        Self::new(
            default_signals(),
            true,
            true,
            None,
            None,
            true,
            parse_env::str_not_empty(CRASH_REPORT_DIR).map(PathBuf::from),
            None,
            delivery,
        )
    }

    pub fn create_alt_stack(&self) -> bool {
        self.create_alt_stack
    }

    pub fn use_alt_stack(&self) -> bool {
        self.use_alt_stack
    }

    pub fn delivery(&self) -> &DeliveryConfig {
        &self.delivery
    }

    pub fn demangle_names(&self) -> bool {
        self.demangle_names
    }

    pub fn filter_rules(&self) -> &[FilterRule] {
        &self.filter_rules
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub fn signals(&self) -> &Vec<i32> {
        &self.signals
    }

    pub fn skip_frames(&self) -> usize {
        self.skip_frames
    }

    pub fn set_delivery(&mut self, delivery: DeliveryConfig) {
        self.delivery = delivery;
    }

    pub fn set_output_dir(&mut self, output_dir: PathBuf) {
        self.output_dir = output_dir;
    }

    pub fn set_skip_frames(&mut self, skip_frames: usize) {
        self.skip_frames = skip_frames;
    }

    pub fn set_create_alt_stack(&mut self, create_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !create_alt_stack || self.use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.create_alt_stack = create_alt_stack;
        Ok(())
    }

    pub fn set_use_alt_stack(&mut self, use_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.use_alt_stack = use_alt_stack;
        Ok(())
    }
}

fn delivery_from_env() -> anyhow::Result<DeliveryConfig> {
    let endpoint = parse_env::str_not_empty(CRASH_REPORT_URL)
        .map(|url| Endpoint::from_url(&url))
        .transpose()
        .with_context(|| format!("{CRASH_REPORT_URL} is not a valid collector url"))?;
    DeliveryConfig::new(
        endpoint,
        parse_env::duration(CRASH_REPORT_CONNECT_TIMEOUT),
        parse_env::duration(CRASH_REPORT_TIMEOUT),
    )
}
