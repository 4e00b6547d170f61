// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! resolve → filter → build → persist → transmit, with console narration of every stage.

use super::emitters::{
    emit_banner, emit_captured, emit_delivery, emit_frames, emit_saved, DeliveryOutcome,
};
use super::frame_filter::FrameFilter;
use super::stack_capture::RawStack;
use super::symbolizer::SymbolResolver;
use crate::crash_info::{render_text, render_wire, CrashReport, SigInfo, StackFrame};
use crate::export::{persister, transmitter};
use crate::shared::configuration::CrashtraceConfiguration;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug)]
pub struct PipelineOutcome {
    pub report: CrashReport,
    pub saved_to: Option<PathBuf>,
    pub delivery: DeliveryOutcome,
}

/// Resolves every raw address and drops the frames the configured rules exclude.
pub fn resolve_and_filter(
    raw: &RawStack,
    config: &CrashtraceConfiguration,
    resolver: &impl SymbolResolver,
) -> Vec<StackFrame> {
    let frames = raw
        .as_slice()
        .iter()
        .map(|addr| StackFrame::from(resolver.resolve(*addr)))
        .collect();
    FrameFilter::new(config.filter_rules()).filter(frames)
}

/// Runs the reporting pipeline for an already captured stack.
///
/// Persistence and delivery are best effort: their failures show up in the outcome, never as an
/// error. Console output is best effort too.
pub fn run_pipeline(
    raw: &RawStack,
    sig_info: SigInfo,
    config: &CrashtraceConfiguration,
    resolver: &impl SymbolResolver,
    console: &mut impl Write,
) -> anyhow::Result<PipelineOutcome> {
    let _ = emit_banner(console, &sig_info);

    let frames = resolve_and_filter(raw, config, resolver);
    let _ = emit_captured(console, frames.len());
    let _ = emit_frames(console, &frames);

    let report = CrashReport::build(frames, sig_info)?;

    let text = render_text(&report);
    let saved_to = persister::save(&text, config.output_dir(), report.unix_timestamp());
    let _ = emit_saved(console, saved_to.as_deref());

    let delivery = deliver(&report, config);
    let _ = emit_delivery(console, &delivery);

    Ok(PipelineOutcome {
        report,
        saved_to,
        delivery,
    })
}

fn deliver(report: &CrashReport, config: &CrashtraceConfiguration) -> DeliveryOutcome {
    let delivery = config.delivery();
    let Some(endpoint) = delivery.endpoint() else {
        tracing::info!("No collector endpoint configured, skipping delivery");
        return DeliveryOutcome::Skipped;
    };
    let wire = match render_wire(report) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::warn!("Unable to render the wire form: {e:#}");
            return DeliveryOutcome::Failed(endpoint.clone());
        }
    };
    if transmitter::send(
        endpoint,
        &wire,
        delivery.connect_timeout(),
        delivery.total_timeout(),
    ) {
        DeliveryOutcome::Sent(endpoint.clone())
    } else {
        DeliveryOutcome::Failed(endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash_info::ResolvedSymbol;
    use crate::shared::configuration::{DeliveryConfig, Endpoint};
    use httpmock::prelude::*;

    /// Hands out a fixed symbol per address.
    struct TableResolver(Vec<(usize, ResolvedSymbol)>);

    impl SymbolResolver for TableResolver {
        fn resolve(&self, addr: usize) -> ResolvedSymbol {
            self.0
                .iter()
                .find(|(a, _)| *a == addr)
                .map(|(_, s)| s.clone())
                .unwrap_or_default()
        }
    }

    fn symbol(file: &str, line: u32, function: &str) -> ResolvedSymbol {
        ResolvedSymbol {
            file: Some(file.to_string()),
            line: Some(line),
            function: Some(function.to_string()),
        }
    }

    fn resolver() -> TableResolver {
        TableResolver(vec![
            (
                0x10,
                symbol(
                    "/src/crashtrace/src/collector/crash_handler.rs",
                    20,
                    "crashtrace::collector::crash_handler::handle_posix_sigaction",
                ),
            ),
            (0x20, symbol("/srv/app/src/main.rs", 3, "app::inner")),
            (0x30, symbol("/srv/app/src/main.rs", 7, "app::middle")),
            (0x40, symbol("/srv/app/src/main.rs", 11, "app::outer")),
            (0x50, symbol("../csu/libc-start.c", 360, "__libc_start_main")),
        ])
    }

    fn raw() -> RawStack {
        // 0x99 resolves to nothing at all.
        RawStack::from_addresses(&[0x10, 0x20, 0x99, 0x30, 0x40, 0x50])
    }

    fn config(dir: &std::path::Path, delivery: DeliveryConfig) -> CrashtraceConfiguration {
        let mut config = CrashtraceConfiguration::default();
        config.set_output_dir(dir.to_path_buf());
        config.set_delivery(delivery);
        config
    }

    #[test]
    fn test_resolve_and_filter() {
        let config = CrashtraceConfiguration::default();
        let frames = resolve_and_filter(&raw(), &config, &resolver());
        let functions: Vec<&str> = frames.iter().map(|f| f.function()).collect();
        assert_eq!(functions, vec!["app::inner", "app::middle", "app::outer"]);
    }

    #[test]
    fn test_pipeline_without_endpoint() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), DeliveryConfig::disabled());
        let mut console = Vec::new();
        let outcome = run_pipeline(
            &raw(),
            SigInfo::from_signum(libc::SIGSEGV),
            &config,
            &resolver(),
            &mut console,
        )?;

        assert_eq!(outcome.delivery, DeliveryOutcome::Skipped);
        assert_eq!(outcome.report.frames().len(), 3);

        let saved_to = outcome.saved_to.unwrap();
        let name = saved_to.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("crash_") && name.ends_with(".log"), "{name}");
        let text = std::fs::read_to_string(&saved_to)?;
        assert!(text.contains("Stack trace (3 frames):"));
        assert!(text.contains("  #0 /srv/app/src/main.rs:3 in app::inner\n"));

        let console = String::from_utf8(console)?;
        assert!(console.starts_with(&format!("FATAL ERROR: SIGSEGV ({})\n", libc::SIGSEGV)));
        assert!(console.contains("Captured 3 frames\n"));
        assert!(console.contains("skipping server upload"));
        assert!(!console.contains("Failed to send"));
        Ok(())
    }

    #[test]
    fn test_pipeline_collector_receives_wire_form() -> anyhow::Result<()> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/crash")
                .header("content-type", "application/json")
                .json_body_partial(r#"{"signal": "SIGBUS"}"#)
                .body_contains("app::inner");
            then.status(200);
        });
        let dir = tempfile::tempdir()?;
        let delivery =
            DeliveryConfig::new(Some(Endpoint::from_url(&server.url("/crash"))?), None, None)?;
        let config = config(dir.path(), delivery);
        let outcome = run_pipeline(
            &raw(),
            SigInfo::from_signum(libc::SIGBUS),
            &config,
            &resolver(),
            &mut std::io::sink(),
        )?;
        assert!(matches!(outcome.delivery, DeliveryOutcome::Sent(_)));
        mock.assert();
        Ok(())
    }

    #[test]
    fn test_pipeline_collector_failure_is_not_fatal() -> anyhow::Result<()> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/crash");
            then.status(500);
        });
        let dir = tempfile::tempdir()?;
        let delivery =
            DeliveryConfig::new(Some(Endpoint::from_url(&server.url("/crash"))?), None, None)?;
        let config = config(dir.path(), delivery);
        let mut console = Vec::new();
        let outcome = run_pipeline(
            &raw(),
            SigInfo::from_signum(libc::SIGABRT),
            &config,
            &resolver(),
            &mut console,
        )?;
        assert!(matches!(outcome.delivery, DeliveryOutcome::Failed(_)));
        assert!(outcome.saved_to.is_some());
        assert!(String::from_utf8(console)?.contains("Failed to send crash report"));
        mock.assert();
        Ok(())
    }

    #[test]
    fn test_pipeline_unwritable_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(&dir.path().join("missing"), DeliveryConfig::disabled());
        let mut console = Vec::new();
        let outcome = run_pipeline(
            &raw(),
            SigInfo::from_signum(libc::SIGFPE),
            &config,
            &resolver(),
            &mut console,
        )?;
        assert!(outcome.saved_to.is_none());
        assert_eq!(outcome.delivery, DeliveryOutcome::Skipped);
        assert!(String::from_utf8(console)?.contains("Failed to save crash report"));
        Ok(())
    }
}
