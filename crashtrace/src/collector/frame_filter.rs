// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Removes the frames a crash report should not talk about: the unwinder and the reporting
//! pipeline itself, the C runtime and the standard library startup path, and addresses nothing
//! could be resolved for.
//!
//! The exclusion rules are plain data ([`FilterRule`]) so they can be carried in the
//! configuration and extended without touching the filter.

use crate::crash_info::{demangle, StackFrame};
use crate::shared::constants::UNRESOLVED_PLACEHOLDER;
use serde::{Deserialize, Serialize};

/// What a rule is meant to catch. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    ReportingInfrastructure,
    SystemLibrary,
    ProcessEntry,
    Unresolved,
    InternalPipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameField {
    File,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "match", content = "value", rename_all = "snake_case")]
pub enum Pattern {
    Contains(String),
    StartsWith(String),
    Equals(String),
}

impl Pattern {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Contains(needle) => value.contains(needle.as_str()),
            Pattern::StartsWith(prefix) => value.starts_with(prefix.as_str()),
            Pattern::Equals(expected) => value == expected,
        }
    }
}

/// Excludes a frame when `pattern` matches the chosen `field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterRule {
    pub category: RuleCategory,
    pub field: FrameField,
    pub pattern: Pattern,
}

impl FilterRule {
    pub fn new(category: RuleCategory, field: FrameField, pattern: Pattern) -> Self {
        Self {
            category,
            field,
            pattern,
        }
    }

    pub fn matches(&self, frame: &StackFrame) -> bool {
        let value = match self.field {
            FrameField::File => frame.file(),
            FrameField::Function => frame.function(),
        };
        self.pattern.matches(value)
    }

    fn matches_function(&self, function: &str) -> bool {
        self.field == FrameField::Function && self.pattern.matches(function)
    }
}

pub fn default_filter_rules() -> Vec<FilterRule> {
    use FrameField::*;
    use Pattern::*;
    use RuleCategory::*;

    let rule = |category, field, pattern| FilterRule::new(category, field, pattern);
    let s = |v: &str| v.to_string();
    vec![
        // The unwinder and symbolizer.
        rule(ReportingInfrastructure, File, Contains(s("/backtrace-0."))),
        rule(ReportingInfrastructure, File, Contains(s("/backtrace-rs/"))),
        rule(ReportingInfrastructure, Function, StartsWith(s("backtrace::"))),
        // C runtime and the Rust standard library.
        rule(SystemLibrary, File, Contains(s("/libc.so"))),
        rule(SystemLibrary, File, Contains(s("/libc-"))),
        rule(SystemLibrary, File, Contains(s("glibc"))),
        rule(SystemLibrary, File, Contains(s("csu/"))),
        rule(SystemLibrary, File, Contains(s("sysdeps/"))),
        rule(SystemLibrary, File, StartsWith(s("/rustc/"))),
        rule(SystemLibrary, File, Contains(s("/library/std/src/"))),
        rule(SystemLibrary, File, Contains(s("/library/core/src/"))),
        // Process entry.
        rule(ProcessEntry, Function, StartsWith(s("_start"))),
        rule(ProcessEntry, Function, Contains(s("__libc"))),
        rule(ProcessEntry, Function, StartsWith(s("std::rt::lang_start"))),
        rule(ProcessEntry, Function, Contains(s("__rust_begin_short_backtrace"))),
        // Nothing to show.
        rule(Unresolved, Function, Equals(s(UNRESOLVED_PLACEHOLDER))),
        rule(Unresolved, Function, Equals(String::new())),
        rule(Unresolved, File, Equals(s(UNRESOLVED_PLACEHOLDER))),
        rule(Unresolved, File, Equals(String::new())),
        // Capture, build, persist, send and handle.
        rule(InternalPipeline, Function, StartsWith(s("crashtrace::collector::"))),
        rule(InternalPipeline, Function, StartsWith(s("crashtrace::crash_info::"))),
        rule(InternalPipeline, Function, StartsWith(s("crashtrace::export::"))),
    ]
}

/// Applies a rule set; a frame is dropped as soon as any rule matches it.
///
/// Function rules are written against demangled names. A frame whose name is still mangled is
/// also checked in its demangled form, so the result doesn't depend on the demangling setting.
#[derive(Debug, Clone, Copy)]
pub struct FrameFilter<'a> {
    rules: &'a [FilterRule],
}

impl<'a> FrameFilter<'a> {
    pub fn new(rules: &'a [FilterRule]) -> Self {
        Self { rules }
    }

    pub fn matching_rule(&self, frame: &StackFrame) -> Option<&'a FilterRule> {
        let demangled = demangle(frame.function());
        self.rules.iter().find(|rule| {
            rule.matches(frame)
                || demangled
                    .as_deref()
                    .is_some_and(|name| rule.matches_function(name))
        })
    }

    pub fn keep(&self, frame: &StackFrame) -> bool {
        self.matching_rule(frame).is_none()
    }

    /// Keeps the surviving frames in their original order.
    pub fn filter(&self, frames: Vec<StackFrame>) -> Vec<StackFrame> {
        frames
            .into_iter()
            .filter(|frame| match self.matching_rule(frame) {
                None => true,
                Some(rule) => {
                    tracing::debug!(
                        category = ?rule.category,
                        file = frame.file(),
                        function = frame.function(),
                        "Excluding frame"
                    );
                    false
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(file: &str, function: &str) -> StackFrame {
        StackFrame::new(file, 10, function)
    }

    fn sample() -> Vec<StackFrame> {
        vec![
            frame(
                "/home/me/.cargo/registry/src/index.crates.io-6f17d22bba15001f/backtrace-0.3.74/src/backtrace/libunwind.rs",
                "backtrace::backtrace::libunwind::trace",
            ),
            frame(
                "/root/crate/crashtrace/src/collector/crash_handler.rs",
                "crashtrace::collector::crash_handler::handle_posix_sigaction",
            ),
            frame("??", "__restore_rt"),
            frame("/srv/app/src/main.rs", "app::inner"),
            frame("??", "??"),
            frame("/srv/app/src/main.rs", "app::middle"),
            frame("/srv/app/src/main.rs", "app::outer"),
            frame(
                "/rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/core/src/ops/function.rs",
                "core::ops::function::FnOnce::call_once",
            ),
            frame(
                "/rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/std/src/rt.rs",
                "std::rt::lang_start::{{closure}}",
            ),
            frame("../csu/libc-start.c", "__libc_start_main_impl"),
            frame("??", "_start"),
        ]
    }

    #[test]
    fn test_default_rules_keep_user_frames_only() {
        let rules = default_filter_rules();
        let filter = FrameFilter::new(&rules);
        let kept = filter.filter(sample());
        let functions: Vec<&str> = kept.iter().map(|f| f.function()).collect();
        assert_eq!(functions, vec!["app::inner", "app::middle", "app::outer"]);
    }

    #[test]
    fn test_rule_categories() {
        let rules = default_filter_rules();
        let filter = FrameFilter::new(&rules);
        let category = |file: &str, function: &str| {
            filter
                .matching_rule(&frame(file, function))
                .map(|rule| rule.category)
        };
        assert_eq!(
            category("/x/backtrace-rs/src/lib.rs", "f"),
            Some(RuleCategory::ReportingInfrastructure)
        );
        assert_eq!(
            category("/usr/lib/libc.so.6", "f"),
            Some(RuleCategory::SystemLibrary)
        );
        assert_eq!(category("/src/a.rs", "_start"), Some(RuleCategory::ProcessEntry));
        assert_eq!(category("/src/a.rs", "??"), Some(RuleCategory::Unresolved));
        assert_eq!(
            category("/src/a.rs", "crashtrace::export::persister::save"),
            Some(RuleCategory::InternalPipeline)
        );
        assert_eq!(category("/src/a.rs", "a::f"), None);
    }

    #[test]
    fn test_mangled_names_are_matched_demangled() {
        let rules = default_filter_rules();
        let filter = FrameFilter::new(&rules);
        let category = |function: &str| {
            filter
                .matching_rule(&frame("/src/a.rs", function))
                .map(|rule| rule.category)
        };
        assert_eq!(
            category("_ZN10crashtrace9collector13stack_capture7capture17h0123456789abcdefE"),
            Some(RuleCategory::InternalPipeline)
        );
        assert_eq!(
            category("_ZN3std2rt10lang_start17h7a87e81ecc4a9d6cE"),
            Some(RuleCategory::ProcessEntry)
        );
        assert_eq!(
            category("_ZN9backtrace5trace17h0123456789abcdefE"),
            Some(RuleCategory::ReportingInfrastructure)
        );
        assert_eq!(category("_ZN3app5inner17h0123456789abcdefE"), None);
    }

    #[test]
    fn test_system_library_rules_spare_user_files() {
        let rules = default_filter_rules();
        let filter = FrameFilter::new(&rules);
        assert!(filter.keep(&frame("/srv/app/src/libcalc.rs", "app::calc")));
        assert!(filter.keep(&frame("/srv/libcore_utils/src/lib.rs", "utils::f")));
        for file in [
            "/lib/x86_64-linux-gnu/libc.so.6",
            "/usr/src/glibc/stdlib/abort.c",
            "/build/libc-2.35/signal/raise.c",
        ] {
            assert!(!filter.keep(&frame(file, "f")), "{file}");
        }
    }

    #[test]
    fn test_filter_is_idempotent() {
        let rules = default_filter_rules();
        let filter = FrameFilter::new(&rules);
        let once = filter.filter(sample());
        let twice = filter.filter(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_custom_rules() {
        let rules = vec![FilterRule::new(
            RuleCategory::InternalPipeline,
            FrameField::Function,
            Pattern::Contains("middle".to_string()),
        )];
        let filter = FrameFilter::new(&rules);
        let kept = filter.filter(sample());
        assert!(kept.iter().all(|f| f.function() != "app::middle"));
        assert!(kept.iter().any(|f| f.function() == "app::inner"));

        let no_rules = FrameFilter::new(&[]);
        assert_eq!(no_rules.filter(sample()), sample());
    }

    #[test]
    fn test_rules_serde() {
        let rules = default_filter_rules();
        let json = serde_json::to_string(&rules).unwrap();
        assert!(json.contains("\"match\":\"starts_with\""));
        let back: Vec<FilterRule> = serde_json::from_str(&json).unwrap();
        assert_eq!(rules, back);
    }
}
