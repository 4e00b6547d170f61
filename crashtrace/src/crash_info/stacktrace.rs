// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::shared::constants::UNRESOLVED_PLACEHOLDER;
use schemars::JsonSchema;
use serde::Serialize;
use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};

/// Whatever the symbolizer managed to recover for one address.
/// Every field is independently optional.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedSymbol {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

impl ResolvedSymbol {
    pub fn unresolved() -> Self {
        Self::default()
    }

    /// Replaces a mangled function name by its demangled form, if it has one.
    pub fn demangle_name(&mut self) {
        if let Some(name) = self.function.take() {
            self.function = Some(demangle(&name).unwrap_or(name));
        }
    }
}

/// The demangled form of `name`, or `None` when it is not a mangled symbol.
pub(crate) fn demangle(name: &str) -> Option<String> {
    Name::from(name)
        .demangle(DemangleOptions::name_only())
        .filter(|demangled| demangled != name)
}

/// One finished call-stack entry.
///
/// `file` and `function` are never empty: anything the symbolizer could not recover is replaced
/// by [`UNRESOLVED_PLACEHOLDER`], and an unknown line is `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, JsonSchema)]
pub struct StackFrame {
    file: String,
    line: u32,
    function: String,
}

impl StackFrame {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: or_placeholder(Some(file.into())),
            line,
            function: or_placeholder(Some(function.into())),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn is_unresolved(&self) -> bool {
        self.file == UNRESOLVED_PLACEHOLDER && self.function == UNRESOLVED_PLACEHOLDER
    }
}

impl From<ResolvedSymbol> for StackFrame {
    fn from(value: ResolvedSymbol) -> Self {
        Self {
            file: or_placeholder(value.file),
            line: value.line.unwrap_or(0),
            function: or_placeholder(value.function),
        }
    }
}

fn or_placeholder(value: Option<String>) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => UNRESOLVED_PLACEHOLDER.to_string(),
    }
}

#[cfg(test)]
impl super::test_utils::TestInstance for StackFrame {
    fn test_instance(seed: u64) -> Self {
        Self::new(
            format!("/src/banana{seed}.rs"),
            (2 * seed + 1) as u32,
            format!("Bar::baz{seed}"),
        )
    }
}
