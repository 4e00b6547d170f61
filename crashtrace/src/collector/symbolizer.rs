// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::crash_info::ResolvedSymbol;
use backtrace::Symbol;
use std::ffi::c_void;

/// Maps a raw return address to whatever `{file, line, function}` information is available.
/// Never fails: an address nothing is known about yields [`ResolvedSymbol::unresolved`].
pub trait SymbolResolver {
    fn resolve(&self, addr: usize) -> ResolvedSymbol;
}

/// Resolves addresses against the debug information of the running process.
#[derive(Debug, Clone, Copy)]
pub struct InProcessResolver {
    demangle: bool,
    synchronized: bool,
}

impl InProcessResolver {
    pub fn new(demangle: bool) -> Self {
        Self {
            demangle,
            synchronized: true,
        }
    }

    /// A resolver that skips the `backtrace` crate's global lock, for use in a signal handler
    /// where another thread may be holding it forever.
    ///
    /// SAFETY:
    ///     Resolution is not signal safe; this is tolerated in the crash path only.
    pub unsafe fn unsynchronized(demangle: bool) -> Self {
        Self {
            demangle,
            synchronized: false,
        }
    }
}

impl SymbolResolver for InProcessResolver {
    fn resolve(&self, addr: usize) -> ResolvedSymbol {
        let mut resolved = None;
        // Inlined frames produce several symbols for one address; the first is the innermost.
        let mut on_symbol = |symbol: &Symbol| {
            if resolved.is_none() {
                resolved = Some(to_resolved(symbol));
            }
        };
        let addr = addr as *mut c_void;
        if self.synchronized {
            backtrace::resolve(addr, &mut on_symbol);
        } else {
            // SAFETY: only reachable through `InProcessResolver::unsynchronized`.
            unsafe { backtrace::resolve_unsynchronized(addr, &mut on_symbol) };
        }
        let mut resolved = resolved.unwrap_or_default();
        if self.demangle {
            resolved.demangle_name();
        }
        resolved
    }
}

fn to_resolved(symbol: &Symbol) -> ResolvedSymbol {
    let function = symbol.name().map(|name| match name.as_str() {
        Some(raw) => raw.to_string(),
        None => String::from_utf8_lossy(name.as_bytes()).into_owned(),
    });
    ResolvedSymbol {
        file: symbol.filename().map(|path| path.display().to_string()),
        line: symbol.lineno(),
        function,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn known_function() -> usize {
        known_function as usize
    }

    #[test]
    fn test_resolve_known_address() {
        // Step into the function body so the address is inside it.
        let addr = known_function() + 1;
        let symbol = InProcessResolver::new(true).resolve(addr);
        let function = symbol.function.unwrap_or_default();
        assert!(function.contains("known_function"), "{function}");
    }

    #[test]
    fn test_resolve_garbage_address() {
        let symbol = InProcessResolver::new(true).resolve(1);
        assert_eq!(symbol, ResolvedSymbol::unresolved());
    }

    #[test]
    fn test_resolve_without_demangling() {
        let addr = known_function() + 1;
        let symbol = InProcessResolver::new(false).resolve(addr);
        if let Some(function) = symbol.function {
            assert!(!function.is_empty());
        }
    }
}
