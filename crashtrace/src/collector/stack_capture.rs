// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::shared::constants::MAX_BACKTRACE_FRAMES;
use backtrace::Frame;

/// Raw return addresses, innermost first.
///
/// Fixed-size so that filling it from a signal handler never touches the allocator. Resolution of
/// the addresses into names is a separate, later step.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawStack {
    addrs: [usize; MAX_BACKTRACE_FRAMES],
    len: usize,
}

impl std::fmt::Debug for RawStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.as_slice().iter().map(|addr| format!("{addr:#x}")))
            .finish()
    }
}

impl Default for RawStack {
    fn default() -> Self {
        Self::new()
    }
}

impl RawStack {
    pub const fn new() -> Self {
        Self {
            addrs: [0; MAX_BACKTRACE_FRAMES],
            len: 0,
        }
    }

    /// Anything past [`MAX_BACKTRACE_FRAMES`] is dropped.
    pub fn from_addresses(addrs: &[usize]) -> Self {
        let mut stack = Self::new();
        for addr in addrs {
            if !stack.push(*addr) {
                break;
            }
        }
        stack
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.addrs[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, addr: usize) -> bool {
        if self.len >= MAX_BACKTRACE_FRAMES {
            return false;
        }
        self.addrs[self.len] = addr;
        self.len += 1;
        true
    }
}

/// Per-frame callback shared by both capture flavours.
struct Collector {
    stack: RawStack,
    skip: usize,
    limit: usize,
    seen: usize,
}

impl Collector {
    fn new(skip: usize, max_frames: usize) -> Self {
        Self {
            stack: RawStack::new(),
            skip,
            limit: max_frames.min(MAX_BACKTRACE_FRAMES),
            seen: 0,
        }
    }

    fn visit(&mut self, frame: &Frame) -> bool {
        let index = self.seen;
        self.seen += 1;
        if index < self.skip {
            return true;
        }
        if self.stack.len() >= self.limit {
            return false;
        }
        self.stack.push(frame.ip() as usize) && self.stack.len() < self.limit
    }
}

/// Records up to `max_frames` return addresses of the calling thread, after dropping the
/// innermost `skip` ones. Deeper stacks are truncated.
#[inline(never)]
pub fn capture(skip: usize, max_frames: usize) -> RawStack {
    let mut collector = Collector::new(skip, max_frames);
    backtrace::trace(|frame| collector.visit(frame));
    collector.stack
}

/// Same as [`capture`], without taking the `backtrace` crate's global lock.
///
/// SAFETY:
///     Must not race with another unwind of this process that holds the lock, which is the
///     situation inside a fatal signal handler where we cannot wait for it anyway.
/// SIGNAL SAFETY:
///     Walking the frames does not allocate, but it is not guaranteed to be signal safe.
///     https://github.com/rust-lang/backtrace-rs/issues/414
#[inline(never)]
pub unsafe fn capture_unsynchronized(skip: usize, max_frames: usize) -> RawStack {
    let mut collector = Collector::new(skip, max_frames);
    backtrace::trace_unsynchronized(|frame| collector.visit(frame));
    collector.stack
}
