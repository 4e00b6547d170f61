// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod api;
mod crash_handler;
pub mod emitters;
pub mod frame_filter;
pub mod pipeline;
mod signal_handler_manager;
pub mod stack_capture;
pub mod symbolizer;

pub use api::*;
pub use crash_handler::{
    disable, dispatch_state, enable, is_enabled, update_config, CrashHandlerError, DispatchState,
};
