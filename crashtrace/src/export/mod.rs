// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where a finished report goes: a local text artifact and, optionally, a remote collector.

pub mod persister;
pub mod transmitter;
