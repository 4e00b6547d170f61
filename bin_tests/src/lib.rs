// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for the end-to-end tests, which run `crashing_test_app` in a child process and
//! inspect how it died and what it left behind.

use std::fs;
use std::path::{Path, PathBuf};

/// Every crash artifact (`crash_<unix-timestamp>[_<n>].log`) in `dir`, sorted by name.
pub fn crash_artifacts(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut artifacts = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_artifact_name(name) {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    Ok(artifacts)
}

pub fn is_artifact_name(name: &str) -> bool {
    let Some(stem) = name
        .strip_prefix("crash_")
        .and_then(|rest| rest.strip_suffix(".log"))
    else {
        return false;
    };
    let (timestamp, suffix) = match stem.split_once('_') {
        Some((timestamp, suffix)) => (timestamp, Some(suffix)),
        None => (stem, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(timestamp) && suffix.map_or(true, all_digits)
}

/// The `N` of the `Stack trace (N frames):` line of a text artifact.
pub fn artifact_frame_count(text: &str) -> Option<usize> {
    text.lines()
        .find_map(|line| line.strip_prefix("Stack trace ("))
        .and_then(|rest| rest.strip_suffix(" frames):"))
        .and_then(|n| n.parse().ok())
}

#[macro_export]
macro_rules! timeit {
    ($op_name:literal, $op:block) => {{
        let start = std::time::Instant::now();
        let res = $op;
        let delta = start.elapsed();
        println!(
            concat!($op_name, " took {} ms"),
            delta.as_secs_f64() * 1000.0
        );
        res
    }};
}
