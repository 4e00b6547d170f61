// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{env, time::Duration};

/// Seconds, possibly fractional. Negative or unparsable values are ignored.
pub fn duration(name: &str) -> Option<Duration> {
    let secs = env::var(name).ok()?.trim().parse::<f32>().ok()?;
    Duration::try_from_secs_f32(secs).ok()
}

pub fn str_not_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide
    static ENV_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_str_not_empty() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        std::env::set_var("CRASHTRACE_TEST_STR", "");
        assert_eq!(str_not_empty("CRASHTRACE_TEST_STR"), None);
        std::env::set_var("CRASHTRACE_TEST_STR", "value");
        assert_eq!(str_not_empty("CRASHTRACE_TEST_STR"), Some("value".to_string()));
        std::env::remove_var("CRASHTRACE_TEST_STR");
        assert_eq!(str_not_empty("CRASHTRACE_TEST_STR"), None);
    }

    #[test]
    fn test_duration() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        std::env::set_var("CRASHTRACE_TEST_DURATION", "1.5");
        assert_eq!(
            duration("CRASHTRACE_TEST_DURATION"),
            Some(Duration::from_millis(1500))
        );
        std::env::set_var("CRASHTRACE_TEST_DURATION", "-3");
        assert_eq!(duration("CRASHTRACE_TEST_DURATION"), None);
        std::env::set_var("CRASHTRACE_TEST_DURATION", "soon");
        assert_eq!(duration("CRASHTRACE_TEST_DURATION"), None);
        std::env::remove_var("CRASHTRACE_TEST_DURATION");
    }
}
