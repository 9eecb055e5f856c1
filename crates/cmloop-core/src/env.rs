#![forbid(unsafe_code)]

//! `CMLOOP_*` environment overrides.
//!
//! Configuration structs expose a `from_env()` constructor that starts from
//! `Default` and layers these lookups on top. A variable that is set but does
//! not parse is logged and ignored, so a typo never changes behaviour silently
//! and never aborts start-up.

use std::str::FromStr;

use tracing::warn;
use web_time::Duration;

/// Read and parse `key`. Unset variables yield `None`.
#[must_use]
pub fn read<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    parse(key, &raw)
}

/// Read a boolean flag: `1`, `true`, `yes`, `on` (and their negatives).
#[must_use]
pub fn read_flag(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    parse_flag(key, &raw)
}

/// Read a duration given in whole milliseconds.
#[must_use]
pub fn read_millis(key: &str) -> Option<Duration> {
    read::<u64>(key).map(Duration::from_millis)
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn parse_flag(key: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = raw, "ignoring unparsable environment flag");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_surrounding_whitespace() {
        assert_eq!(parse::<u32>("K", " 42 "), Some(42));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse::<f64>("K", "fast"), None);
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("K", "Yes"), Some(true));
        assert_eq!(parse_flag("K", "on"), Some(true));
        assert_eq!(parse_flag("K", "0"), Some(false));
        assert_eq!(parse_flag("K", "OFF"), Some(false));
        assert_eq!(parse_flag("K", "maybe"), None);
    }

    #[test]
    fn unset_variable_reads_as_none() {
        assert_eq!(read::<u64>("CMLOOP_TEST_SURELY_UNSET_VARIABLE"), None);
        assert_eq!(read_flag("CMLOOP_TEST_SURELY_UNSET_VARIABLE"), None);
    }
}
