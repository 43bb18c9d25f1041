//! Environment-driven knobs shared by backends and suites.
//!
//! Values are parsed once per process; malformed values fall back to defaults with a warning.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

const DEFAULT_SEED: u64 = 0x5eed;

static BNORM_SEED: OnceLock<u64> = OnceLock::new();
static BNORM_LARGE: OnceLock<bool> = OnceLock::new();
static BNORM_ARCH_WHITELIST: OnceLock<Option<Vec<String>>> = OnceLock::new();

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn parse_seed(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => trimmed.parse().ok(),
    }
}

pub(crate) fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Base seed for host tensor generation (`BNORM_SEED`, decimal or `0x` hex).
pub fn base_seed() -> u64 {
    *BNORM_SEED.get_or_init(|| match env::var("BNORM_SEED") {
        Ok(value) if !value.trim().is_empty() => parse_seed(&value).unwrap_or_else(|| {
            log::warn!("ignoring malformed BNORM_SEED={value:?}, using {DEFAULT_SEED:#x}");
            DEFAULT_SEED
        }),
        _ => DEFAULT_SEED,
    })
}

/// Whether the large network runs in full (`BNORM_LARGE`, default on).
pub fn large_networks_enabled() -> bool {
    *BNORM_LARGE.get_or_init(|| match env::var("BNORM_LARGE") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => true,
    })
}

/// Architecture whitelist replacement from `BNORM_ARCH_WHITELIST`, if set and non-empty.
pub fn arch_whitelist_override() -> Option<&'static [String]> {
    BNORM_ARCH_WHITELIST
        .get_or_init(|| match env::var("BNORM_ARCH_WHITELIST") {
            Ok(value) => {
                let archs = parse_list(&value);
                (!archs.is_empty()).then_some(archs)
            }
            Err(_) => None,
        })
        .as_deref()
}

/// Explicit tolerance override file from `BNORM_TOLERANCE_CONFIG`.
pub fn tolerance_config_path() -> Option<PathBuf> {
    env::var_os("BNORM_TOLERANCE_CONFIG")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_truthy_values() {
        assert!(parse_bool("1"));
        assert!(parse_bool(" Yes "));
        assert!(parse_bool("ON"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }

    #[test]
    fn parses_decimal_and_hex_seeds() {
        assert_eq!(parse_seed("42"), Some(42));
        assert_eq!(parse_seed("0x5eed"), Some(0x5eed));
        assert_eq!(parse_seed("0XFF"), Some(255));
        assert_eq!(parse_seed("seed"), None);
    }

    #[test]
    fn splits_comma_lists() {
        assert_eq!(parse_list("gfx90a, gfx942,,host "), ["gfx90a", "gfx942", "host"]);
        assert!(parse_list(" , ").is_empty());
    }
}
