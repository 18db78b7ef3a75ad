//! Environment variable parsing helpers shared by service configs.

use std::str::FromStr;

/// Parse `key`, falling back to `default` when it is missing or malformed.
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    parse_env_optional(key).unwrap_or(default)
}

/// Parse `key`; `None` when missing, blank or malformed.
pub fn parse_env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| v.trim().parse().ok())
}

/// Parse `key`, reporting which variable was missing or malformed.
pub fn parse_env_required<T: FromStr>(key: &str) -> Result<T, String> {
    let raw = std::env::var(key).map_err(|_| format!("{} must be set", key))?;
    if raw.trim().is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    raw.trim()
        .parse()
        .map_err(|_| format!("Failed to parse environment variable {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_parse_env_with_default() {
        let result: u32 = parse_env_with_default("IM_NONEXISTENT_VAR_XYZ", 42);
        assert_eq!(result, 42);

        std::env::set_var("IM_TEST_PORT", " 8080 ");
        let result: u16 = parse_env_with_default("IM_TEST_PORT", 3000);
        assert_eq!(result, 8080);
        std::env::remove_var("IM_TEST_PORT");
    }

    #[test]
    #[serial_test::serial]
    fn test_parse_env_optional_blank_is_none() {
        std::env::set_var("IM_TEST_OPT", "   ");
        assert_eq!(parse_env_optional::<u32>("IM_TEST_OPT"), None);

        std::env::set_var("IM_TEST_OPT", "123");
        assert_eq!(parse_env_optional::<u32>("IM_TEST_OPT"), Some(123));
        std::env::remove_var("IM_TEST_OPT");
    }

    #[test]
    #[serial_test::serial]
    fn test_parse_env_required() {
        assert!(parse_env_required::<u32>("IM_NONEXISTENT_VAR_XYZ").is_err());

        std::env::set_var("IM_TEST_REQ", "abc");
        assert!(parse_env_required::<u32>("IM_TEST_REQ").is_err());

        std::env::set_var("IM_TEST_REQ", "456");
        assert_eq!(parse_env_required::<u32>("IM_TEST_REQ"), Ok(456));
        std::env::remove_var("IM_TEST_REQ");
    }
}
