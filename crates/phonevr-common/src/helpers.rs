//! Common helper functions for PhoneVR.

/// Reads a boolean flag from the environment.
///
/// `1`, `true`, `yes` and `on` (any case) are true, any other value is false.
/// An unset variable yields `default`.
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

/// Reads a float from the environment, ignoring unparsable values.
pub fn env_f32(name: &str) -> Option<f32> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_truthy() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool(" YES "));
        assert!(parse_bool("On"));
    }

    #[test]
    fn test_parse_bool_falsy() {
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
        assert!(!parse_bool("enabled"));
    }

    #[test]
    fn test_env_bool_default_when_unset() {
        assert!(env_bool("PHONEVR_TEST_SURELY_UNSET_FLAG", true));
        assert!(!env_bool("PHONEVR_TEST_SURELY_UNSET_FLAG", false));
    }

    #[test]
    fn test_env_f32_unset() {
        assert_eq!(env_f32("PHONEVR_TEST_SURELY_UNSET_FLOAT"), None);
    }
}
