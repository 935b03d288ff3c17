//! Name validation shared by the API and the coordinator.

use std::sync::LazyLock;

use regex::Regex;

static APP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-z][a-z0-9-]{0,62}$").expect("app name pattern"));

/// Rule text surfaced in validation errors.
pub const APP_NAME_RULE: &str =
    "application names must start with a lowercase letter and contain only \
     lowercase letters, digits and dashes, up to 63 characters";

/// Whether `name` is usable as an application name.
///
/// Names double as git repository names, provisioner environment names
/// and file names, so the rule is strict: lowercase alphanumerics and
/// dashes, starting with a letter, at most 63 characters.
pub fn valid_app_name(name: &str) -> bool {
    APP_NAME.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["blog", "a", "my-app-2", "x9", "a-b-c"] {
            assert!(valid_app_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_bad_names() {
        for name in ["", "Blog", "9lives", "-app", "my_app", "app!", "app name"] {
            assert!(!valid_app_name(name), "{name} should be invalid");
        }
    }

    #[test]
    fn enforces_length_limit() {
        let max = format!("a{}", "b".repeat(62));
        assert!(valid_app_name(&max));
        let over = format!("a{}", "b".repeat(63));
        assert!(!valid_app_name(&over));
    }
}
