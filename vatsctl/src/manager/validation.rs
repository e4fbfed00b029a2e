//! Field rules for instance names and extension input.

use crate::errors::{Error, Result};

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_CALLER_ID_LEN: usize = 128;
pub const MAX_ACCOUNT_CODE_LEN: usize = 64;
pub const MAX_CONTEXT_LEN: usize = 80;

/// Trim and check an instance name. Uniqueness is checked by the manager.
pub fn instance_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    let invalid = |reason: &str| Error::InvalidName {
        name: raw.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(invalid(&format!("name must be at most {MAX_NAME_LEN} characters")));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("name must not contain control characters"));
    }
    Ok(name.to_string())
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+')
}

/// SIP usernames are dial-plan identifiers, so the alphabet is kept narrow.
pub fn username(raw: &str) -> Result<String> {
    let len = raw.chars().count();
    if len == 0 || len > MAX_USERNAME_LEN {
        return Err(Error::invalid_input(
            "username",
            format!("must be between 1 and {MAX_USERNAME_LEN} characters"),
        ));
    }
    if let Some(bad) = raw.chars().find(|c| !is_username_char(*c)) {
        return Err(Error::invalid_input(
            "username",
            format!("character {bad:?} is not allowed; use letters, digits, '.', '_', '-' or '+'"),
        ));
    }
    Ok(raw.to_string())
}

pub fn password(raw: &str) -> Result<()> {
    let len = raw.chars().count();
    if len == 0 || len > MAX_PASSWORD_LEN {
        return Err(Error::invalid_input(
            "password",
            format!("must be between 1 and {MAX_PASSWORD_LEN} characters"),
        ));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::invalid_input(
            "password",
            "must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

pub fn caller_id(raw: &str) -> Result<String> {
    let value = raw.trim();
    if value.is_empty() || value.chars().count() > MAX_CALLER_ID_LEN {
        return Err(Error::invalid_input(
            "caller_id",
            format!("must be between 1 and {MAX_CALLER_ID_LEN} characters"),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::invalid_input("caller_id", "must not contain control characters"));
    }
    Ok(value.to_string())
}

/// Optional metadata: blank becomes `None`, otherwise length-limited.
pub fn optional_field(field: &str, raw: Option<&str>, max_len: usize) -> Result<Option<String>> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > max_len {
        return Err(Error::invalid_input(field, format!("must be at most {max_len} characters")));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::invalid_input(field, "must not contain control characters"));
    }
    Ok(Some(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_name_is_trimmed() {
        assert_eq!(instance_name("  office-pbx ").unwrap(), "office-pbx");
        assert!(matches!(instance_name("   "), Err(Error::InvalidName { .. })));
        assert!(matches!(instance_name("bad\nname"), Err(Error::InvalidName { .. })));
        assert!(instance_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(instance_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_username_alphabet() {
        for ok in ["100", "alice.smith", "ops_desk-2", "+7495"] {
            assert!(username(ok).is_ok(), "{ok} should be accepted");
        }
        for bad in ["", "has space", "semi;colon", "ünïcode", "a@b"] {
            assert!(
                matches!(username(bad), Err(Error::InvalidInput { ref field, .. }) if field == "username"),
                "{bad:?} should be rejected"
            );
        }
        assert!(username(&"1".repeat(MAX_USERNAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(password("s3cr3t!").is_ok());
        assert!(password("").is_err());
        assert!(password("two words").is_err());
        assert!(password("tab\there").is_err());
        assert!(password(&"p".repeat(MAX_PASSWORD_LEN + 1)).is_err());
    }

    #[test]
    fn test_blank_optional_becomes_none() {
        assert_eq!(optional_field("context", Some("   "), MAX_CONTEXT_LEN).unwrap(), None);
        assert_eq!(optional_field("context", None, MAX_CONTEXT_LEN).unwrap(), None);
        assert_eq!(
            optional_field("context", Some(" from-internal "), MAX_CONTEXT_LEN).unwrap().as_deref(),
            Some("from-internal")
        );
        assert!(optional_field("account_code", Some(&"a".repeat(65)), MAX_ACCOUNT_CODE_LEN).is_err());
    }
}
