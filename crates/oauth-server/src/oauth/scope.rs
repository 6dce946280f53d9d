//! Scope parameter parsing

use crate::config::Config;

use super::error::FieldError;

/// Parses a space separated `scope` parameter.
///
/// Every scope must be known to the server. The result is sorted and
/// deduplicated.
pub fn parse_scopes(value: Option<&str>, config: &Config) -> Result<Vec<String>, FieldError> {
    let mut scopes: Vec<String> = value
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    if scopes.is_empty() {
        return Err(FieldError::required("scope"));
    }

    if let Some(unknown) = scopes.iter().find(|s| !config.is_known_scope(s)) {
        return Err(FieldError::new(
            "scope",
            format!("\"{}\" is not one of the possible choices", unknown),
        ));
    }

    scopes.sort();
    scopes.dedup();
    Ok(scopes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scopes() {
        let config = Config::default();

        let scopes = parse_scopes(
            Some("  profile:read bookmarks:read\tprofile:read "),
            &config,
        )
        .unwrap();
        assert_eq!(scopes, vec!["bookmarks:read", "profile:read"]);
    }

    #[test]
    fn test_parse_scopes_errors() {
        let config = Config::default();

        assert_eq!(parse_scopes(None, &config), Err(FieldError::required("scope")));
        assert_eq!(parse_scopes(Some("   "), &config), Err(FieldError::required("scope")));

        let err = parse_scopes(Some("bookmarks:read admin"), &config).unwrap_err();
        assert_eq!(err.field, "scope");
        assert!(err.message.contains("admin"));
    }
}
