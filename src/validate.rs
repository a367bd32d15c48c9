//! Input validation for identifiers that reach query text.
//!
//! Node names participate in string-built SQL fragments (the recursive CTEs in
//! [`crate::graph::query`]), so they are held to a strict whitelist. The
//! character-class and Unicode checks are defense-in-depth on top of it.

use crate::error::MemoryError;

/// Maximum length of a node name.
pub const MAX_NAME_LEN: usize = 200;

/// Maximum length of a tenant identifier.
pub const MAX_TENANT_LEN: usize = 100;

/// Control and bidi characters that are rejected outright.
const FORBIDDEN_UNICODE: [char; 5] = [
    '\u{0000}', // NUL
    '\u{202E}', // right-to-left override
    '\u{200F}', // right-to-left mark
    '\u{200B}', // zero-width space
    '\u{FFFF}', // non-character
];

/// Characters that would matter inside SQL or markup contexts.
const FORBIDDEN_ASCII: [char; 5] = ['<', '>', '"', '\'', '`'];

/// Validate an externally supplied node name.
///
/// Accepts only `^[A-Za-z0-9_-]{1,200}$`. Everything else — including
/// embedded NUL/bidi/zero-width characters and SQL/markup metacharacters —
/// is rejected with a `ValidationError`.
pub fn validate_name(name: &str) -> Result<(), MemoryError> {
    if name.is_empty() {
        return Err(MemoryError::Validation {
            field: "name",
            message: "name must not be empty".into(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(MemoryError::Validation {
            field: "name",
            message: format!("name exceeds {MAX_NAME_LEN} characters"),
        });
    }
    if name.chars().any(|c| FORBIDDEN_UNICODE.contains(&c)) {
        return Err(MemoryError::Validation {
            field: "name",
            message: "name contains a forbidden control character".into(),
        });
    }
    if name.chars().any(|c| FORBIDDEN_ASCII.contains(&c)) {
        return Err(MemoryError::Validation {
            field: "name",
            message: "name contains a forbidden metacharacter".into(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(MemoryError::Validation {
            field: "name",
            message: "name must match [A-Za-z0-9_-]".into(),
        });
    }
    Ok(())
}

/// Validate a tenant identifier. Returns the trimmed tenant.
///
/// Tenants are always forwarded as bound parameters, so only emptiness and
/// length are enforced.
pub fn validate_tenant(tenant: &str) -> Result<String, MemoryError> {
    let trimmed = tenant.trim();
    if trimmed.is_empty() {
        return Err(MemoryError::Validation {
            field: "tenant",
            message: "tenant must not be empty".into(),
        });
    }
    if trimmed.len() > MAX_TENANT_LEN {
        return Err(MemoryError::Validation {
            field: "tenant",
            message: format!("tenant exceeds {MAX_TENANT_LEN} characters"),
        });
    }
    Ok(trimmed.to_string())
}

/// Double single quotes for the rare context where a literal must be inlined
/// into SQL text. All regular queries bind parameters instead.
pub fn escape_sql(value: &str) -> String {
    value.replace('\'', "''")
}

/// Normalize an extracted entity name into whitelist form, or `None` when
/// nothing usable remains.
///
/// Extraction output is model-generated text; spaces become underscores and
/// anything outside the whitelist is dropped before [`validate_name`] runs.
pub fn normalize_entity_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() || cleaned.len() > MAX_NAME_LEN {
        return None;
    }
    validate_name(&cleaned).ok().map(|_| cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_whitelisted_names() {
        validate_name("ok_1").unwrap();
        validate_name("mem-1a2b3c4d").unwrap();
        validate_name("A").unwrap();
        validate_name(&"a".repeat(200)).unwrap();
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(201)).is_err());
    }

    #[test]
    fn rejects_forbidden_unicode() {
        assert!(validate_name("n\u{0000}").is_err());
        assert!(validate_name("n\u{202e}").is_err());
        assert!(validate_name("n\u{200f}").is_err());
        assert!(validate_name("n\u{200b}").is_err());
        assert!(validate_name("n\u{ffff}").is_err());
    }

    #[test]
    fn rejects_metacharacters() {
        for c in ['<', '>', '"', '\'', '`'] {
            assert!(validate_name(&format!("name{c}")).is_err(), "{c} must fail");
        }
    }

    #[test]
    fn rejects_non_whitelist() {
        assert!(validate_name("has space").is_err());
        assert!(validate_name("semi;colon").is_err());
        assert!(validate_name("uni\u{00e9}code").is_err());
        assert!(validate_name("x'; DROP TABLE nodes; --").is_err());
    }

    #[test]
    fn tenant_is_trimmed_and_bounded() {
        assert_eq!(validate_tenant("  u1  ").unwrap(), "u1");
        assert!(validate_tenant("   ").is_err());
        assert!(validate_tenant(&"t".repeat(101)).is_err());
    }

    #[test]
    fn escape_sql_doubles_quotes() {
        assert_eq!(escape_sql("it's"), "it''s");
        assert_eq!(escape_sql("no quotes"), "no quotes");
        assert_eq!(escape_sql("''"), "''''");
    }

    #[test]
    fn normalize_entity_names() {
        assert_eq!(normalize_entity_name("Alice").as_deref(), Some("Alice"));
        assert_eq!(
            normalize_entity_name("Acme Corp").as_deref(),
            Some("Acme_Corp")
        );
        assert_eq!(
            normalize_entity_name("  weird <tag> ").as_deref(),
            Some("weird_tag")
        );
        assert_eq!(normalize_entity_name("<><>"), None);
        assert_eq!(normalize_entity_name(""), None);
    }
}
