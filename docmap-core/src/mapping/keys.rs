use crate::error::{OdmError, OdmResult};

/// Characters a document key may not carry, and their stored replacements.
const REPLACEMENTS: [(&str, &str); 3] = [(".", "__dot__"), ("$", "__dollar__"), ("\0", "__null__")];

/// Prepares a map key for storage.
///
/// With escaping enabled, `.`, `$` and NUL are replaced; otherwise a key that
/// the document model cannot hold is a mapping error.
pub(crate) fn escape_key(key: &str, escape: bool, owner: &str) -> OdmResult<String> {
    if escape {
        return Ok(REPLACEMENTS
            .iter()
            .fold(key.to_string(), |key, (from, to)| key.replace(from, to)));
    }
    if key.contains('.') || key.starts_with('$') || key.contains('\0') {
        return Err(OdmError::mapping(
            owner,
            format!("map key '{key}' contains '.', NUL or a leading '$'"),
        ));
    }
    Ok(key.to_string())
}

pub(crate) fn unescape_key(key: &str, escape: bool) -> String {
    if !escape {
        return key.to_string();
    }
    REPLACEMENTS
        .iter()
        .fold(key.to_string(), |key, (from, to)| key.replace(to, from))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_escaped_keys_are_restored() {
        let escaped = escape_key("a.b$c\0", true, "Order").unwrap();
        assert_eq!(escaped, "a__dot__b__dollar__c__null__");
        assert_eq!(unescape_key(&escaped, true), "a.b$c\0");
    }

    #[test]
    fn test_unescaped_mode_rejects_unsafe_keys() {
        assert!(escape_key("$set", false, "Order").unwrap_err().is_mapping());
        assert!(escape_key("a.b", false, "Order").is_err());
        assert_eq!(escape_key("a$b", false, "Order").unwrap(), "a$b");
    }
}
