use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{OdmError, OdmResult};

/// A language/country/variant triple, each part optional.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Locale {
    pub language: Option<String>,
    pub country: Option<String>,
    pub variant: Option<String>,
}

impl Locale {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Self::default()
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.country.is_none() && self.variant.is_none()
    }
}

impl FromStr for Locale {
    type Err = OdmError;

    /// Parses the underscore form `en_US_POSIX`. Empty parts are absent.
    fn from_str(tag: &str) -> OdmResult<Self> {
        let mut parts = tag.splitn(3, '_');
        let mut next = || {
            parts
                .next()
                .filter(|part| !part.is_empty())
                .map(str::to_string)
        };
        let locale = Self {
            language: next(),
            country: next(),
            variant: next(),
        };
        if locale.is_empty() && !tag.is_empty() {
            return Err(OdmError::conversion("String", "Locale", format!("'{tag}' has no parts")));
        }
        Ok(locale)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [&self.language, &self.country, &self.variant];
        let used = parts.iter().rposition(|part| part.is_some()).map_or(0, |last| last + 1);
        let tag = parts[..used]
            .iter()
            .map(|part| part.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join("_");
        f.write_str(&tag)
    }
}

/// An ISO-4217 currency, stored by its three-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Currency([u8; 3]);

impl Currency {
    /// `XXX`, the code reserved for "no currency".
    pub const NONE: Currency = Currency(*b"XXX");

    pub fn new(code: &str) -> OdmResult<Self> {
        let bytes = code.as_bytes();
        match bytes {
            [a, b, c] if bytes.iter().all(u8::is_ascii_uppercase) => Ok(Self([*a, *b, *c])),
            _ => Err(OdmError::conversion(
                "String",
                "Currency",
                format!("'{code}' is not a three-letter ISO-4217 code"),
            )),
        }
    }

    pub fn code(&self) -> &str {
        // Only constructed from ASCII uppercase letters.
        std::str::from_utf8(&self.0).unwrap_or("XXX")
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::NONE
    }
}

impl FromStr for Currency {
    type Err = OdmError;

    fn from_str(code: &str) -> OdmResult<Self> {
        Self::new(code)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_locale_tag_round_trip() {
        let locale: Locale = "en_US_POSIX".parse().unwrap();
        assert_eq!(locale, Locale::new("en").with_country("US").with_variant("POSIX"));
        assert_eq!(locale.to_string(), "en_US_POSIX");
    }

    #[test]
    fn test_locale_keeps_missing_middle_part() {
        let locale: Locale = "de__1901".parse().unwrap();
        assert_eq!(locale.country, None);
        assert_eq!(locale.variant.as_deref(), Some("1901"));
        assert_eq!(locale.to_string(), "de__1901");
    }

    #[test]
    fn test_currency_validates_code() {
        assert_eq!(Currency::new("EUR").unwrap().code(), "EUR");
        assert!(Currency::new("eur").is_err());
        assert!(Currency::new("EURO").is_err());
        assert_eq!(Currency::default().to_string(), "XXX");
    }
}
