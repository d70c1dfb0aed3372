use crate::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a stored blob.
///
/// Only lowercase ASCII letters and digits are accepted, which keeps ids safe to use
/// directly as file names and URL path segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId(String);

impl BlobId {
    pub fn parse(raw: &str) -> Result<Self> {
        if is_valid_blob_id(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(FleetError::InvalidBlobId(raw.to_string()))
        }
    }

    /// Parses a download-style id, dropping a trailing file extension first
    /// (`abc123.png` resolves to `abc123`).
    pub fn parse_stripping_extension(raw: &str) -> Result<Self> {
        Self::parse(strip_extension(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BlobId {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self> {
        if is_valid_blob_id(&value) {
            Ok(Self(value))
        } else {
            Err(FleetError::InvalidBlobId(value))
        }
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

pub fn is_valid_blob_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit())
}

/// Removes the last `.ext` suffix, if any. A leading dot is not an extension.
pub fn strip_extension(raw: &str) -> &str {
    match raw.rfind('.') {
        Some(index) if index > 0 => &raw[..index],
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_lowercase_alphanumeric() {
        assert_eq!(BlobId::parse("abc123").unwrap().as_str(), "abc123");
        assert!(BlobId::parse("0").is_ok());
    }

    #[test]
    fn test_rejects_everything_else() {
        for raw in ["", "ABC", "a-b", "a.b", "../etc", "a/b", "a b", "ä"] {
            assert!(
                matches!(BlobId::parse(raw), Err(FleetError::InvalidBlobId(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("abc123.png"), "abc123");
        assert_eq!(strip_extension("abc123.tar.gz"), "abc123.tar");
        assert_eq!(strip_extension("abc123"), "abc123");
        assert_eq!(strip_extension(".hidden"), ".hidden");

        let id = BlobId::parse_stripping_extension("deadbeef.jpg").unwrap();
        assert_eq!(id.as_str(), "deadbeef");
        assert!(BlobId::parse_stripping_extension("abc.tar.gz").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let id: BlobId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
        assert!(serde_json::from_str::<BlobId>("\"A/B\"").is_err());
    }
}
