//! Session identity.

use serde::{Deserialize, Serialize};
use std::fmt;

const SUFFIX_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Identifier for one quiet session.
///
/// Format: `qs-YYYYMMDD-HHMMSS-XXXX` (UTC start time plus a random base32
/// suffix). Example: `qs-20260115-143022-a7xq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new session ID stamped with the current time.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        SessionId(format!(
            "qs-{}-{}",
            now.format("%Y%m%d-%H%M%S"),
            random_suffix()
        ))
    }

    /// Validate an existing session ID string.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("qs-")?;
        let mut parts = rest.split('-');
        let date = parts.next()?;
        let time = parts.next()?;
        let suffix = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let digits = |part: &str, len: usize| {
            part.len() == len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(date, 8) || !digits(time, 6) {
            return None;
        }
        if suffix.len() != 4 || !suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)) {
            return None;
        }
        Some(SessionId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Four base32 characters taken from 20 random bits.
fn random_suffix() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let value = u32::from_be_bytes([0, bytes[13], bytes[14], bytes[15]]) & 0x000F_FFFF;
    (0..4)
        .rev()
        .map(|i| SUFFIX_ALPHABET[((value >> (i * 5)) & 0x1F) as usize] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let sid = SessionId::new();
        assert!(sid.as_str().starts_with("qs-"));
        assert_eq!(sid.as_str().len(), 23);
        assert_eq!(SessionId::parse(sid.as_str()), Some(sid));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(SessionId::parse("qs-20260115-143022-a7xq").is_some());
        assert!(SessionId::parse("pt-20260115-143022-a7xq").is_none());
        assert!(SessionId::parse("qs-2026011-143022-a7xq").is_none());
        assert!(SessionId::parse("qs-20260115-143022-A7XQ").is_none());
        assert!(SessionId::parse("qs-20260115-143022-a7xq-1").is_none());
        assert!(SessionId::parse("qs-20260115-143022-a1xq").is_none());
    }

    #[test]
    fn test_suffixes_vary() {
        let ids: std::collections::HashSet<String> =
            (0..32).map(|_| random_suffix()).collect();
        assert!(ids.len() > 1);
    }
}
