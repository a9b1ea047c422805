//! Tokens produced by a physical (or injected) scan.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum TokenKind {
    Pn532,
    Acr122u,
    File,
    Api,
    #[default]
    Unknown,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Pn532 => "PN532",
            TokenKind::Acr122u => "ACR122U",
            TokenKind::File => "File",
            TokenKind::Api => "API",
            TokenKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scan result.
///
/// Equality is structural over kind, uid, text and scan time, which is what
/// [`SharedState`] uses to drop duplicate scans. The API flag is provenance,
/// not content, and is left out. Use [`Token::fingerprint`] to ask whether
/// two scans refer to the same software regardless of when they happened.
///
/// [`SharedState`]: crate::SharedState
#[derive(Debug, Clone, Default, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Hardware identifier. Empty for synthetic tokens.
    pub uid: String,
    /// Payload, interpreted downstream as a launch command.
    pub text: String,
    pub scan_time: Option<DateTime<Utc>>,
    /// Set when the token was injected through the API instead of a reader.
    pub from_api: bool,
}

impl Token {
    pub fn new(kind: TokenKind, uid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            uid: uid.into(),
            text: text.into(),
            scan_time: Some(Utc::now()),
            from_api: false,
        }
    }

    pub fn from_api(uid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from_api: true,
            ..Self::new(TokenKind::Api, uid, text)
        }
    }

    /// A token with neither uid nor payload carries no identity; readers
    /// use it to report that the card left the reader.
    pub fn is_blank(&self) -> bool {
        self.uid.is_empty() && self.text.is_empty()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut context = md5::Context::new();
        context.consume(self.uid.as_bytes());
        context.consume([0u8]);
        context.consume(self.text.as_bytes());
        Fingerprint(format!("{:x}", context.compute()))
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.uid == other.uid
            && self.text == other.text
            && self.scan_time == other.scan_time
    }
}

impl Eq for Token {}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[uid={} text={:?}]", self.kind, self.uid, self.text)
    }
}

/// Session identity of a token: a digest of its uid and text only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fingerprint_ignores_scan_time_and_kind() {
        let first = Token::new(TokenKind::Pn532, "04aabbcc", "snes/mario.sfc");
        let mut second = Token::new(TokenKind::Acr122u, "04aabbcc", "snes/mario.sfc");
        second.scan_time = first.scan_time.map(|t| t + Duration::seconds(30));

        assert_ne!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn equality_ignores_api_flag() {
        let scanned = Token::new(TokenKind::Api, "04aa", "snes/mario.sfc");
        let injected = Token {
            from_api: true,
            ..scanned.clone()
        };
        assert_eq!(scanned, injected);

        let later = Token {
            scan_time: scanned.scan_time.map(|t| t + Duration::milliseconds(1)),
            ..scanned.clone()
        };
        assert_ne!(scanned, later);
    }

    #[test]
    fn fingerprint_separates_uid_and_text() {
        let first = Token::new(TokenKind::Pn532, "ab", "c");
        let second = Token::new(TokenKind::Pn532, "a", "bc");
        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn blank_token_has_no_identity() {
        assert!(Token::default().is_blank());
        assert!(!Token::new(TokenKind::File, "", "**launch.random").is_blank());
    }

    #[test]
    fn kind_renders_reader_names() {
        assert_eq!(TokenKind::Pn532.to_string(), "PN532");
        assert_eq!(TokenKind::Acr122u.as_str(), "ACR122U");
        assert_eq!(TokenKind::default().as_str(), "Unknown");
    }
}
