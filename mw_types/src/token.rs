use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TokenClaims {
    iat: Option<i64>,
    exp: Option<i64>,
}

/// A short-lived access token attached to a fetched listing.
///
/// Three dot-separated parts; the middle part is base64url JSON carrying
/// `iat`/`exp` Unix timestamps. Anything malformed is treated as already
/// expired rather than an error, so a bad token never aborts a fetch.
#[derive(Debug, Clone)]
pub struct AccessToken {
    raw: String,
    issued_at: Option<i64>,
    expires_at: Option<i64>,
}

impl AccessToken {
    /// Parse never fails; unparsable claims simply yield an expired token.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let claims = Self::decode_claims(&raw);

        match claims {
            Some(TokenClaims { iat: Some(iat), exp: Some(exp) }) if exp > iat && iat > 0 => {
                Self { raw, issued_at: Some(iat), expires_at: Some(exp) }
            }
            _ => Self { raw, issued_at: None, expires_at: None },
        }
    }

    fn decode_claims(raw: &str) -> Option<TokenClaims> {
        let mut parts = raw.split('.');
        let _header = parts.next()?;
        let payload = parts.next()?;
        parts.next()?;

        // Some issuers pad the segment; strip before decoding.
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// True when the token is unusable at `now` (Unix seconds). Tokens
    /// without valid claims are always expired.
    pub fn is_expired(&self, now: i64) -> bool {
        match self.expires_at {
            Some(exp) => now >= exp,
            None => true,
        }
    }

    /// Seconds of validity left at `now`; zero for expired or malformed.
    pub fn remaining_secs(&self, now: i64) -> i64 {
        self.expires_at.map(|exp| (exp - now).max(0)).unwrap_or(0)
    }
}
