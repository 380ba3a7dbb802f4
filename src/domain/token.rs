//! Playback access tokens: persisted rows, signed claims and verdicts.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by the signed credential wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackClaims {
    /// Opaque identifier of the persisted token row.
    pub token_id: String,
    pub video_id: Uuid,
    pub user_id: Uuid,
    pub chapter_id: Uuid,
    pub course_id: Uuid,
    pub ip: String,
    pub iat: i64,
    pub exp: i64,
}

/// One issued playback credential. The row is authoritative; the signed
/// wrapper only lets tampered input be rejected without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token_id: String,
    pub video_id: Uuid,
    pub user_id: Uuid,
    pub issued_ip: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// A token is usable iff it is not revoked, not expired, and presented
    /// from the IP it was issued to. Checks run in that order.
    pub fn check(&self, request_ip: &str, now: DateTime<Utc>) -> Result<(), TokenInvalid> {
        if self.is_revoked {
            return Err(TokenInvalid::Revoked);
        }
        if now >= self.expires_at {
            return Err(TokenInvalid::Expired);
        }
        if self.issued_ip != request_ip {
            return Err(TokenInvalid::IpMismatch);
        }
        Ok(())
    }
}

/// Why a credential was rejected. A verdict, not an error: validation never
/// fails loudly on hostile input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenInvalid {
    /// Malformed, tampered, or referencing no known token.
    Invalid,
    Expired,
    Revoked,
    IpMismatch,
}

/// Successful validation: what playback may proceed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackGrant {
    pub video_id: Uuid,
    pub user_id: Uuid,
}

/// Opaque token identifier: 32 random bytes, hex-encoded.
pub fn new_token_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(now: DateTime<Utc>) -> AccessToken {
        AccessToken {
            token_id: new_token_id(),
            video_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            issued_ip: "10.0.0.1".into(),
            issued_at: now,
            expires_at: now + Duration::seconds(7200),
            is_revoked: false,
            access_count: 0,
            last_accessed_at: None,
        }
    }

    #[test]
    fn fresh_token_is_usable_from_issuing_ip() {
        let now = Utc::now();
        assert_eq!(token(now).check("10.0.0.1", now), Ok(()));
    }

    #[test]
    fn revocation_wins_over_other_reasons() {
        let now = Utc::now();
        let mut t = token(now);
        t.is_revoked = true;
        // Revoked even when it would also be expired and from the wrong IP.
        assert_eq!(
            t.check("10.9.9.9", now + Duration::seconds(9000)),
            Err(TokenInvalid::Revoked)
        );
    }

    #[test]
    fn expires_exactly_at_ttl_boundary() {
        let now = Utc::now();
        let t = token(now);
        assert_eq!(t.check("10.0.0.1", now + Duration::seconds(7199)), Ok(()));
        assert_eq!(
            t.check("10.0.0.1", now + Duration::seconds(7200)),
            Err(TokenInvalid::Expired)
        );
        assert_eq!(
            t.check("10.0.0.1", now + Duration::seconds(7201)),
            Err(TokenInvalid::Expired)
        );
    }

    #[test]
    fn other_ip_is_rejected_even_before_expiry() {
        let now = Utc::now();
        assert_eq!(
            token(now).check("10.0.0.2", now),
            Err(TokenInvalid::IpMismatch)
        );
    }

    #[test]
    fn token_ids_are_64_hex_chars_and_unique() {
        let a = new_token_id();
        let b = new_token_id();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
