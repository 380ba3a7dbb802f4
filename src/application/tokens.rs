//! Access token service: issues, validates, revokes and rotates the
//! credentials that gate HLS playback.
//!
//! Two representations back every credential: a signed wrapper (cheap
//! tamper rejection, no storage round-trip) and a persisted row keyed by an
//! opaque id (authoritative for revocation, expiry and IP binding).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::token::{
    new_token_id, AccessToken, PlaybackClaims, PlaybackGrant, TokenInvalid,
};
use crate::domain::video::EncryptionKey;
use crate::error::{IssueError, RepoError};
use crate::ports::entitlement::EntitlementPort;
use crate::ports::repository::{TokenRepository, VideoRepository};

/// Days before a rotated segment key is due for rotation again.
const KEY_ROTATION_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub video_id: Uuid,
    pub user_id: Uuid,
    pub chapter_id: Uuid,
    pub course_id: Uuid,
    pub ip: String,
}

#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of validating a credential. Rejections are values; the stream
/// path never sees an error for hostile input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerdict {
    Granted(PlaybackGrant),
    Denied(TokenInvalid),
}

pub struct AccessTokenService<T, V, E> {
    tokens: T,
    videos: V,
    entitlements: E,
    secret: String,
    ttl_secs: i64,
}

impl<T, V, E> AccessTokenService<T, V, E>
where
    T: TokenRepository,
    V: VideoRepository,
    E: EntitlementPort,
{
    pub fn new(
        tokens: T,
        videos: V,
        entitlements: E,
        secret: impl Into<String>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            tokens,
            videos,
            entitlements,
            secret: secret.into(),
            ttl_secs,
        }
    }

    /// Entitlement is checked once, here. Free chapters skip the check
    /// entirely; everything else needs an access grant on the course.
    pub async fn issue(&self, req: IssueRequest) -> Result<IssuedCredential, IssueError> {
        let entitled = self.entitlements.is_chapter_free(&req.chapter_id).await?
            || self
                .entitlements
                .has_access(&req.user_id, &req.course_id)
                .await?;
        if !entitled {
            debug!(user = %req.user_id, course = %req.course_id, "token issuance denied");
            return Err(IssueError::AccessDenied);
        }

        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.ttl_secs);
        let token_id = new_token_id();

        let claims = PlaybackClaims {
            token_id: token_id.clone(),
            video_id: req.video_id,
            user_id: req.user_id,
            chapter_id: req.chapter_id,
            course_id: req.course_id,
            ip: req.ip.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| IssueError::Signing(e.to_string()))?;

        self.tokens
            .insert(&AccessToken {
                token_id,
                video_id: req.video_id,
                user_id: req.user_id,
                issued_ip: req.ip,
                issued_at: now,
                expires_at,
                is_revoked: false,
                access_count: 0,
                last_accessed_at: None,
            })
            .await?;

        Ok(IssuedCredential { token, expires_at })
    }

    /// Cheap cryptographic check first, then the authoritative row:
    /// existence, revocation, expiry, IP binding, in that order. A granted
    /// validation bumps the row's access counter.
    pub async fn validate(
        &self,
        credential: &str,
        request_ip: &str,
    ) -> Result<TokenVerdict, RepoError> {
        let claims = match self.decode_claims(credential, true) {
            Ok(claims) => claims,
            Err(reason) => return Ok(TokenVerdict::Denied(reason)),
        };

        let Some(row) = self.tokens.find(&claims.token_id).await? else {
            return Ok(TokenVerdict::Denied(TokenInvalid::Invalid));
        };

        let now = Utc::now();
        if let Err(reason) = row.check(request_ip, now) {
            return Ok(TokenVerdict::Denied(reason));
        }

        self.tokens.record_access(&row.token_id, now).await?;
        Ok(TokenVerdict::Granted(PlaybackGrant {
            video_id: row.video_id,
            user_id: row.user_id,
        }))
    }

    /// Revoke the single token carried by a credential. An expired wrapper
    /// is still accepted here; only tampering is ignored.
    pub async fn revoke(&self, credential: &str) -> Result<bool, RepoError> {
        match self.decode_claims(credential, false) {
            Ok(claims) => {
                let revoked = self.tokens.revoke(&claims.token_id).await?;
                if revoked {
                    info!(token = %claims.token_id, "playback token revoked");
                }
                Ok(revoked)
            }
            Err(_) => Ok(false),
        }
    }

    pub async fn revoke_all_for_video(&self, video_id: &Uuid) -> Result<u64, RepoError> {
        let count = self.tokens.revoke_all_for_video(video_id).await?;
        info!(video = %video_id, count, "tokens revoked for video");
        Ok(count)
    }

    pub async fn revoke_all_for_user(&self, user_id: &Uuid) -> Result<u64, RepoError> {
        let count = self.tokens.revoke_all_for_user(user_id).await?;
        info!(user = %user_id, count, "tokens revoked for user");
        Ok(count)
    }

    /// New key/IV with a fresh rotation window, and a forced re-issue of
    /// every outstanding token for the video: old credentials must not be
    /// replayable against the new segment encryption.
    pub async fn rotate_encryption_key(&self, video_id: &Uuid) -> Result<EncryptionKey, RepoError> {
        let key = EncryptionKey::generate();
        self.videos
            .set_encryption_key(video_id, &key, Utc::now() + Duration::days(KEY_ROTATION_DAYS))
            .await?;
        let revoked = self.tokens.revoke_all_for_video(video_id).await?;
        info!(video = %video_id, revoked, "encryption key rotated");
        Ok(key)
    }

    /// Storage hygiene; expired rows already fail validation.
    pub async fn sweep_expired(&self) -> Result<u64, RepoError> {
        self.tokens.delete_expired(Utc::now()).await
    }

    fn decode_claims(
        &self,
        credential: &str,
        check_expiry: bool,
    ) -> Result<PlaybackClaims, TokenInvalid> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        decode::<PlaybackClaims>(
            credential,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenInvalid::Expired,
            _ => TokenInvalid::Invalid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::memory::{
        MemoryTokenRepository, MemoryVideoRepository, StaticEntitlements,
    };
    use crate::domain::video::VideoAsset;

    const SECRET: &str = "unit-test-secret";

    struct Fixture {
        service: AccessTokenService<MemoryTokenRepository, MemoryVideoRepository, StaticEntitlements>,
        tokens: MemoryTokenRepository,
        videos: MemoryVideoRepository,
        entitlements: StaticEntitlements,
        req: IssueRequest,
    }

    fn fixture_with_ttl(ttl_secs: i64) -> Fixture {
        let tokens = MemoryTokenRepository::new();
        let videos = MemoryVideoRepository::new();
        let entitlements = StaticEntitlements::new();
        let service = AccessTokenService::new(
            tokens.clone(),
            videos.clone(),
            entitlements.clone(),
            SECRET,
            ttl_secs,
        );
        let req = IssueRequest {
            video_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            chapter_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            ip: "203.0.113.7".into(),
        };
        Fixture {
            service,
            tokens,
            videos,
            entitlements,
            req,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_ttl(7200)
    }

    fn granted(f: &Fixture) {
        f.entitlements.grant(f.req.user_id, f.req.course_id);
    }

    #[tokio::test]
    async fn purchase_grants_issuance_and_validation() {
        let f = fixture();
        granted(&f);

        let issued = f.service.issue(f.req.clone()).await.unwrap();
        assert!(issued.expires_at > Utc::now() + Duration::seconds(7100));

        let verdict = f.service.validate(&issued.token, &f.req.ip).await.unwrap();
        assert_eq!(
            verdict,
            TokenVerdict::Granted(PlaybackGrant {
                video_id: f.req.video_id,
                user_id: f.req.user_id,
            })
        );
    }

    #[tokio::test]
    async fn issuance_without_entitlement_is_denied() {
        let f = fixture();
        let err = f.service.issue(f.req.clone()).await.unwrap_err();
        assert!(matches!(err, IssueError::AccessDenied));
    }

    #[tokio::test]
    async fn free_chapter_skips_the_entitlement_check() {
        let f = fixture();
        f.entitlements.mark_free(f.req.chapter_id);
        // No grant for this user anywhere.
        assert!(f.service.issue(f.req.clone()).await.is_ok());
    }

    #[tokio::test]
    async fn validation_records_access() {
        let f = fixture();
        granted(&f);
        let issued = f.service.issue(f.req.clone()).await.unwrap();

        f.service.validate(&issued.token, &f.req.ip).await.unwrap();
        f.service.validate(&issued.token, &f.req.ip).await.unwrap();

        let rows = f.tokens.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].access_count, 2);
        assert!(rows[0].last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn wrong_ip_is_an_ip_mismatch() {
        let f = fixture();
        granted(&f);
        let issued = f.service.issue(f.req.clone()).await.unwrap();
        let verdict = f.service.validate(&issued.token, "198.51.100.9").await.unwrap();
        assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::IpMismatch));
    }

    #[tokio::test]
    async fn garbage_and_tampered_credentials_are_invalid() {
        let f = fixture();
        granted(&f);

        let verdict = f.service.validate("not-a-jwt", &f.req.ip).await.unwrap();
        assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::Invalid));

        // Signed with a different secret: rejected before any lookup.
        let other = AccessTokenService::new(
            f.tokens.clone(),
            f.videos.clone(),
            f.entitlements.clone(),
            "other-secret",
            7200,
        );
        let forged = other.issue(f.req.clone()).await.unwrap();
        let verdict = f.service.validate(&forged.token, &f.req.ip).await.unwrap();
        assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::Invalid));
    }

    #[tokio::test]
    async fn expired_wrapper_is_rejected_cryptographically() {
        let f = fixture_with_ttl(-1);
        granted(&f);
        let issued = f.service.issue(f.req.clone()).await.unwrap();
        let verdict = f.service.validate(&issued.token, &f.req.ip).await.unwrap();
        assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::Expired));
    }

    #[tokio::test]
    async fn expired_row_is_rejected_even_with_a_valid_wrapper() {
        let f = fixture();
        granted(&f);
        let issued = f.service.issue(f.req.clone()).await.unwrap();

        f.tokens.age_out_all(Utc::now() - Duration::seconds(1));
        let verdict = f.service.validate(&issued.token, &f.req.ip).await.unwrap();
        assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::Expired));
    }

    #[tokio::test]
    async fn revoked_token_fails_immediately() {
        let f = fixture();
        granted(&f);
        let issued = f.service.issue(f.req.clone()).await.unwrap();

        assert!(f.service.revoke(&issued.token).await.unwrap());
        let verdict = f.service.validate(&issued.token, &f.req.ip).await.unwrap();
        assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::Revoked));

        // Revoking garbage is a quiet no-op.
        assert!(!f.service.revoke("junk").await.unwrap());
    }

    #[tokio::test]
    async fn video_revocation_fans_out_but_spares_other_videos() {
        let f = fixture();
        granted(&f);
        let issued_a1 = f.service.issue(f.req.clone()).await.unwrap();
        let issued_a2 = f.service.issue(f.req.clone()).await.unwrap();

        let mut other = f.req.clone();
        other.video_id = Uuid::new_v4();
        let issued_b = f.service.issue(other.clone()).await.unwrap();

        assert_eq!(f.service.revoke_all_for_video(&f.req.video_id).await.unwrap(), 2);

        for token in [&issued_a1.token, &issued_a2.token] {
            let verdict = f.service.validate(token, &f.req.ip).await.unwrap();
            assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::Revoked));
        }
        let verdict = f.service.validate(&issued_b.token, &f.req.ip).await.unwrap();
        assert!(matches!(verdict, TokenVerdict::Granted(_)));
    }

    #[tokio::test]
    async fn user_revocation_fans_out_across_videos() {
        let f = fixture();
        granted(&f);
        let first = f.service.issue(f.req.clone()).await.unwrap();
        let mut other = f.req.clone();
        other.video_id = Uuid::new_v4();
        let second = f.service.issue(other).await.unwrap();

        assert_eq!(f.service.revoke_all_for_user(&f.req.user_id).await.unwrap(), 2);
        for token in [&first.token, &second.token] {
            let verdict = f.service.validate(token, &f.req.ip).await.unwrap();
            assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::Revoked));
        }
    }

    #[tokio::test]
    async fn key_rotation_replaces_material_and_revokes_tokens() {
        let f = fixture();
        granted(&f);

        let mut asset = VideoAsset::new(
            f.req.video_id,
            f.req.chapter_id,
            f.req.course_id,
            "lecture.mp4",
            1,
            "video/mp4",
            "key",
        );
        asset.encryption = Some(EncryptionKey::generate());
        f.videos.create(&asset).await.unwrap();
        let before = asset.encryption.clone().unwrap();

        let issued = f.service.issue(f.req.clone()).await.unwrap();
        let rotated = f.service.rotate_encryption_key(&f.req.video_id).await.unwrap();

        assert_ne!(rotated, before);
        let stored = f.videos.get(&f.req.video_id).await.unwrap().unwrap();
        assert_eq!(stored.encryption, Some(rotated));
        assert!(stored.key_rotation_at.unwrap() > Utc::now());

        let verdict = f.service.validate(&issued.token, &f.req.ip).await.unwrap();
        assert_eq!(verdict, TokenVerdict::Denied(TokenInvalid::Revoked));
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_rows() {
        let f = fixture();
        granted(&f);
        let keep = f.service.issue(f.req.clone()).await.unwrap();

        // Same repositories, negative TTL: both rows land together but one
        // is already past expiry.
        let expired_service = AccessTokenService::new(
            f.tokens.clone(),
            f.videos.clone(),
            f.entitlements.clone(),
            SECRET,
            -1,
        );
        expired_service.issue(f.req.clone()).await.unwrap();
        assert_eq!(f.tokens.all().len(), 2);

        assert_eq!(f.service.sweep_expired().await.unwrap(), 1);
        assert_eq!(f.tokens.all().len(), 1);

        let verdict = f.service.validate(&keep.token, &f.req.ip).await.unwrap();
        assert!(matches!(verdict, TokenVerdict::Granted(_)));
    }
}
