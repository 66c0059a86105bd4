//! JWT claims for access and refresh credentials.

use crate::error::AuthError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which half of the pair a credential is. Each kind is signed with its own
/// secret, so an access credential can never be replayed as a refresh
/// credential or vice versa.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both credential kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    /// Subject: the user id.
    pub sub: Uuid,
    /// Session the credential is scoped to.
    pub sid: Uuid,
    /// Token family, stable across rotations of one login lineage.
    pub fam: Uuid,
    /// Unique credential id, the revocation-list key.
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub scope: Vec<String>,
    pub kind: TokenKind,
}

impl Claims {
    /// Remaining lifetime in whole seconds (zero if already expired).
    #[must_use]
    pub fn remaining_secs(&self, now: i64) -> u64 {
        u64::try_from(self.exp.saturating_sub(now)).unwrap_or(0)
    }
}

/// Sign claims with the secret for their kind (HMAC-SHA256).
///
/// # Errors
/// Returns an error if encoding fails.
pub fn encode_claims(claims: &Claims, secret: &[u8]) -> Result<String, AuthError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AuthError::Configuration(format!("failed to sign credential: {e}")))
}

/// Verify signature, issuer, audience, expiry, and kind.
///
/// # Errors
/// Returns [`AuthError::Expired`] past the expiry and
/// [`AuthError::AuthenticationFailed`] for any other verification failure.
pub fn decode_claims(
    token: &str,
    secret: &[u8],
    issuer: &str,
    audience: &str,
    expected_kind: TokenKind,
) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);
    validation.leeway = 0;

    let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::AuthenticationFailed(format!("invalid credential: {e}")),
        })?;

    if data.claims.kind != expected_kind {
        return Err(AuthError::AuthenticationFailed(
            "credential kind mismatch".to_string(),
        ));
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::{decode_claims, encode_claims, Claims, TokenKind};
    use crate::error::AuthError;
    use chrono::Utc;
    use uuid::Uuid;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn claims(kind: TokenKind, exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            iss: "custodia".to_string(),
            aud: "api".to_string(),
            sub: Uuid::new_v4(),
            sid: Uuid::new_v4(),
            fam: Uuid::new_v4(),
            jti: Uuid::new_v4(),
            iat: now,
            exp: now + exp_offset,
            scope: vec!["accounts:read".to_string()],
            kind,
        }
    }

    #[test]
    fn encode_decode_roundtrip() -> Result<(), AuthError> {
        let claims = claims(TokenKind::Access, 900);
        let token = encode_claims(&claims, SECRET)?;
        let decoded = decode_claims(&token, SECRET, "custodia", "api", TokenKind::Access)?;
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.jti, claims.jti);
        assert_eq!(decoded.fam, claims.fam);
        assert_eq!(decoded.scope, claims.scope);
        Ok(())
    }

    #[test]
    fn wrong_secret_is_rejected() -> Result<(), AuthError> {
        let token = encode_claims(&claims(TokenKind::Access, 900), SECRET)?;
        let result = decode_claims(
            &token,
            b"another-secret-another-secret-00",
            "custodia",
            "api",
            TokenKind::Access,
        );
        assert!(matches!(result, Err(AuthError::AuthenticationFailed(_))));
        Ok(())
    }

    #[test]
    fn kind_mismatch_is_rejected() -> Result<(), AuthError> {
        let token = encode_claims(&claims(TokenKind::Refresh, 900), SECRET)?;
        let result = decode_claims(&token, SECRET, "custodia", "api", TokenKind::Access);
        assert!(matches!(result, Err(AuthError::AuthenticationFailed(_))));
        Ok(())
    }

    #[test]
    fn expired_credential_reports_expired() -> Result<(), AuthError> {
        let token = encode_claims(&claims(TokenKind::Access, -60), SECRET)?;
        let result = decode_claims(&token, SECRET, "custodia", "api", TokenKind::Access);
        assert!(matches!(result, Err(AuthError::Expired)));
        Ok(())
    }

    #[test]
    fn wrong_audience_is_rejected() -> Result<(), AuthError> {
        let token = encode_claims(&claims(TokenKind::Access, 900), SECRET)?;
        let result = decode_claims(&token, SECRET, "custodia", "other", TokenKind::Access);
        assert!(matches!(result, Err(AuthError::AuthenticationFailed(_))));
        Ok(())
    }

    #[test]
    fn remaining_secs_floors_at_zero() {
        let claims = claims(TokenKind::Access, -10);
        assert_eq!(claims.remaining_secs(Utc::now().timestamp()), 0);
    }
}
