use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Turns a raw bearer token into trusted claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// Shared-secret (HS256) validator.
///
/// The token carries `issued_at`/`expires_at` instead of the registered
/// `iat`/`exp` claims, so the time window is checked by [`validate_claims`]
/// against the caller-supplied clock rather than by `jsonwebtoken`.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

impl core::fmt::Debug for Hs256JwtValidator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256JwtValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use citylayout_core::OwnerId;
    use jsonwebtoken::{EncodingKey, Header};

    use crate::Role;

    fn mint(secret: &str, claims: &JwtClaims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: OwnerId::new(),
            roles: vec![Role::new("ui:rw")],
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn accepts_token_signed_with_the_same_secret() {
        let now = Utc::now();
        let c = claims(now);
        let validator = Hs256JwtValidator::new("s3cret");
        assert_eq!(validator.validate(&mint("s3cret", &c), now), Ok(c));
    }

    #[test]
    fn rejects_foreign_signature_and_garbage() {
        let now = Utc::now();
        let validator = Hs256JwtValidator::new("s3cret");
        assert!(matches!(
            validator.validate(&mint("other", &claims(now)), now),
            Err(TokenValidationError::Malformed(_))
        ));
        assert!(matches!(
            validator.validate("not-a-jwt", now),
            Err(TokenValidationError::Malformed(_))
        ));
    }

    #[test]
    fn expiry_uses_the_supplied_clock() {
        let now = Utc::now();
        let token = mint("s3cret", &claims(now));
        let validator = Hs256JwtValidator::new("s3cret");
        assert_eq!(
            validator.validate(&token, now + Duration::hours(1)),
            Err(TokenValidationError::Expired)
        );
    }
}
