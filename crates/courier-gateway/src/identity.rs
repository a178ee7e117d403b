use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use courier_types::api::Claims;

/// Turns a bearer token into a user id. Sessions and the REST middleware
/// only ever see this trait.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<i64>;
}

/// HS256 tokens with the numeric user id in `sub`.
pub struct JwtIdentity {
    secret: String,
    ttl: chrono::Duration,
}

impl JwtIdentity {
    pub fn new(secret: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn issue(&self, user_id: i64) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (chrono::Utc::now() + self.ttl).timestamp().max(0) as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }
}

impl IdentityVerifier for JwtIdentity {
    fn verify(&self, token: &str) -> Option<i64> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?;
        data.claims.user_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let jwt = JwtIdentity::new("secret", chrono::Duration::minutes(5));
        let token = jwt.issue(42).unwrap();
        assert_eq!(jwt.verify(&token), Some(42));
    }

    #[test]
    fn wrong_secret_or_garbage_is_rejected() {
        let issuer = JwtIdentity::new("secret", chrono::Duration::minutes(5));
        let other = JwtIdentity::new("other", chrono::Duration::minutes(5));
        let token = issuer.issue(1).unwrap();

        assert_eq!(other.verify(&token), None);
        assert_eq!(issuer.verify("not-a-token"), None);
        assert_eq!(issuer.verify(""), None);
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = JwtIdentity::new("secret", chrono::Duration::hours(-2));
        let token = jwt.issue(1).unwrap();
        assert_eq!(jwt.verify(&token), None);
    }

    #[test]
    fn non_numeric_subject_is_rejected() {
        let claims = Claims {
            sub: "alice".into(),
            exp: (chrono::Utc::now() + chrono::Duration::minutes(5)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let jwt = JwtIdentity::new("secret", chrono::Duration::minutes(5));
        assert_eq!(jwt.verify(&token), None);
    }
}
