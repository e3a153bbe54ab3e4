use crate::config::Settings;
use crate::model::core::User;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error, warn};
use poem::Request;
use poem_openapi::auth::Bearer;
use poem_openapi::SecurityScheme;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const TOKEN_TYPE: &str = "bearer";

pub fn get_password_hash(password: &str) -> Result<String, anyhow::Error> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

/// A malformed hash counts as a mismatch.
pub fn verify_password(password: &str, hashed_password: &str) -> bool {
    match bcrypt::verify(password, hashed_password) {
        Ok(valid) => valid,
        Err(err) => {
            warn!("Failed to verify the password hash: {}", err);
            false
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// The username.
    pub sub: String,
    /// Expiry as a unix timestamp.
    pub exp: usize,
}

/// Signs and checks HS256 access tokens.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret_key: String,
    pub access_token_expire_minutes: i64,
}

impl JwtConfig {
    pub fn new(secret_key: &str, access_token_expire_minutes: i64) -> Self {
        Self {
            secret_key: secret_key.to_string(),
            access_token_expire_minutes,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.secret_key, settings.access_token_expire_minutes)
    }

    pub fn create_access_token(
        &self,
        subject: &str,
        expires_delta: Option<Duration>,
    ) -> Result<String, anyhow::Error> {
        let expires_delta =
            expires_delta.unwrap_or_else(|| Duration::minutes(self.access_token_expire_minutes));
        let expire = (Utc::now() + expires_delta).timestamp().max(0) as usize;
        let claims = Claims {
            sub: subject.to_string(),
            exp: expire,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret_key.as_bytes()),
        )?;

        Ok(token)
    }

    pub fn decode_access_token(&self, token: &str) -> Result<Claims, anyhow::Error> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret_key.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(data.claims)
    }
}

#[derive(SecurityScheme)]
#[oai(type = "bearer", checker = "jwt_token_checker")]
pub struct BearerAuth(pub User);

async fn jwt_token_checker(req: &Request, bearer: Bearer) -> Option<User> {
    let jwt = match req.data::<Arc<JwtConfig>>() {
        Some(jwt) => jwt,
        None => {
            error!("The JWT configuration is not attached to the request.");
            return None;
        }
    };
    let pool = match req.data::<Arc<sqlx::PgPool>>() {
        Some(pool) => pool,
        None => {
            error!("The database pool is not attached to the request.");
            return None;
        }
    };

    let claims = match jwt.decode_access_token(&bearer.token) {
        Ok(claims) => claims,
        Err(err) => {
            warn!("Invalid authentication credentials: {}", err);
            return None;
        }
    };

    match User::get_by_username(pool, &claims.sub).await {
        Ok(Some(user)) => {
            debug!("current_user: {}", user.username);
            Some(user)
        }
        Ok(None) => {
            warn!("The token subject {} is not a known user.", claims.sub);
            None
        }
        Err(err) => {
            error!("Failed to load the current user: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hashing_and_verification() {
        let password = "secure_password";
        let hashed = get_password_hash(password).unwrap();
        assert_ne!(hashed, password);
        assert!(verify_password(password, &hashed));
        assert!(!verify_password("wrong_password", &hashed));
        assert!(!verify_password(password, "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_create_access_token() {
        let jwt = JwtConfig::new("test-secret", 30);
        let token = jwt.create_access_token("testuser", None).unwrap();
        let claims = jwt.decode_access_token(&token).unwrap();
        assert_eq!(claims.sub, "testuser");
        assert!(claims.exp > Utc::now().timestamp() as usize);
    }

    #[test]
    fn test_token_signed_with_another_key_is_rejected() {
        let token = JwtConfig::new("one-secret", 30)
            .create_access_token("testuser", None)
            .unwrap();
        assert!(JwtConfig::new("another-secret", 30)
            .decode_access_token(&token)
            .is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let jwt = JwtConfig::new("test-secret", 30);
        let token = jwt
            .create_access_token("testuser", Some(Duration::minutes(-10)))
            .unwrap();
        assert!(jwt.decode_access_token(&token).is_err());
    }
}
