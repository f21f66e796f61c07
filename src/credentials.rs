//! Password hashing and signed access tokens.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::model::{User, UserId};

const HASH_SCHEME: &str = "pbkdf2-sha256";
const HASH_ROUNDS: u32 = 100_000;
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired access token")]
    InvalidToken,
    #[error("failed to sign access token: {0}")]
    Signing(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// What an access token asserts about its bearer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: UserId,
    pub email: String,
    #[serde(rename = "fullname")]
    pub full_name: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// HS256 signing material and token lifetime.
pub struct Credentials {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl Credentials {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let claims = Claims {
            id: user.id,
            email: user.email.clone(),
            full_name: user.fullname.clone(),
            exp: jsonwebtoken::get_current_timestamp() + self.ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Signature and expiry are both checked.
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}

/// PBKDF2-HMAC-SHA256 (RFC 8018) with a single 32-byte output block.
fn pbkdf2_sha256(password: &str, salt: &[u8], rounds: u32) -> Result<[u8; 32], AuthError> {
    let prf = Hmac::<Sha256>::new_from_slice(password.as_bytes())
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    let mut u: [u8; 32] = prf
        .clone()
        .chain_update(salt)
        .chain_update(1u32.to_be_bytes())
        .finalize()
        .into_bytes()
        .into();
    let mut out = u;
    for _ in 1..rounds {
        u = prf.clone().chain_update(u).finalize().into_bytes().into();
        out.iter_mut().zip(u).for_each(|(o, b)| *o ^= b);
    }
    Ok(out)
}

/// Salted PBKDF2-HMAC-SHA256 in the form
/// `pbkdf2-sha256$<rounds>$<salt>$<hash>` (base64, no padding).
/// CPU-bound; async callers run it on the blocking pool.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let hash = pbkdf2_sha256(password, &salt, HASH_ROUNDS)?;
    Ok(format!(
        "{HASH_SCHEME}${HASH_ROUNDS}${}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    ))
}

/// `false` for a wrong password and for a hash this module did not produce.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(HASH_SCHEME), Some(rounds), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let (Ok(rounds), Ok(salt), Ok(expected)) = (
        rounds.parse::<u32>(),
        STANDARD_NO_PAD.decode(salt),
        STANDARD_NO_PAD.decode(hash),
    ) else {
        return false;
    };
    if rounds == 0 {
        return false;
    }
    pbkdf2_sha256(password, &salt, rounds)
        .is_ok_and(|derived| constant_time_eq::constant_time_eq(&derived, &expected))
}
