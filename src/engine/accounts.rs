use chrono::{DateTime, TimeZone};
use tracing::info;

use crate::credentials::{self, AuthError, Claims};
use crate::limits::*;
use crate::model::{NewUser, OrderId, PackageId, Session, User};
use crate::observability::AUTH_FAILURES_TOTAL;
use crate::store::{Store, StoreError};

use super::error::store_err;
use super::{Engine, EngineError};

const BAD_LOGIN: &str = "wrong email or password";
const BAD_TOKEN: &str = "invalid or expired access token";

fn required(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::invalid(field, "must not be blank"));
    }
    if value.len() > max {
        return Err(EngineError::invalid(field, format!("longer than {max} bytes")));
    }
    Ok(())
}

fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl<S: Store> Engine<S> {
    pub async fn register(
        &self,
        email: &str,
        fullname: &str,
        password: &str,
    ) -> Result<User, EngineError> {
        required("email", email, MAX_EMAIL_LEN)?;
        required("fullname", fullname, MAX_NAME_LEN)?;
        required("password", password, MAX_PASSWORD_LEN)?;
        let email = canonical_email(email);
        if !email.contains('@') {
            return Err(EngineError::invalid("email", "not an email address"));
        }

        let password = password.to_string();
        let password_hash =
            tokio::task::spawn_blocking(move || credentials::hash_password(&password))
                .await
                .map_err(|e| AuthError::Hashing(format!("hashing task failed: {e}")))??;
        let new_user = NewUser {
            email: email.clone(),
            fullname: fullname.trim().to_string(),
            password_hash,
        };
        let user = self.store.create_user(new_user).await.map_err(|e| match e {
            StoreError::Duplicate { .. } => EngineError::invalid("email", "email already registered"),
            other => store_err("create_user", format!("email {email}"))(other),
        })?;
        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Unknown email and wrong password fail identically.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, EngineError> {
        let email = canonical_email(email);
        let user = self
            .store
            .find_user_by_email(&email)
            .await
            .map_err(store_err("find_user_by_email", format!("email {email}")))?;
        let user = match user {
            Some(user) => {
                let password = password.to_string();
                let stored = user.password_hash.clone();
                let matches = tokio::task::spawn_blocking(move || {
                    credentials::verify_password(&password, &stored)
                })
                .await
                .map_err(|e| AuthError::Hashing(format!("verification task failed: {e}")))?;
                matches.then_some(user)
            }
            None => None,
        };
        let Some(user) = user else {
            metrics::counter!(AUTH_FAILURES_TOTAL, "stage" => "login").increment(1);
            return Err(EngineError::Unauthorized(BAD_LOGIN));
        };
        let access_token = self.credentials.issue(&user)?;
        info!(user_id = user.id, ttl_secs = self.credentials.ttl().as_secs(), "login");
        Ok(Session {
            user_id: user.id,
            email: user.email,
            fullname: user.fullname,
            access_token,
        })
    }

    pub fn authenticate(&self, token: &str) -> Result<Claims, EngineError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            metrics::counter!(AUTH_FAILURES_TOTAL, "stage" => "token").increment(1);
            return Err(EngineError::Unauthorized(BAD_TOKEN));
        }
        self.credentials.validate(token).map_err(|e| {
            metrics::counter!(AUTH_FAILURES_TOTAL, "stage" => "token").increment(1);
            match e {
                AuthError::InvalidToken => EngineError::Unauthorized(BAD_TOKEN),
                other => EngineError::Credentials(other),
            }
        })
    }

    /// [`Engine::place_order`] on behalf of the bearer of `token`.
    pub async fn place_order_as<Tz: TimeZone>(
        &self,
        token: &str,
        package_id: PackageId,
        date: &DateTime<Tz>,
    ) -> Result<OrderId, EngineError> {
        let claims = self.authenticate(token)?;
        self.place_order(package_id, claims.id, date).await
    }
}
