use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Connection password checked by pgwire's cleartext startup handler.
/// Any user name is accepted; accounts live at the SQL level. A wrong
/// password is rejected by the handler with `28P01`.
#[derive(Debug)]
pub struct VenueAuthSource {
    password: String,
}

impl VenueAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for VenueAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = login.user().unwrap_or_default(), "startup password requested");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
