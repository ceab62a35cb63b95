use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Single shared password for every login.
#[derive(Debug)]
pub struct PpdbAuthSource {
    password: String,
}

impl PpdbAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PpdbAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = ?login.user(), "login attempt");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
