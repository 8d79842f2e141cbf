use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_USER_ID_LEN;

/// Shared-password login. The user name the client presents becomes the
/// caller that owns locations and bookings, so it must be present.
#[derive(Debug)]
pub struct ParkbookAuthSource {
    password: String,
}

impl ParkbookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

fn check_user(user: Option<&str>) -> PgWireResult<()> {
    match user {
        Some(u) if !u.is_empty() && u.len() <= MAX_USER_ID_LEN => Ok(()),
        _ => Err(PgWireError::UserError(Box::new(ErrorInfo::new(
            "FATAL".into(),
            "28000".into(),
            format!("a user name of 1..={MAX_USER_ID_LEN} bytes is required"),
        )))),
    }
}

#[async_trait]
impl AuthSource for ParkbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        check_user(login.user())?;
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_name_required() {
        assert!(check_user(Some("alice")).is_ok());
        assert!(check_user(None).is_err());
        assert!(check_user(Some("")).is_err());
        assert!(check_user(Some(&"u".repeat(MAX_USER_ID_LEN + 1))).is_err());
    }
}
