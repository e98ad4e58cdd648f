use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

pub const ADMIN_USER: &str = "admin";
pub const GUEST_USER: &str = "guest";

/// Proof that the holder passed the admin check. Only `session_token` mints
/// one, after the wire startup authenticated the `admin` user, so every admin
/// operation takes `&AdminToken` instead of consulting session state.
#[derive(Debug, Clone)]
pub struct AdminToken {
    _private: (),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Guest,
    Admin,
}

impl Role {
    pub fn from_user(user: &str) -> Option<Role> {
        match user {
            ADMIN_USER => Some(Role::Admin),
            GUEST_USER => Some(Role::Guest),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    AdminRequired,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::AdminRequired => write!(f, "this operation requires the admin user"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Token for a session whose startup already authenticated as `admin`.
pub(crate) fn session_token(role: Role) -> Result<AdminToken, AuthError> {
    match role {
        Role::Admin => Ok(AdminToken { _private: () }),
        Role::Guest => Err(AuthError::AdminRequired),
    }
}

/// Password lookup for the wire startup handshake: one password per role.
#[derive(Debug)]
pub struct StaydeskAuthSource {
    admin_password: String,
    guest_password: String,
}

impl StaydeskAuthSource {
    pub fn new(admin_password: String, guest_password: String) -> Self {
        Self {
            admin_password,
            guest_password,
        }
    }
}

#[async_trait]
impl AuthSource for StaydeskAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let password = match login.user().and_then(Role::from_user) {
            Some(Role::Admin) => &self.admin_password,
            Some(Role::Guest) => &self.guest_password,
            None => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28000".into(),
                    format!("unknown user (expected {ADMIN_USER} or {GUEST_USER})"),
                ))));
            }
        };
        Ok(Password::new(None, password.as_bytes().to_vec()))
    }
}
