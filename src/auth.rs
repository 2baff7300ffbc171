use std::sync::Arc;

use tracing::info;

use crate::engine::EngineError;
use crate::identity::IdentityProvider;
use crate::model::{AppRole, Session, StaffRole};
use crate::roster::RosterCache;
use crate::roster::normalize::{EMAIL_FIELDS, NAME_FIELDS, ROLE_FIELDS, field, infer_role};

/// Role given to a credential-checked user whose record names no role.
const DEFAULT_LOGIN_ROLE: &str = "TUTOR";

/// Resolves logins into sessions. Credential checks go to the upstream
/// provider; token logins are admitted only for identities in the roster.
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    roster: Arc<RosterCache>,
}

fn refuse(reason: &'static str, err: EngineError) -> EngineError {
    metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
    err
}

impl Authenticator {
    pub fn new(provider: Arc<dyn IdentityProvider>, roster: Arc<RosterCache>) -> Self {
        Self { provider, roster }
    }

    pub async fn login_with_password(&self, email: &str, password: &str) -> Result<Session, EngineError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(EngineError::validation("email and password are required"));
        }

        let user = match self.provider.check_credentials(&email, password).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(refuse("credentials", EngineError::Unauthorized)),
            Err(e) => return Err(refuse("upstream", e)),
        };

        let raw_role = field(&user, ROLE_FIELDS).unwrap_or_else(|| DEFAULT_LOGIN_ROLE.into());
        let role = match infer_role(&raw_role) {
            Some(AppRole::Admin) => StaffRole::Admin,
            Some(AppRole::Student) => {
                return Err(refuse("student", EngineError::Forbidden(email)));
            }
            Some(AppRole::Teacher) | None => StaffRole::Teacher,
        };
        let identity = field(&user, EMAIL_FIELDS)
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| email.clone());
        let display_name = field(&user, NAME_FIELDS).unwrap_or_else(|| identity.clone());

        info!("password login for {identity} as {role:?}");
        Ok(Session { identity, display_name, role })
    }

    pub async fn login_with_token(&self, token: &str) -> Result<Session, EngineError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(EngineError::validation("token is required"));
        }

        let email = match self.provider.verify_token(token).await {
            Ok(Some(email)) => email,
            Ok(None) => return Err(refuse("token", EngineError::Unauthorized)),
            Err(e) => return Err(refuse("upstream", e)),
        };
        let Some(entry) = self.roster.find_staff(&email).await else {
            return Err(refuse("unregistered", EngineError::Forbidden(email)));
        };

        info!("token login for {} as {:?}", entry.identity, entry.role);
        Ok(Session {
            identity: entry.identity,
            display_name: entry.display_name,
            role: entry.role,
        })
    }
}
