//! Authentication endpoints and session identity

use tracing::{info, warn};

use crate::error::GatewayError;
use crate::gateway::SessionGateway;
use crate::request::ApiRequest;
use crate::store::{StoreError, keys};
use crate::types::{LoginRequest, ResetPasswordRequest, Role, TokenPair};

pub const RESET_PASSWORD_PATH: &str = "/api/auth/reset-password";

/// Login form values kept between sessions when "remember me" is ticked
#[derive(Clone, PartialEq, Eq)]
pub struct RememberedLogin {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RememberedLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RememberedLogin")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SessionGateway {
    /// Log in and persist the issued credentials together with the
    /// username and role.
    pub async fn login(
        &self,
        role: Role,
        username: &str,
        password: &str,
    ) -> Result<TokenPair, GatewayError> {
        let request = ApiRequest::post(role.login_path()).json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })?;

        let pair: TokenPair = self.request(request).await?.into_data()?;
        self.store_tokens(&pair)?;
        self.store().set(keys::USERNAME, username)?;
        self.store().set(keys::USER_ROLE, role.as_str())?;

        info!(%role, username, "Logged in");
        Ok(pair)
    }

    /// Change the password of the logged-in account
    pub async fn reset_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), GatewayError> {
        let body = ResetPasswordRequest {
            old_password: old_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.request(ApiRequest::put(RESET_PASSWORD_PATH).json(&body)?)
            .await?;
        info!("Password reset");
        Ok(())
    }

    /// Whether an access token is stored
    pub fn is_authenticated(&self) -> bool {
        self.store().get(keys::ACCESS_TOKEN).is_some()
    }

    pub fn current_username(&self) -> Option<String> {
        self.store().get(keys::USERNAME)
    }

    pub fn current_role(&self) -> Option<Role> {
        let stored = self.store().get(keys::USER_ROLE)?;
        match stored.parse() {
            Ok(role) => Some(role),
            Err(e) => {
                warn!(error = %e, "Ignoring unrecognised stored role");
                None
            }
        }
    }

    /// Remember the login form values
    pub fn remember_login(&self, login: &RememberedLogin) -> Result<(), StoreError> {
        let store = self.store();
        store.set(keys::REMEMBERED_USERNAME, &login.username)?;
        store.set(keys::REMEMBERED_PASSWORD, &login.password)?;
        store.set(keys::REMEMBER_ME, "true")
    }

    /// Remembered login form values, if "remember me" was ticked
    pub fn remembered_login(&self) -> Option<RememberedLogin> {
        let store = self.store();
        if store.get(keys::REMEMBER_ME).as_deref() != Some("true") {
            return None;
        }
        Some(RememberedLogin {
            username: store.get(keys::REMEMBERED_USERNAME)?,
            password: store.get(keys::REMEMBERED_PASSWORD)?,
        })
    }

    pub fn forget_login(&self) -> Result<(), StoreError> {
        let store = self.store();
        store.remove(keys::REMEMBERED_USERNAME)?;
        store.remove(keys::REMEMBERED_PASSWORD)?;
        store.set(keys::REMEMBER_ME, "false")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialStore, MemoryStore};
    use std::sync::Arc;

    fn gateway(store: Arc<MemoryStore>) -> SessionGateway {
        SessionGateway::builder()
            .base_url("http://localhost:2800")
            .store(store)
            .build()
            .unwrap()
    }

    #[test]
    fn remembered_login_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let gateway = gateway(Arc::clone(&store));
        assert!(gateway.remembered_login().is_none());

        let login = RememberedLogin {
            username: "ucabjp1".into(),
            password: "pw".into(),
        };
        gateway.remember_login(&login).unwrap();
        assert_eq!(gateway.remembered_login(), Some(login));

        // logout keeps the login form preference
        gateway.logout();
        assert!(gateway.remembered_login().is_some());

        gateway.forget_login().unwrap();
        assert!(gateway.remembered_login().is_none());
        assert_eq!(store.get(keys::REMEMBER_ME).as_deref(), Some("false"));
    }

    #[test]
    fn identity_from_store() {
        let store = Arc::new(MemoryStore::new());
        let gateway = gateway(Arc::clone(&store));
        assert!(!gateway.is_authenticated());
        assert!(gateway.current_role().is_none());

        store.set(keys::ACCESS_TOKEN, "T1").unwrap();
        store.set(keys::USERNAME, "admin").unwrap();
        store.set(keys::USER_ROLE, "Admin").unwrap();
        assert!(gateway.is_authenticated());
        assert_eq!(gateway.current_username().as_deref(), Some("admin"));
        assert_eq!(gateway.current_role(), Some(Role::Admin));

        store.set(keys::USER_ROLE, "janitor").unwrap();
        assert!(gateway.current_role().is_none());
    }
}
