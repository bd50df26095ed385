use log::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{ClientStorage, RouterClient, WrtApiError, WrtResult, STORAGE_KEY_CREDENTIALS, STORAGE_KEY_SESSION};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedCredentials {
    pub username: String,
    pub password: String,
}

pub struct SessionManager {
    client: Arc<RouterClient>,
    storage: Arc<dyn ClientStorage>,
}

impl SessionManager {
    pub fn new(client: Arc<RouterClient>, storage: Arc<dyn ClientStorage>) -> Self {
        SessionManager { client, storage }
    }

    /// Load the persisted token into the client. Returns whether there was one.
    pub fn restore(&self) -> bool {
        match self.storage.get(STORAGE_KEY_SESSION) {
            Some(token) if !token.is_empty() => {
                self.client.set_session_token(&token);
                true
            }
            _ => false,
        }
    }

    pub fn has_session(&self) -> bool {
        self.client.has_session()
    }

    pub async fn login(&self, username: &str, password: &str, remember: bool) -> WrtResult<String> {
        let reply = self
            .client
            .call_anonymous("session", "login", json!({ "username": username, "password": password }))
            .await?;

        let token = reply
            .payload
            .get("ubus_rpc_session")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string());
        let token = match token {
            Some(token) => token,
            None => {
                warn!("login for {} rejected, status {}", username, reply.status);
                return Err(WrtApiError::LoginFailed);
            }
        };

        self.client.set_session_token(&token);
        self.storage.set(STORAGE_KEY_SESSION, &token)?;
        if remember {
            let creds = SavedCredentials {
                username: username.to_string(),
                password: password.to_string(),
            };
            let text = serde_json::to_string(&creds).map_err(|err| WrtApiError::Storage(err.to_string()))?;
            self.storage.set(STORAGE_KEY_CREDENTIALS, &text)?;
        }
        info!("logged in as {}", username);
        Ok(token)
    }

    pub async fn validate_session(&self) -> bool {
        match self.client.call("session", "access", json!({})).await {
            Ok(reply) => reply.status == 0,
            Err(err) => {
                debug!("session validation failed: {}", err);
                false
            }
        }
    }

    pub async fn logout(&self) {
        if let Err(err) = self.client.call("session", "destroy", json!({})).await {
            warn!("session destroy failed: {}", err);
        }
        self.clear_token();
        self.clear_saved_credentials();
        info!("logged out");
    }

    pub fn saved_credentials(&self) -> Option<SavedCredentials> {
        let text = self.storage.get(STORAGE_KEY_CREDENTIALS)?;
        serde_json::from_str(&text).ok()
    }

    pub fn clear_saved_credentials(&self) {
        if let Err(err) = self.storage.remove(STORAGE_KEY_CREDENTIALS) {
            error!("clear saved credentials failed: {}", err);
        }
    }

    pub fn clear_token(&self) {
        self.client.clear_session_token();
        if let Err(err) = self.storage.remove(STORAGE_KEY_SESSION) {
            error!("clear session token failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use ubus_rpc::{MockUbus, RPCErrors, UBUS_NULL_SESSION};

    fn setup() -> (Arc<MockUbus>, Arc<MemoryStorage>, SessionManager) {
        let mock = Arc::new(MockUbus::new());
        let storage = Arc::new(MemoryStorage::new());
        let client = Arc::new(RouterClient::new(mock.clone()));
        let session = SessionManager::new(client, storage.clone());
        (mock, storage, session)
    }

    #[tokio::test]
    async fn test_login_persists_token() {
        let (mock, storage, session) = setup();
        mock.on("session", "login", json!({"ubus_rpc_session": "c0ffee"}));

        let token = session.login("root", "secret", true).await.unwrap();
        assert_eq!(token, "c0ffee");
        assert_eq!(storage.get(STORAGE_KEY_SESSION).unwrap(), "c0ffee");
        assert_eq!(
            session.saved_credentials(),
            Some(SavedCredentials { username: "root".to_string(), password: "secret".to_string() })
        );
        assert_eq!(mock.calls()[0].session, UBUS_NULL_SESSION);
    }

    #[tokio::test]
    async fn test_login_without_session_id() {
        let (mock, storage, session) = setup();
        mock.on("session", "login", json!({}));

        let err = session.login("root", "wrong", true).await.unwrap_err();
        assert!(matches!(err, WrtApiError::LoginFailed));
        assert!(!session.has_session());
        assert!(storage.get(STORAGE_KEY_SESSION).is_none());
        assert!(session.saved_credentials().is_none());
    }

    #[tokio::test]
    async fn test_validate_session() {
        let (mock, _storage, session) = setup();
        mock.on_status("session", "access", 6);
        assert!(!session.validate_session().await);
        mock.on("session", "access", json!({"access": true}));
        assert!(session.validate_session().await);
        mock.fail("session", "access", RPCErrors::Transport("unreachable".to_string()));
        assert!(!session.validate_session().await);
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_destroy_fails() {
        let (mock, storage, session) = setup();
        mock.on("session", "login", json!({"ubus_rpc_session": "c0ffee"}))
            .fail("session", "destroy", RPCErrors::Protocol("Access denied".to_string()));
        session.login("root", "secret", true).await.unwrap();

        session.logout().await;
        assert!(!session.has_session());
        assert!(storage.get(STORAGE_KEY_SESSION).is_none());
        assert!(storage.get(STORAGE_KEY_CREDENTIALS).is_none());
        assert_eq!(mock.calls_to("session", "destroy")[0].session, "c0ffee");
    }

    #[test]
    fn test_restore_and_bad_credentials() {
        let (_mock, storage, session) = setup();
        assert!(!session.restore());
        storage.set(STORAGE_KEY_SESSION, "abc").unwrap();
        storage.set(STORAGE_KEY_CREDENTIALS, "{broken").unwrap();
        assert!(session.restore());
        assert!(session.has_session());
        assert!(session.saved_credentials().is_none());
    }
}
