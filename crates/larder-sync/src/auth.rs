//! # Credential Storage
//!
//! Access and refresh tokens persisted in the key-value store.
//!
//! Tokens are read from the store on every request, so a sign-in performed
//! elsewhere in the app takes effect on the next call. The refresh exchange
//! itself lives in [`crate::client::RequestClient`], which owns the transport.

use tracing::{info, warn};

use larder_store::{keys, SharedStore};

use crate::error::SyncResult;

/// A signed-in session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Credentials {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

// Tokens never reach logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    store: SharedStore,
}

impl CredentialStore {
    pub fn new(store: SharedStore) -> Self {
        CredentialStore { store }
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(?e, key, "Failed to read credential");
                None
            }
        }
    }

    pub async fn access_token(&self) -> Option<String> {
        self.read(keys::ACCESS_TOKEN).await
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.read(keys::REFRESH_TOKEN).await
    }

    pub async fn current(&self) -> Option<Credentials> {
        let access_token = self.access_token().await?;
        Some(Credentials {
            access_token,
            refresh_token: self.refresh_token().await,
        })
    }

    pub async fn is_signed_in(&self) -> bool {
        self.access_token().await.is_some()
    }

    /// Stores a session. A missing refresh token leaves the old one in place.
    pub async fn set_credentials(&self, credentials: &Credentials) -> SyncResult<()> {
        self.store
            .set(keys::ACCESS_TOKEN, &credentials.access_token)
            .await?;
        if let Some(refresh) = &credentials.refresh_token {
            self.store.set(keys::REFRESH_TOKEN, refresh).await?;
        }
        info!("Credentials stored");
        Ok(())
    }

    /// Forgets the session. Store failures are logged, never raised.
    pub async fn clear(&self) {
        for key in [keys::ACCESS_TOKEN, keys::REFRESH_TOKEN] {
            if let Err(e) = self.store.remove(key).await {
                warn!(?e, key, "Failed to clear credential");
            }
        }
        info!("Credentials cleared");
    }
}
