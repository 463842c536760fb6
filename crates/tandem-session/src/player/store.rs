use std::sync::{Arc, RwLock};

use tandem_common::new_user_id;

/// Device-local state the session reads at join.
///
/// The role is asserted once when the session is created and is not
/// re-derived from this store afterwards.
pub trait LocalStore: Send + Sync {
    fn user_id(&self) -> String;

    fn is_host(&self) -> bool;

    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    /// Drop stored credentials after the service rejected them.
    fn invalidate_credentials(&self);
}

#[derive(Debug, Default)]
struct Credentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    user_id: String,
    is_host: bool,
    credentials: Arc<RwLock<Credentials>>,
}

impl MemoryStore {
    pub fn new(user_id: impl Into<String>, is_host: bool) -> Self {
        Self {
            user_id: user_id.into(),
            is_host,
            credentials: Arc::new(RwLock::new(Credentials::default())),
        }
    }

    pub fn anonymous(is_host: bool) -> Self {
        Self::new(new_user_id(), is_host)
    }

    pub fn with_tokens(self, access_token: Option<String>, refresh_token: Option<String>) -> Self {
        {
            let mut creds = self
                .credentials
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            creds.access_token = access_token;
            creds.refresh_token = refresh_token;
        }
        self
    }
}

impl LocalStore for MemoryStore {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn is_host(&self) -> bool {
        self.is_host
    }

    fn access_token(&self) -> Option<String> {
        self.credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .access_token
            .clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .refresh_token
            .clone()
    }

    fn invalidate_credentials(&self) {
        let mut creds = self
            .credentials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        creds.access_token = None;
        creds.refresh_token = None;
        tracing::info!(user_id = %self.user_id, "Credentials invalidated");
    }
}
