use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use tokio::sync::RwLock;

use super::{Credentials, ObjectStorage, StorageError, StorageFactory};
use crate::crypto::{self, CryptoError};
use crate::entity::data_source;
use crate::vault::{KeyRing, VaultError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Could not find the datasource with id# {0}")]
    DataSourceNotFound(i32),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("Failed to decrypt the saved credentials: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Database error: {0}")]
    Db(#[from] DbErr),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

struct SessionState {
    owner: i32,
    credentials: Option<Credentials>,
    client: Option<Arc<dyn ObjectStorage>>,
}

impl SessionState {
    fn rebind(&mut self, user_id: i32) {
        if self.owner != user_id {
            tracing::debug!(from = self.owner, to = user_id, "storage session changed owner");
            self.owner = user_id;
            self.credentials = None;
            self.client = None;
        }
    }
}

/// Storage session for one data source on behalf of one user.
///
/// The client is built on first use and cached. Any change of user or
/// credentials drops the cached client.
pub struct S3Session {
    factory: Arc<dyn StorageFactory>,
    state: RwLock<SessionState>,
}

impl S3Session {
    pub fn new(factory: Arc<dyn StorageFactory>, user_id: i32) -> Self {
        Self {
            factory,
            state: RwLock::new(SessionState {
                owner: user_id,
                credentials: None,
                client: None,
            }),
        }
    }

    pub async fn owner(&self) -> i32 {
        self.state.read().await.owner
    }

    pub async fn has_credentials(&self) -> bool {
        self.state.read().await.credentials.is_some()
    }

    /// Rebind the session to `user_id`. A different user loses the previous
    /// user's credentials and client.
    pub async fn switch_user(&self, user_id: i32) {
        self.state.write().await.rebind(user_id);
    }

    pub async fn set_credentials(&self, credentials: Option<Credentials>) {
        let mut state = self.state.write().await;
        state.credentials = credentials;
        state.client = None;
    }

    /// Load the data source's saved key pair (decrypting it) and use it for the
    /// next client. Without a saved pair the ambient credentials apply.
    pub async fn authenticate(
        &self,
        db: &DatabaseConnection,
        ring: &KeyRing,
        user_id: i32,
        group_id: i32,
        source_id: i32,
        ds: Option<&data_source::Model>,
    ) -> Result<(), SessionError> {
        self.switch_user(user_id).await;
        let owner = user_id;
        let loaded;
        let ds = match ds {
            Some(ds) => ds,
            None => {
                loaded = data_source::Entity::find_by_id(source_id)
                    .filter(data_source::Column::UserId.eq(owner))
                    .filter(data_source::Column::DatagroupId.eq(group_id))
                    .one(db)
                    .await?
                    .ok_or(SessionError::DataSourceNotFound(source_id))?;
                &loaded
            }
        };

        if ds.user_id != owner {
            return Err(SessionError::DataSourceNotFound(ds.id));
        }
        let (Some(key_name), Some(key_secret)) = (&ds.key_name, &ds.key_secret) else {
            self.set_credentials(None).await;
            return Ok(());
        };

        let key = ring.require(owner)?;
        let credentials = Credentials {
            key_name: crypto::decrypt(key_name, &key)?,
            key_secret: crypto::decrypt(key_secret, &key)?,
        };
        self.set_credentials(Some(credentials)).await;
        Ok(())
    }

    /// The storage client for `user_id`, built on first access. A caller other
    /// than the recorded owner never sees the owner's client.
    pub async fn client(&self, user_id: i32) -> Result<Arc<dyn ObjectStorage>, StorageError> {
        {
            let state = self.state.read().await;
            if state.owner == user_id
                && let Some(client) = &state.client
            {
                return Ok(client.clone());
            }
        }

        let mut state = self.state.write().await;
        state.rebind(user_id);
        if let Some(client) = &state.client {
            return Ok(client.clone());
        }
        let client = self.factory.connect(state.credentials.as_ref()).await?;
        state.client = Some(client.clone());
        Ok(client)
    }

    /// Whether the object exists. Only a not-found answer maps to `false`.
    pub async fn exists(
        &self,
        user_id: i32,
        bucket: &str,
        key: &str,
    ) -> Result<bool, StorageError> {
        match self.client(user_id).await?.head_object(bucket, key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
