use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use password_hash::SaltString;
use rand_core::OsRng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};

use crate::crypto;
use crate::entity::{app_user, data_group};

/// Name of the group every user starts with. It can be renamed but never deleted.
pub const DEFAULT_GROUP_NAME: &str = "Data Sources";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("User not found")]
    NotFound,
    #[error("Invalid password")]
    InvalidPassword,
    #[error("User is inactive")]
    Inactive,
    #[error("Database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("Hash error: {0}")]
    Hash(String),
}

pub struct Auth {
    db: DatabaseConnection,
}

impl Auth {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Authenticate a user for the REST API, returning the model on success.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<app_user::Model, AuthError> {
        let user = app_user::Entity::find()
            .filter(app_user::Column::Username.eq(username))
            .one(&self.db)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        let hash =
            PasswordHash::new(&user.password_hash).map_err(|e| AuthError::Hash(e.to_string()))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .map_err(|_| AuthError::InvalidPassword)?;

        Ok(user)
    }

    /// Create a user with an Argon2-hashed password and its non-deletable default data group.
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<app_user::Model, AuthError> {
        let password_hash = Self::hash_password(password)?;
        let now = Utc::now().naive_utc();

        let txn = self.db.begin().await?;
        let user = app_user::ActiveModel {
            username: Set(username.to_owned()),
            password_hash: Set(password_hash),
            is_active: Set(true),
            crypt_salt: Set(crypto::generate_salt()),
            masterpass_check: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        data_group::ActiveModel {
            user_id: Set(user.id),
            name: Set(DEFAULT_GROUP_NAME.to_owned()),
            can_delete: Set(false),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(user)
    }

    /// Return the total number of users.
    pub async fn count_users(&self) -> Result<u64, AuthError> {
        Ok(app_user::Entity::find().count(&self.db).await?)
    }

    /// Hash a plaintext password with Argon2id + a random salt.
    pub fn hash_password(password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .to_string();
        Ok(hash)
    }
}
