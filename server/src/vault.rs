//! Per-user crypt keys derived from the master password.
//!
//! Keys live only in memory ([`KeyRing`]); the database stores the Argon2 salt and
//! an encrypted marker used to validate the master password on later unlocks.

use chrono::Utc;
use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait, sea_query::Expr,
};

use crate::crypto::{self, CryptoError};
use crate::entity::{app_user, data_source};

const MASTERPASS_CHECK: &str = "databrowser:masterpass";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Crypt key is missing.")]
    CryptKeyMissing,
    #[error("Incorrect master password")]
    IncorrectMasterPassword,
    #[error("User not found")]
    UserNotFound,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("Database error: {0}")]
    Db(#[from] DbErr),
}

/// Unlocked crypt keys, keyed by user id.
#[derive(Default)]
pub struct KeyRing {
    keys: DashMap<i32, [u8; 32]>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_crypt_key(&self, user_id: i32) -> Option<[u8; 32]> {
        self.keys.get(&user_id).map(|k| *k)
    }

    /// Like [`get_crypt_key`](Self::get_crypt_key), with absence as an error.
    pub fn require(&self, user_id: i32) -> Result<[u8; 32], VaultError> {
        self.get_crypt_key(user_id)
            .ok_or(VaultError::CryptKeyMissing)
    }

    pub fn insert(&self, user_id: i32, key: [u8; 32]) {
        self.keys.insert(user_id, key);
    }

    pub fn forget(&self, user_id: i32) {
        self.keys.remove(&user_id);
    }
}

/// Outcome of [`unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unlock {
    /// First use: the master password was recorded.
    Created,
    /// The master password matched the recorded one.
    Validated,
}

/// Derive the user's key from `master_password` and place it in the key ring.
///
/// The first call records an encrypted check marker; later calls must decrypt
/// it, otherwise the key ring is left untouched.
pub async fn unlock(
    db: &DatabaseConnection,
    ring: &KeyRing,
    user_id: i32,
    master_password: &str,
) -> Result<Unlock, VaultError> {
    let user = app_user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or(VaultError::UserNotFound)?;

    let key = crypto::derive_key(master_password, &user.crypt_salt)?;

    let outcome = match &user.masterpass_check {
        Some(check) => {
            let marker = crypto::decrypt(check, &key)
                .map_err(|_| VaultError::IncorrectMasterPassword)?;
            if marker != MASTERPASS_CHECK {
                return Err(VaultError::IncorrectMasterPassword);
            }
            Unlock::Validated
        }
        None => {
            let mut active: app_user::ActiveModel = user.into();
            active.masterpass_check = Set(Some(crypto::encrypt(MASTERPASS_CHECK, &key)?));
            active.updated_at = Set(Utc::now().naive_utc());
            active.update(db).await?;
            Unlock::Created
        }
    };

    ring.insert(user_id, key);
    Ok(outcome)
}

/// Forget the master password: saved secrets become undecryptable, so they are dropped too.
pub async fn reset(
    db: &DatabaseConnection,
    ring: &KeyRing,
    user_id: i32,
) -> Result<u64, VaultError> {
    let txn = db.begin().await?;

    let user = app_user::Entity::find_by_id(user_id)
        .one(&txn)
        .await?
        .ok_or(VaultError::UserNotFound)?;

    let cleared = remove_saved_secrets(&txn, user_id).await?;

    let mut active: app_user::ActiveModel = user.into();
    active.masterpass_check = Set(None);
    active.crypt_salt = Set(crypto::generate_salt());
    active.updated_at = Set(Utc::now().naive_utc());
    active.update(&txn).await?;

    txn.commit().await?;
    ring.forget(user_id);

    tracing::info!(user_id, cleared, "master password reset");
    Ok(cleared)
}

/// Null out the stored key pair of every data source owned by `user_id`.
pub async fn remove_saved_secrets<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<u64, DbErr> {
    let res = data_source::Entity::update_many()
        .col_expr(data_source::Column::KeyName, Expr::value(Option::<String>::None))
        .col_expr(data_source::Column::KeySecret, Expr::value(Option::<String>::None))
        .filter(data_source::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}
