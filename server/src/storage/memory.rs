//! In-memory storage backend. Used by tests and by `DBR_STORAGE_BACKEND=memory`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AccessControlPolicy, AclOwner, BucketListing, BucketSummary, Credentials, Grant, Grantee,
    ObjectStorage, ObjectSummary, Result, StorageError, StorageFactory,
};

const OWNER: &str = "memory";

#[derive(Debug, Default)]
struct MemoryBucket {
    created: Option<DateTime<Utc>>,
    objects: BTreeMap<String, (i64, DateTime<Utc>)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: BTreeMap<String, MemoryBucket>,
    /// When set, only this key pair may connect.
    accepted: Option<Credentials>,
}

/// Shared in-memory store. Cloning shares the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, name: &str) -> Self {
        self.write(|s| {
            s.buckets.entry(name.to_string()).or_insert_with(|| MemoryBucket {
                created: Some(Utc::now()),
                objects: BTreeMap::new(),
            });
        });
        self
    }

    /// Add an object, creating its bucket if needed. Folders are zero-size keys ending in `/`.
    pub fn with_object(self, bucket: &str, key: &str, size: i64) -> Self {
        self.write(|s| {
            s.buckets
                .entry(bucket.to_string())
                .or_insert_with(|| MemoryBucket {
                    created: Some(Utc::now()),
                    objects: BTreeMap::new(),
                })
                .objects
                .insert(key.to_string(), (size, Utc::now()));
        });
        self
    }

    /// Reject connections that do not present exactly this key pair.
    pub fn require_credentials(self, key_name: &str, key_secret: &str) -> Self {
        self.write(|s| {
            s.accepted = Some(Credentials {
                key_name: key_name.to_string(),
                key_secret: key_secret.to_string(),
            });
        });
        self
    }

    fn write(&self, f: impl FnOnce(&mut MemoryState)) {
        // a poisoned lock only means another test thread panicked mid-write
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut *guard);
    }
}

#[async_trait]
impl StorageFactory for MemoryStorage {
    async fn connect(&self, credentials: Option<&Credentials>) -> Result<Arc<dyn ObjectStorage>> {
        let authorized = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            match &state.accepted {
                None => true,
                Some(accepted) => credentials == Some(accepted),
            }
        };
        Ok(Arc::new(MemoryClient {
            state: self.state.clone(),
            authorized,
        }))
    }
}

struct MemoryClient {
    state: Arc<RwLock<MemoryState>>,
    authorized: bool,
}

impl MemoryClient {
    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> Result<T>) -> Result<T> {
        if !self.authorized {
            return Err(StorageError::AccessDenied(
                "The AWS Access Key Id you provided does not exist in our records.".to_string(),
            ));
        }
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&*guard)
    }

    fn owner_policy() -> AccessControlPolicy {
        let owner = AclOwner {
            display_name: Some(OWNER.to_string()),
            id: Some(OWNER.to_string()),
        };
        AccessControlPolicy {
            grants: vec![Grant {
                grantee: Some(Grantee {
                    grantee_type: "CanonicalUser".to_string(),
                    display_name: owner.display_name.clone(),
                    id: owner.id.clone(),
                    ..Default::default()
                }),
                permission: Some("FULL_CONTROL".to_string()),
            }],
            owner: Some(owner),
        }
    }
}

fn no_such_bucket(bucket: &str) -> StorageError {
    StorageError::NotFound(format!("NoSuchBucket: {bucket}"))
}

#[async_trait]
impl ObjectStorage for MemoryClient {
    async fn list_buckets(&self) -> Result<BucketListing> {
        self.read(|s| {
            Ok(BucketListing {
                buckets: s
                    .buckets
                    .iter()
                    .map(|(name, b)| BucketSummary {
                        name: name.clone(),
                        creation_date: b.created,
                    })
                    .collect(),
                owner: Some(OWNER.to_string()),
            })
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectSummary>> {
        self.read(|s| {
            let b = s.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
            let prefix = prefix.unwrap_or("");
            Ok(b.objects
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, (size, mtime))| ObjectSummary {
                    key: key.clone(),
                    size: *size,
                    last_modified: Some(*mtime),
                })
                .collect())
        })
    }

    async fn bucket_acl(&self, bucket: &str) -> Result<AccessControlPolicy> {
        self.read(|s| {
            s.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
            Ok(Self::owner_policy())
        })
    }

    async fn object_acl(&self, bucket: &str, key: &str) -> Result<AccessControlPolicy> {
        self.read(|s| {
            let b = s.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
            if !b.objects.contains_key(key) {
                return Err(StorageError::NotFound(format!("NoSuchKey: {key}")));
            }
            Ok(Self::owner_policy())
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectSummary> {
        self.read(|s| {
            let b = s.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
            let (size, mtime) = b
                .objects
                .get(key)
                .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}")))?;
            Ok(ObjectSummary {
                key: key.to_string(),
                size: *size,
                last_modified: Some(*mtime),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_objects_by_prefix() {
        let store = MemoryStorage::new()
            .with_object("lake", "a/", 0)
            .with_object("lake", "a/b.csv", 10)
            .with_object("lake", "z.txt", 3);
        let client = store.connect(None).await.unwrap();

        let keys: Vec<String> = client
            .list_objects("lake", Some("a/"))
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a/", "a/b.csv"]);

        assert!(matches!(
            client.list_objects("missing", None).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_required_credentials() {
        let store = MemoryStorage::new()
            .with_bucket("lake")
            .require_credentials("AKID", "secret");

        let anonymous = store.connect(None).await.unwrap();
        assert!(matches!(
            anonymous.list_buckets().await,
            Err(StorageError::AccessDenied(_))
        ));

        let creds = Credentials {
            key_name: "AKID".into(),
            key_secret: "secret".into(),
        };
        let client = store.connect(Some(&creds)).await.unwrap();
        let listing = client.list_buckets().await.unwrap();
        assert_eq!(listing.buckets.len(), 1);
        assert_eq!(listing.owner.as_deref(), Some("memory"));
    }

    #[tokio::test]
    async fn test_head_and_acl() {
        let store = MemoryStorage::new().with_object("lake", "x.par", 5);
        let client = store.connect(None).await.unwrap();
        assert_eq!(client.head_object("lake", "x.par").await.unwrap().size, 5);
        assert!(matches!(
            client.head_object("lake", "y").await,
            Err(StorageError::NotFound(_))
        ));
        let acl = client.object_acl("lake", "x.par").await.unwrap();
        assert_eq!(acl.grants.len(), 1);
        let json = serde_json::to_value(&acl).unwrap();
        assert_eq!(json["Grants"][0]["Permission"], "FULL_CONTROL");
        assert_eq!(json["Owner"]["ID"], "memory");
    }
}
