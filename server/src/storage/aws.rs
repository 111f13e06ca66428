//! AWS S3 backend built on the official SDK.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials as SdkCredentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use chrono::{DateTime, Utc};

use super::{
    AccessControlPolicy, AclOwner, BucketListing, BucketSummary, Credentials, Grant, Grantee,
    ObjectStorage, ObjectSummary, Result, StorageError, StorageFactory,
};

/// Connects to S3 (or an S3-compatible endpoint) with either a data source's key pair
/// or the ambient credential chain.
#[derive(Debug, Clone)]
pub struct AwsStorageFactory {
    endpoint: Option<String>,
    region: Option<String>,
    force_path_style: bool,
}

impl AwsStorageFactory {
    pub fn new(endpoint: Option<String>, region: Option<String>, force_path_style: bool) -> Self {
        Self {
            endpoint,
            region,
            force_path_style,
        }
    }
}

#[async_trait]
impl StorageFactory for AwsStorageFactory {
    async fn connect(&self, credentials: Option<&Credentials>) -> Result<Arc<dyn ObjectStorage>> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(c) = credentials {
            loader = loader.credentials_provider(SdkCredentials::new(
                c.key_name.clone(),
                c.key_secret.clone(),
                None,
                None,
                "datasource",
            ));
        }
        let sdk_config = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(self.force_path_style);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::debug!(
            endpoint = ?self.endpoint,
            region = ?self.region,
            explicit_credentials = credentials.is_some(),
            "building S3 client"
        );

        Ok(Arc::new(AwsStorage {
            client: Client::from_conf(builder.build()),
        }))
    }
}

pub struct AwsStorage {
    client: Client,
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Map an SDK failure to a storage error by its S3 error code.
fn map_sdk_err<E, R>(err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match err.code() {
        Some("NoSuchBucket" | "NoSuchKey" | "NotFound") => StorageError::NotFound(message),
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            StorageError::AccessDenied(message)
        }
        _ => StorageError::Service(message),
    }
}

fn convert_owner(owner: Option<&aws_sdk_s3::types::Owner>) -> Option<AclOwner> {
    owner.map(|o| AclOwner {
        display_name: o.display_name().map(str::to_string),
        id: o.id().map(str::to_string),
    })
}

fn convert_grants(grants: &[aws_sdk_s3::types::Grant]) -> Vec<Grant> {
    grants
        .iter()
        .map(|g| Grant {
            grantee: g.grantee().map(|ge| Grantee {
                grantee_type: ge.r#type().as_str().to_string(),
                display_name: ge.display_name().map(str::to_string),
                id: ge.id().map(str::to_string),
                uri: ge.uri().map(str::to_string),
                email_address: ge.email_address().map(str::to_string),
            }),
            permission: g.permission().map(|p| p.as_str().to_string()),
        })
        .collect()
}

#[async_trait]
impl ObjectStorage for AwsStorage {
    async fn list_buckets(&self) -> Result<BucketListing> {
        let out = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(map_sdk_err)?;

        Ok(BucketListing {
            buckets: out
                .buckets()
                .iter()
                .filter_map(|b| {
                    Some(BucketSummary {
                        name: b.name()?.to_string(),
                        creation_date: b.creation_date().and_then(to_chrono),
                    })
                })
                .collect(),
            owner: out
                .owner()
                .and_then(|o| o.display_name())
                .map(str::to_string),
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectSummary>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.map(str::to_string))
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(map_sdk_err)?;
            objects.extend(page.contents().iter().filter_map(|o| {
                Some(ObjectSummary {
                    key: o.key()?.to_string(),
                    size: o.size().unwrap_or(0),
                    last_modified: o.last_modified().and_then(to_chrono),
                })
            }));
        }

        tracing::debug!(bucket, prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }

    async fn bucket_acl(&self, bucket: &str) -> Result<AccessControlPolicy> {
        let out = self
            .client
            .get_bucket_acl()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_err)?;

        Ok(AccessControlPolicy {
            owner: convert_owner(out.owner()),
            grants: convert_grants(out.grants()),
        })
    }

    async fn object_acl(&self, bucket: &str, key: &str) -> Result<AccessControlPolicy> {
        let out = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_err)?;

        Ok(AccessControlPolicy {
            owner: convert_owner(out.owner()),
            grants: convert_grants(out.grants()),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectSummary> {
        let out = match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(out) => out,
            // HEAD responses carry no body, so the code may be missing
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found) =>
            {
                return Err(StorageError::NotFound(format!("{bucket}/{key}")));
            }
            Err(err) => return Err(map_sdk_err(err)),
        };

        Ok(ObjectSummary {
            key: key.to_string(),
            size: out.content_length().unwrap_or(0),
            last_modified: out.last_modified().and_then(to_chrono),
        })
    }
}
