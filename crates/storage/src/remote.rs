//! Remote artifact backend.
//!
//! [`RemoteStore`] is the seam the gateway talks to; [`ObjectStore`] is
//! the S3-compatible implementation (Cloudflare R2 by default). Objects
//! are keyed `<job_id>/<name>`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use gazer_core::types::Timestamp;

use crate::config::RemoteConfig;
use crate::error::StorageError;
use crate::local::JobListing;
use crate::names::content_type_for;

/// Operations the gateway needs from a remote backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn put(&self, job_id: &str, name: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// `Ok(None)` when the object does not exist.
    async fn get(&self, job_id: &str, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn exists(&self, job_id: &str, name: &str) -> Result<bool, StorageError>;

    /// Whether any object exists under the job's prefix.
    async fn has_job(&self, job_id: &str) -> Result<bool, StorageError>;

    /// Delete every object under the job's prefix. Returns how many were
    /// removed.
    async fn delete_job(&self, job_id: &str) -> Result<usize, StorageError>;

    /// One entry per job prefix, with the newest object time.
    async fn list(&self) -> Result<Vec<JobListing>, StorageError>;
}

fn object_key(job_id: &str, name: &str) -> String {
    format!("{job_id}/{name}")
}

fn remote_err<E: std::error::Error>(e: E) -> StorageError {
    StorageError::Remote(DisplayErrorContext(e).to_string())
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// S3-compatible object storage client.
pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectStore {
    /// Build a client for an R2-style endpoint with static credentials.
    pub fn new(config: &RemoteConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "gazer-static",
        );

        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(config.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        tracing::info!(
            bucket = %config.bucket,
            endpoint = %config.endpoint(),
            "Remote object storage configured",
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }

    async fn keys_under(&self, prefix: Option<&str>) -> Result<Vec<(String, Option<Timestamp>)>, StorageError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(prefix.map(str::to_string))
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(remote_err)?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    let modified = object.last_modified().and_then(to_timestamp);
                    keys.push((key.to_string(), modified));
                }
            }
        }
        Ok(keys)
    }
}

fn to_timestamp(dt: &aws_smithy_types::DateTime) -> Option<Timestamp> {
    chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl RemoteStore for ObjectStore {
    async fn put(&self, job_id: &str, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key(job_id, name))
            .content_type(content_type_for(name))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(remote_err)?;
        Ok(())
    }

    async fn get(&self, job_id: &str, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key(job_id, name))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None)
            }
            Err(e) => return Err(remote_err(e)),
        };

        let data = output.body.collect().await.map_err(remote_err)?;
        Ok(Some(data.into_bytes().to_vec()))
    }

    async fn exists(&self, job_id: &str, name: &str) -> Result<bool, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object_key(job_id, name))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(remote_err(e)),
        }
    }

    async fn has_job(&self, job_id: &str) -> Result<bool, StorageError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{job_id}/"))
            .max_keys(1)
            .send()
            .await
            .map_err(remote_err)?;
        Ok(!output.contents().is_empty())
    }

    async fn delete_job(&self, job_id: &str) -> Result<usize, StorageError> {
        let keys = self.keys_under(Some(&format!("{job_id}/"))).await?;
        for (key, _) in &keys {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(remote_err)?;
        }
        Ok(keys.len())
    }

    async fn list(&self) -> Result<Vec<JobListing>, StorageError> {
        let mut newest: HashMap<String, Timestamp> = HashMap::new();
        for (key, modified) in self.keys_under(None).await? {
            let Some((job_id, _)) = key.split_once('/') else {
                continue;
            };
            let modified = modified.unwrap_or_else(chrono::Utc::now);
            newest
                .entry(job_id.to_string())
                .and_modify(|t| *t = (*t).max(modified))
                .or_insert(modified);
        }

        Ok(newest
            .into_iter()
            .map(|(job_id, last_modified)| JobListing {
                job_id,
                last_modified,
            })
            .collect())
    }
}
