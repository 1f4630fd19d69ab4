use std::path::PathBuf;

use gazer_core::credentials::StorageCredentials;
use gazer_core::env;

use crate::names::DEFAULT_REQUIRED_ARTIFACTS;

/// Storage layout and optional remote backend.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub local_root: PathBuf,
    pub staging_root: PathBuf,
    pub required_artifacts: Vec<String>,
    pub remote: Option<RemoteConfig>,
}

/// S3-compatible (R2) connection settings.
#[derive(Clone)]
pub struct RemoteConfig {
    pub bucket: String,
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub public_url_base: Option<String>,
    /// Overrides the endpoint derived from `account_id`.
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("bucket", &self.bucket)
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("public_url_base", &self.public_url_base)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl RemoteConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.r2.cloudflarestorage.com", self.account_id))
    }

    /// Credentials handed to the worker so it can upload directly.
    pub fn credentials(&self) -> StorageCredentials {
        StorageCredentials {
            bucket: self.bucket.clone(),
            account_id: self.account_id.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            public_url_base: self.public_url_base.clone(),
        }
    }
}

impl StorageConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                          |
    /// |------------------------|----------------------------------|
    /// | `STORAGE_LOCAL_ROOT`   | `./data/results`                 |
    /// | `STORAGE_STAGING_ROOT` | `./data/staging`                 |
    /// | `REQUIRED_ARTIFACTS`   | quadrant sprites + metadata.json |
    /// | `R2_BUCKET`            | unset                            |
    /// | `R2_ACCOUNT_ID`        | unset                            |
    /// | `R2_ACCESS_KEY_ID`     | unset                            |
    /// | `R2_SECRET_ACCESS_KEY` | unset                            |
    /// | `R2_PUBLIC_URL_BASE`   | unset                            |
    /// | `R2_ENDPOINT`          | `https://<account>.r2.cloudflarestorage.com` |
    ///
    /// The remote backend is enabled only when bucket, account id and
    /// both keys are all set.
    pub fn from_env() -> Self {
        let remote = match (
            env::optional("R2_BUCKET"),
            env::optional("R2_ACCOUNT_ID"),
            env::optional("R2_ACCESS_KEY_ID"),
            env::optional("R2_SECRET_ACCESS_KEY"),
        ) {
            (Some(bucket), Some(account_id), Some(access_key_id), Some(secret_access_key)) => {
                Some(RemoteConfig {
                    bucket,
                    account_id,
                    access_key_id,
                    secret_access_key,
                    public_url_base: env::optional("R2_PUBLIC_URL_BASE"),
                    endpoint: env::optional("R2_ENDPOINT"),
                })
            }
            (None, None, None, None) => None,
            _ => {
                tracing::warn!("Incomplete R2 configuration; remote storage disabled");
                None
            }
        };

        Self {
            local_root: env::string_or("STORAGE_LOCAL_ROOT", "./data/results").into(),
            staging_root: env::string_or("STORAGE_STAGING_ROOT", "./data/staging").into(),
            required_artifacts: env::list_or("REQUIRED_ARTIFACTS", DEFAULT_REQUIRED_ARTIFACTS),
            remote,
        }
    }
}
