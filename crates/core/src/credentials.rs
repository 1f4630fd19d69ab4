//! Remote storage credentials handed to the worker so it can upload
//! results directly.

use serde::{Deserialize, Serialize};

/// S3-compatible bucket credentials in the worker's wire format.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCredentials {
    pub bucket: String,
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub public_url_base: Option<String>,
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("bucket", &self.bucket)
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("public_url_base", &self.public_url_base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secret() {
        let creds = StorageCredentials {
            bucket: "results".into(),
            account_id: "acct".into(),
            access_key_id: "AKID".into(),
            secret_access_key: "super-secret".into(),
            public_url_base: None,
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("super-secret"));
    }
}
