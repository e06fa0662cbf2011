//! Blob-storage collaborator holding product images.
//!
//! The [`BlobStore`] trait is the seam the catalog service depends on:
//! upload yields a public URL plus an opaque file id, delete takes the id
//! back. [`DriveStore`] talks to a Drive-style HTTP API. No retries here;
//! a failed call is reported once and the caller decides what survives.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the blob-storage collaborator.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("delete failed: {0}")]
    Delete(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Reference to a stored image: the public URL written into the catalog
/// row, and the provider file id needed to delete the blob later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub url: String,
    pub file_id: String,
}

/// External blob storage, addressed by opaque file identifiers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads the image and makes it publicly readable.
    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredImage, BlobStoreError>;

    /// Deletes the blob with the given file id.
    async fn delete(&self, file_id: &str) -> Result<(), BlobStoreError>;
}

/// Drive-style HTTP implementation: multipart upload into a fixed folder,
/// public-read permission grant, delete by file id.
pub struct DriveStore {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
    folder_id: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    id: String,
}

impl DriveStore {
    pub fn new(
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
        folder_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            upload_base: upload_base.into(),
            folder_id: folder_id.into(),
            token: token.into(),
        }
    }
}

fn public_url(api_base: &str, file_id: &str) -> String {
    format!("{}/files/{}?alt=media", api_base.trim_end_matches('/'), file_id)
}

#[async_trait]
impl BlobStore for DriveStore {
    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredImage, BlobStoreError> {
        let metadata = serde_json::json!({
            "name": filename,
            "parents": [self.folder_id],
        });
        let form = reqwest::multipart::Form::new()
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata.to_string())
                    .mime_str("application/json")?,
            )
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(filename.to_string())
                    .mime_str(content_type)?,
            );

        let resp = self
            .http
            .post(format!(
                "{}/files?uploadType=multipart&fields=id",
                self.upload_base.trim_end_matches('/')
            ))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BlobStoreError::Upload(format!(
                "upload returned status {}",
                resp.status()
            )));
        }
        let body: UploadResponse = resp.json().await?;
        if body.id.is_empty() {
            return Err(BlobStoreError::Upload("upload returned no file id".into()));
        }
        debug!("Uploaded blob {} as file id {}", filename, body.id);

        // The stored URL is only useful if anyone can read it, so a failed
        // permission grant counts as a failed upload.
        let permission = serde_json::json!({ "role": "reader", "type": "anyone" });
        let resp = self
            .http
            .post(format!(
                "{}/files/{}/permissions",
                self.api_base.trim_end_matches('/'),
                body.id
            ))
            .bearer_auth(&self.token)
            .json(&permission)
            .send()
            .await?;
        if !resp.status().is_success() {
            warn!("Permission grant failed for file id {}", body.id);
            return Err(BlobStoreError::Upload(format!(
                "permission grant returned status {}",
                resp.status()
            )));
        }

        Ok(StoredImage {
            url: public_url(&self.api_base, &body.id),
            file_id: body.id,
        })
    }

    async fn delete(&self, file_id: &str) -> Result<(), BlobStoreError> {
        let resp = self
            .http
            .delete(format!(
                "{}/files/{}",
                self.api_base.trim_end_matches('/'),
                file_id
            ))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BlobStoreError::Delete(format!(
                "delete returned status {}",
                resp.status()
            )));
        }
        debug!("Deleted blob file id {}", file_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url_shape() {
        assert_eq!(
            public_url("https://api.example.com/drive/v3/", "abc123"),
            "https://api.example.com/drive/v3/files/abc123?alt=media"
        );
    }

    #[test]
    fn test_empty_id_rejected_shape() {
        let body: UploadResponse = serde_json::from_str("{}").unwrap();
        assert!(body.id.is_empty());
    }
}
