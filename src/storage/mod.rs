//! Durable storage for finished recordings.
//!
//! Local files are pushed to a [`BlobStore`] by the [`UploadPipeline`] and
//! later shared through time-limited links built by the [`LinkGenerator`].

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StorageError;
use crate::global::RECORDS_DIR;

pub mod links;
pub mod s3;
mod sigv4;
pub mod upload;

pub use links::{LinkGenerator, LinkSet, ShareLink};
pub use s3::S3BlobStore;
pub use upload::{FileUpload, UploadPipeline, UploadReport};

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Present when more keys are available.
    pub next: Option<String>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, data: Vec<u8>, key: &str) -> Result<(), StorageError>;

    /// List keys starting with `prefix`, resuming from `continuation` if given.
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError>;

    /// URL granting read access to `key` for `validity`.
    async fn presign(&self, key: &str, validity: Duration) -> Result<String, StorageError>;
}

/// Remote prefix holding every recording of a channel: `records/<channel_id>/`.
pub fn channel_prefix(channel_id: &str) -> String {
    format!("{}/{}/", RECORDS_DIR, channel_id)
}

/// Remote key of one recording file: `records/<channel_id>/<file_name>`.
pub fn recording_key(channel_id: &str, file_name: &str) -> String {
    format!("{}{}", channel_prefix(channel_id), file_name)
}
