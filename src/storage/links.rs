use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::BlobStore;
use crate::error::StorageError;

pub const DEFAULT_LINK_VALIDITY: Duration = Duration::from_secs(15 * 60);

/// A time-limited read link to one stored recording. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    pub key: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Links generated for a prefix. Keys whose link could not be built are
/// listed in `omitted`; the chat reply does not mention them.
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    pub links: Vec<ShareLink>,
    pub omitted: Vec<String>,
}

#[derive(Clone)]
pub struct LinkGenerator {
    store: Arc<dyn BlobStore>,
    validity: Duration,
    max_concurrency: usize,
}

impl LinkGenerator {
    pub fn new(store: Arc<dyn BlobStore>, validity: Duration, max_concurrency: usize) -> Self {
        Self {
            store,
            validity,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// List everything under `prefix` and build a link per key. Listing
    /// failures abort the whole request; per-key failures only drop that key.
    pub async fn generate(&self, prefix: &str) -> Result<LinkSet, StorageError> {
        let keys = self.list_all(prefix).await?;
        debug!("Found {} objects under {}", keys.len(), prefix);

        let links = Arc::new(Mutex::new(Vec::with_capacity(keys.len())));
        let omitted = Arc::new(Mutex::new(Vec::new()));
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for key in keys {
            let store = Arc::clone(&self.store);
            let links = Arc::clone(&links);
            let omitted = Arc::clone(&omitted);
            let permits = Arc::clone(&permits);
            let validity = self.validity;

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let issued_at = Utc::now();
                match store.presign(&key, validity).await {
                    Ok(url) => {
                        let expires_at = issued_at
                            + chrono::Duration::from_std(validity)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                        links.lock().await.push(ShareLink {
                            key,
                            url,
                            expires_at,
                        });
                    }
                    Err(e) => {
                        error!("Failed to generate link for {}: {}", key, e);
                        omitted.lock().await.push(key);
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Link task panicked: {}", e);
            }
        }

        let mut links = std::mem::take(&mut *links.lock().await);
        let mut omitted = std::mem::take(&mut *omitted.lock().await);
        links.sort_by(|a, b| a.key.cmp(&b.key));
        omitted.sort();

        if !omitted.is_empty() {
            warn!(
                "{} of {} links under {} could not be generated",
                omitted.len(),
                links.len() + omitted.len(),
                prefix
            );
        }
        info!("Generated {} links under {}", links.len(), prefix);

        Ok(LinkSet { links, omitted })
    }

    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .store
                .list_page(prefix, continuation.as_deref())
                .await?;
            keys.extend(page.keys);

            match page.next {
                Some(next) if continuation.as_deref() != Some(next.as_str()) => {
                    continuation = Some(next)
                }
                Some(_) => {
                    return Err(StorageError::Backend(
                        "listing returned the same continuation token twice".to_string(),
                    ))
                }
                None => break,
            }
        }

        Ok(keys)
    }
}
