//! S3-compatible object store over plain HTTP.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

use super::sigv4::{self, Credentials, SigningRequest};
use super::{BlobStore, ListPage};
use crate::config::StorageConfig;
use crate::error::StorageError;

/// Longest validity a SigV4 presigned URL may carry.
const MAX_PRESIGN: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct S3BlobStore {
    client: reqwest::Client,
    credentials: Credentials,
    region: String,
    bucket: String,
    scheme: String,
    host: String,
    /// Path prefix before the key: `/` for virtual-hosted, `/<bucket>/` for path-style.
    base_path: String,
}

impl S3BlobStore {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::Config("storage.bucket is not set".to_string()));
        }
        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => Credentials {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            },
            _ => {
                return Err(StorageError::Config(
                    "storage credentials are missing (access_key / secret_key)".to_string(),
                ))
            }
        };

        let (scheme, host, base_path) = match &config.endpoint {
            Some(endpoint) => {
                let (scheme, rest) = endpoint
                    .split_once("://")
                    .ok_or_else(|| StorageError::Config(format!("invalid endpoint {endpoint}")))?;
                let host = rest.trim_end_matches('/');
                if host.is_empty() || host.contains('/') {
                    return Err(StorageError::Config(format!("invalid endpoint {endpoint}")));
                }
                (scheme.to_string(), host.to_string(), format!("/{}/", config.bucket))
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
                "/".to_string(),
            ),
        };

        info!(
            "Initialized S3 store: bucket {} at {}://{}",
            config.bucket, scheme, host
        );

        Ok(Self {
            client: reqwest::Client::new(),
            credentials,
            region: config.region.clone(),
            bucket: config.bucket.clone(),
            scheme,
            host,
            base_path,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_path(&self, key: &str) -> String {
        format!("{}{}", self.base_path, key)
    }

    fn url(&self, path: &str, query: &str) -> String {
        let mut url = format!("{}://{}{}", self.scheme, self.host, sigv4::encode_path(path));
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    async fn check(response: reqwest::Response) -> Result<String, StorageError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StorageError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, data: Vec<u8>, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key);
        let request = SigningRequest {
            method: "PUT",
            host: &self.host,
            path: &path,
            query: Vec::new(),
            payload_hash: sigv4::sha256_hex(&data),
        };
        let signed = sigv4::sign_headers(&self.credentials, &self.region, &request, Utc::now());

        debug!("PUT {} ({} bytes)", key, data.len());
        let response = self
            .client
            .put(self.url(&path, ""))
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .body(data)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        if let Some(token) = continuation {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let path = self.base_path.clone();
        let query_string = query
            .iter()
            .map(|(k, v)| format!("{}={}", sigv4::uri_encode(k), sigv4::uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let request = SigningRequest {
            method: "GET",
            host: &self.host,
            path: &path,
            query,
            payload_hash: sigv4::sha256_hex(b""),
        };
        let signed = sigv4::sign_headers(&self.credentials, &self.region, &request, Utc::now());

        let response = self
            .client
            .get(self.url(&path, &query_string))
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .send()
            .await?;

        let body = Self::check(response).await?;
        Ok(parse_list_response(&body))
    }

    async fn presign(&self, key: &str, validity: Duration) -> Result<String, StorageError> {
        if validity > MAX_PRESIGN {
            return Err(StorageError::ValidityTooLong(validity));
        }
        let path = self.object_path(key);
        let query = sigv4::presign_query(
            &self.credentials,
            &self.region,
            &self.host,
            &path,
            Utc::now(),
            validity.as_secs().max(1),
        );
        Ok(self.url(&path, &query))
    }
}

fn tag_regex(tag: &str) -> Regex {
    // Tag names are fixed literals below, so the pattern always compiles.
    Regex::new(&format!("<{tag}>([^<]*)</{tag}>")).unwrap_or_else(|_| unreachable!())
}

/// Pull keys and the continuation token out of a ListObjectsV2 response.
fn parse_list_response(body: &str) -> ListPage {
    static KEY: OnceLock<Regex> = OnceLock::new();
    static TRUNCATED: OnceLock<Regex> = OnceLock::new();
    static NEXT: OnceLock<Regex> = OnceLock::new();

    let keys = KEY
        .get_or_init(|| tag_regex("Key"))
        .captures_iter(body)
        .map(|caps| unescape_xml(&caps[1]))
        .collect();

    let truncated = TRUNCATED
        .get_or_init(|| tag_regex("IsTruncated"))
        .captures(body)
        .map(|caps| caps[1].trim() == "true")
        .unwrap_or(false);

    let next = if truncated {
        NEXT.get_or_init(|| tag_regex("NextContinuationToken"))
            .captures(body)
            .map(|caps| unescape_xml(&caps[1]))
    } else {
        None
    };

    ListPage { keys, next }
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
