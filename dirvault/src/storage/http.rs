//! Blob store speaking to an HTTP object gateway.
//!
//! Objects live at `{endpoint}/{bucket}/{key}`:
//!
//! - `PUT` uploads a streamed body with an exact `content-length`
//! - `GET` downloads, `404` meaning the key does not exist
//! - `GET {endpoint}/{bucket}?prefix=P[&continuation-token=T]` lists keys,
//!   answering `{"keys": [...], "next_continuation_token": null | "..."}`
//!
//! Every request carries the access key pair as basic auth.

use crate::config::Credentials;
use crate::storage::{key_segments, BlobStore, StreamReader};
use crate::transfer::ProgressStream;
use crate::utils::{Result, StoreError, VaultError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Response, StatusCode, Url};
use serde::Deserialize;
use std::io;
use std::pin::Pin;
use tokio_util::io::ReaderStream;
use tracing::debug;

type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Deserialize)]
struct ListPage {
    keys: Vec<String>,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    base: Url,
    bucket: String,
    credentials: Credentials,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str, bucket: &str, credentials: Credentials) -> Result<Self> {
        let base = Url::parse(endpoint).map_err(|e| {
            VaultError::Config(format!("invalid storage endpoint {:?}: {}", endpoint, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(VaultError::Config(format!(
                "invalid storage endpoint {:?}",
                endpoint
            )));
        }
        if bucket.is_empty() || bucket.contains('/') {
            return Err(VaultError::Config(format!("invalid bucket name {:?}", bucket)));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("dirvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::from)?;

        Ok(Self {
            client,
            base,
            bucket: bucket.to_string(),
            credentials,
        })
    }

    fn bucket_url(&self) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.bucket);
        }
        url
    }

    fn object_url(&self, key: &str) -> std::result::Result<Url, StoreError> {
        let segments = key_segments(key)?;
        let mut url = self.bucket_url();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidKey(key.to_string()))?
            .extend(segments);
        Ok(url)
    }

    fn list_url(&self, prefix: &str, token: Option<&str>) -> Url {
        let mut url = self.bucket_url();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            if let Some(token) = token {
                query.append_pair("continuation-token", token);
            }
        }
        url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(
            &self.credentials.access_key_id,
            Some(&self.credentials.secret_access_key),
        )
    }
}

fn ensure_success(url: &Url, response: Response) -> std::result::Result<Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(StoreError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, reader: StreamReader, len: u64) -> std::result::Result<(), StoreError> {
        let url = self.object_url(key)?;
        let body = Body::wrap_stream(ProgressStream::new(ReaderStream::new(reader), key, len));

        let response = self
            .authorized(self.client.put(url.clone()))
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;
        ensure_success(&url, response)?;

        debug!("PUT {} ({} bytes)", url, len);
        Ok(())
    }

    async fn get(&self, key: &str) -> std::result::Result<StreamReader, StoreError> {
        let url = self.object_url(key)?;
        let response = self.authorized(self.client.get(url.clone())).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let response = ensure_success(&url, response)?;

        let stream: ByteStream = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(tokio_util::io::StreamReader::new(stream)))
    }

    async fn list(&self, prefix: &str) -> std::result::Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let url = self.list_url(prefix, token.as_deref());
            let response = self.authorized(self.client.get(url.clone())).send().await?;
            let page: ListPage = ensure_success(&url, response)?.json().await?;

            keys.extend(page.keys);
            match page.next_continuation_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        Ok(keys)
    }

    fn location(&self, key: &str) -> String {
        match self.object_url(key) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}/{}", self.bucket_url(), key),
        }
    }
}
