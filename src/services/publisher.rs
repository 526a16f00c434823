//! Publishers push finished bytes to a content store and return the public URL.
//!
//! Backends:
//! - `ObjectStorePublisher` - S3 (or any `object_store` backend), streamed, bucket or CDN URLs
//! - `LocalPublisher` - files beneath an assets root, served at `/assets`
//! - `MemoryPublisher` - process-wide keyed map, served at `/api/assets`
//! - `InlinePublisher` - no storage at all, returns a `data:` URL
//!
//! The pipeline only sees `dyn Publisher`, so it never knows which one it has.

use crate::{
    errors::{PipelineError, PipelineResult},
    services::keys::StorageKey,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, aws::AmazonS3Builder,
    buffered::BufWriter, path::Path as ObjectPath,
};
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Instant};
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    sync::RwLock,
};
use uuid::Uuid;

/// Readable body handed to a publisher, positioned at its first byte.
pub type Body<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Store `body` under `key` and return an externally resolvable reference.
    async fn publish(
        &self,
        key: &StorageKey,
        content_type: &str,
        body: Body<'_>,
    ) -> PipelineResult<String>;
}

async fn read_body(body: Body<'_>) -> PipelineResult<Vec<u8>> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)
        .await
        .map_err(|err| PipelineError::PublishFailed(format!("reading staged file: {err}")))?;
    Ok(buf)
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// How public URLs for an object store are composed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicUrl {
    /// `https://{bucket}.{domain}/{key}`
    Bucket { bucket: String, domain: String },
    /// `{domain}/{key}`; `https://` is assumed when the domain has no scheme.
    Cdn { domain: String },
}

impl PublicUrl {
    pub fn for_key(&self, key: &StorageKey) -> String {
        match self {
            PublicUrl::Bucket { bucket, domain } => {
                format!("https://{}.{}/{}", bucket, domain.trim_end_matches('/'), key)
            }
            PublicUrl::Cdn { domain } if domain.contains("://") => join_url(domain, key.as_str()),
            PublicUrl::Cdn { domain } => join_url(&format!("https://{domain}"), key.as_str()),
        }
    }
}

/// Connection settings for the S3 backend.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO and the like).
    pub endpoint: Option<String>,
    pub url: PublicUrl,
    pub part_size: usize,
}

/// Bytes buffered before an object store upload switches to multipart.
pub const DEFAULT_PART_SIZE: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct ObjectStorePublisher {
    store: Arc<dyn ObjectStore>,
    url: PublicUrl,
    part_size: usize,
}

impl ObjectStorePublisher {
    pub fn new(store: Arc<dyn ObjectStore>, url: PublicUrl) -> Self {
        Self {
            store,
            url,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Bodies up to `part_size` go up in one put, larger ones as multipart
    /// uploads of `part_size` chunks.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    /// Build an S3 client from the environment plus explicit settings.
    pub fn s3(settings: &S3Settings) -> anyhow::Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(settings.region.clone())
            .with_bucket_name(settings.bucket.clone());
        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }
        Ok(Self::new(Arc::new(builder.build()?), settings.url.clone())
            .with_part_size(settings.part_size))
    }

    async fn upload(
        &self,
        location: ObjectPath,
        attributes: Attributes,
        body: Body<'_>,
    ) -> std::io::Result<u64> {
        let mut writer = BufWriter::with_capacity(self.store.clone(), location, self.part_size)
            .with_attributes(attributes);
        match tokio::io::copy(body, &mut writer).await {
            Ok(written) => {
                writer.shutdown().await?;
                Ok(written)
            }
            Err(err) => {
                if let Err(abort) = writer.abort().await {
                    tracing::warn!(error = %abort, "failed to abort object store upload");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Publisher for ObjectStorePublisher {
    fn backend(&self) -> &'static str {
        "object-store"
    }

    async fn publish(
        &self,
        key: &StorageKey,
        content_type: &str,
        body: Body<'_>,
    ) -> PipelineResult<String> {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );

        let start = Instant::now();
        let size = self
            .upload(ObjectPath::from(key.as_str()), attributes, body)
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "object store upload failed"
                );
                PipelineError::PublishFailed(err.to_string())
            })?;

        tracing::info!(
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "object store upload successful"
        );
        Ok(self.url.for_key(key))
    }
}

/// Writes assets beneath `root`; the router serves them back at `/assets`.
#[derive(Clone, Debug)]
pub struct LocalPublisher {
    root: PathBuf,
    base_url: String,
}

impl LocalPublisher {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    async fn write(&self, key: &StorageKey, body: Body<'_>) -> std::io::Result<u64> {
        let final_path = self.root.join(key.as_str());
        let parent = final_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let written = async {
            let mut file = File::create(&tmp_path).await?;
            let written = tokio::io::copy(body, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &final_path).await?;
            Ok::<_, std::io::Error>(written)
        }
        .await;

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        written
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn publish(
        &self,
        key: &StorageKey,
        _content_type: &str,
        body: Body<'_>,
    ) -> PipelineResult<String> {
        let written = self.write(key, body).await.map_err(|err| {
            tracing::error!(error = %err, key = %key, root = %self.root.display(), "local publish failed");
            PipelineError::PublishFailed(err.to_string())
        })?;
        tracing::info!(key = %key, size_bytes = written, "saved asset to local storage");
        Ok(join_url(&self.base_url, &format!("assets/{key}")))
    }
}

/// A stored in-memory asset.
#[derive(Clone, Debug)]
pub struct MemoryAsset {
    pub content_type: String,
    pub data: Bytes,
}

/// Process-wide keyed asset map. Readers and writers of different keys
/// proceed concurrently under the shared lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    assets: RwLock<HashMap<String, MemoryAsset>>,
}

impl MemoryStore {
    pub async fn get(&self, key: &str) -> Option<MemoryAsset> {
        self.assets.read().await.get(key).cloned()
    }

    async fn put(&self, key: &str, asset: MemoryAsset) {
        self.assets.write().await.insert(key.to_string(), asset);
    }
}

#[derive(Clone, Debug)]
pub struct MemoryPublisher {
    store: Arc<MemoryStore>,
    base_url: String,
}

impl MemoryPublisher {
    pub fn new(store: Arc<MemoryStore>, base_url: impl Into<String>) -> Self {
        Self {
            store,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn publish(
        &self,
        key: &StorageKey,
        content_type: &str,
        body: Body<'_>,
    ) -> PipelineResult<String> {
        let data = read_body(body).await?;
        self.store
            .put(
                key.as_str(),
                MemoryAsset {
                    content_type: content_type.to_string(),
                    data: Bytes::from(data),
                },
            )
            .await;
        Ok(join_url(&self.base_url, &format!("api/assets/{key}")))
    }
}

/// Embeds the asset in the reference itself as a base64 `data:` URL.
#[derive(Clone, Debug)]
pub struct InlinePublisher {
    max_bytes: u64,
}

impl InlinePublisher {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl Publisher for InlinePublisher {
    fn backend(&self) -> &'static str {
        "inline"
    }

    async fn publish(
        &self,
        _key: &StorageKey,
        content_type: &str,
        body: Body<'_>,
    ) -> PipelineResult<String> {
        let mut data = Vec::new();
        body.take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut data)
            .await
            .map_err(|err| PipelineError::PublishFailed(err.to_string()))?;
        if data.len() as u64 > self.max_bytes {
            return Err(PipelineError::PublishFailed(format!(
                "asset larger than the {} byte inline limit",
                self.max_bytes
            )));
        }
        let encoded = general_purpose::STANDARD.encode(&data);
        Ok(format!("data:{content_type};base64,{encoded}"))
    }
}
