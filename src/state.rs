//! Shared state handed to every handler.

use crate::{
    auth::Authenticator,
    config::{AppConfig, Backend},
    models::asset::UploadLimits,
    services::{
        inspect::FfprobeInspector,
        pipeline::IngestPipeline,
        publisher::{
            InlinePublisher, LocalPublisher, MemoryPublisher, MemoryStore, ObjectStorePublisher,
            PublicUrl, Publisher, S3Settings,
        },
        staging::Stager,
        transform::FastStartTransformer,
        video_store::VideoStore,
    },
};
use anyhow::Context;
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub videos: VideoStore,
    pub auth: Arc<Authenticator>,
    pub pipeline: Arc<IngestPipeline>,
    /// Backing map of the memory backend; empty unless a kind publishes to memory.
    pub memory_assets: Arc<MemoryStore>,
    pub scratch_dir: PathBuf,
}

impl AppState {
    pub fn from_config(cfg: &AppConfig, db: Arc<SqlitePool>) -> anyhow::Result<Self> {
        let videos = VideoStore::new(db);
        let memory_assets = Arc::new(MemoryStore::default());
        let limits = UploadLimits {
            video: cfg.max_video_bytes,
            thumbnail: cfg.max_thumbnail_bytes,
        };

        let video_publisher = build_publisher(cfg, cfg.video_backend, limits.video, &memory_assets)
            .context("configuring video backend")?;
        let thumbnail_publisher =
            build_publisher(cfg, cfg.thumbnail_backend, limits.thumbnail, &memory_assets)
                .context("configuring thumbnail backend")?;

        let mut pipeline = IngestPipeline::new(
            videos.clone(),
            Stager::new(&cfg.scratch_dir),
            Arc::new(FfprobeInspector::new(&cfg.ffprobe_bin, cfg.tool_timeout)),
            video_publisher,
            thumbnail_publisher,
            limits,
        );
        if cfg.fast_start {
            pipeline = pipeline.with_transformer(Arc::new(FastStartTransformer::new(
                &cfg.ffmpeg_bin,
                cfg.tool_timeout,
            )));
        }

        Ok(Self {
            videos,
            auth: Arc::new(Authenticator::new(&cfg.jwt_secret)),
            pipeline: Arc::new(pipeline),
            memory_assets,
            scratch_dir: cfg.scratch_dir.clone(),
        })
    }
}

fn build_publisher(
    cfg: &AppConfig,
    backend: Backend,
    max_bytes: u64,
    memory_assets: &Arc<MemoryStore>,
) -> anyhow::Result<Arc<dyn Publisher>> {
    let publisher: Arc<dyn Publisher> = match backend {
        Backend::S3 => {
            let bucket = cfg
                .s3_bucket
                .clone()
                .context("INGEST_S3_BUCKET is required for the s3 backend")?;
            let url = match &cfg.cdn_domain {
                Some(domain) => PublicUrl::Cdn {
                    domain: domain.clone(),
                },
                None => PublicUrl::Bucket {
                    bucket: bucket.clone(),
                    domain: cfg.s3_public_domain(),
                },
            };
            Arc::new(ObjectStorePublisher::s3(&S3Settings {
                bucket,
                region: cfg.s3_region.clone(),
                endpoint: cfg.s3_endpoint.clone(),
                url,
                part_size: cfg.s3_part_size,
            })?)
        }
        Backend::Local => Arc::new(LocalPublisher::new(&cfg.assets_root, &cfg.public_base_url)),
        Backend::Memory => Arc::new(MemoryPublisher::new(
            memory_assets.clone(),
            &cfg.public_base_url,
        )),
        Backend::Inline => Arc::new(InlinePublisher::new(max_bytes)),
    };
    Ok(publisher)
}
