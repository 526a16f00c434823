//! The ingest pipeline: authorize → validate → stage → [transform] → classify →
//! key → publish → record.
//!
//! Each step is a single collaborator call and the first failure ends the run.
//! The record is written exactly once, after the bytes are published; scratch
//! files are released by `StagedFile`'s drop on every exit path.

use crate::{
    errors::{PipelineError, PipelineResult},
    models::{
        asset::{AssetKind, UploadLimits},
        video::Video,
    },
    services::{
        inspect::{self, MediaInspector},
        keys::StorageKey,
        publisher::Publisher,
        staging::{StagedFile, Stager},
        transform::MediaTransformer,
        validator::validate_media_type,
        video_store::VideoStore,
    },
};
use bytes::Bytes;
use futures::Stream;
use std::{io, sync::Arc};
use uuid::Uuid;

/// Progress of a single ingest run; the last stage reached is logged on failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestStage {
    Authenticated,
    Authorized,
    Validated,
    Staged,
    Transformed,
    Classified,
    Published,
    Recorded,
}

/// One inbound file: its declared type and its byte stream.
pub struct Upload<S> {
    pub content_type: Option<String>,
    pub body: S,
}

pub struct IngestPipeline {
    videos: VideoStore,
    stager: Stager,
    inspector: Arc<dyn MediaInspector>,
    transformer: Option<Arc<dyn MediaTransformer>>,
    video_publisher: Arc<dyn Publisher>,
    thumbnail_publisher: Arc<dyn Publisher>,
    limits: UploadLimits,
}

impl IngestPipeline {
    pub fn new(
        videos: VideoStore,
        stager: Stager,
        inspector: Arc<dyn MediaInspector>,
        video_publisher: Arc<dyn Publisher>,
        thumbnail_publisher: Arc<dyn Publisher>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            videos,
            stager,
            inspector,
            transformer: None,
            video_publisher,
            thumbnail_publisher,
            limits,
        }
    }

    /// Rewrite videos with `transformer` before classification and publish.
    pub fn with_transformer(mut self, transformer: Arc<dyn MediaTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    fn publisher(&self, kind: AssetKind) -> &dyn Publisher {
        match kind {
            AssetKind::Video => self.video_publisher.as_ref(),
            AssetKind::Thumbnail => self.thumbnail_publisher.as_ref(),
        }
    }

    /// Run the pipeline for an already authenticated `user_id`.
    pub async fn ingest<S>(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        kind: AssetKind,
        upload: Upload<S>,
    ) -> PipelineResult<Video>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        tracing::info!(%video_id, %user_id, ?kind, "ingest started");

        let mut stage = IngestStage::Authenticated;
        let result = self.run(&mut stage, user_id, video_id, kind, upload).await;
        match &result {
            Ok(_) => tracing::info!(%video_id, ?kind, "ingest complete"),
            Err(err) if err.status().is_client_error() => {
                tracing::warn!(%video_id, ?kind, last_stage = ?stage, error = %err, "ingest rejected")
            }
            Err(err) => {
                tracing::error!(%video_id, ?kind, last_stage = ?stage, error = %err, "ingest failed")
            }
        }
        result
    }

    async fn run<S>(
        &self,
        stage: &mut IngestStage,
        user_id: Uuid,
        video_id: Uuid,
        kind: AssetKind,
        upload: Upload<S>,
    ) -> PipelineResult<Video>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let video = self
            .videos
            .get(video_id)
            .await?
            .ok_or_else(|| PipelineError::Forbidden("user is not the video owner".into()))?;
        if video.user_id != user_id {
            return Err(PipelineError::Forbidden("user is not the video owner".into()));
        }
        advance(stage, IngestStage::Authorized);

        let validated = validate_media_type(kind, upload.content_type.as_deref())?;
        advance(stage, IngestStage::Validated);

        let mut staged = self
            .stager
            .stage(
                upload.body,
                &validated.media_type,
                &validated.extension,
                self.limits.for_kind(kind),
            )
            .await?;
        advance(stage, IngestStage::Staged);

        if kind == AssetKind::Video {
            if let Some(transformer) = &self.transformer {
                let output = transformer.transform(staged.path()).await?;
                // Replacing drops the original staged file.
                staged = StagedFile::adopt(output, validated.media_type.as_str()).await?;
                advance(stage, IngestStage::Transformed);
            }
        }

        let category = match kind {
            AssetKind::Video => {
                let info = self.inspector.inspect(staged.path()).await?;
                let class = inspect::classify(info);
                tracing::debug!(
                    width = info.width,
                    height = info.height,
                    class = class.as_str(),
                    "classified video"
                );
                Some(class.as_str())
            }
            AssetKind::Thumbnail => None,
        };
        advance(stage, IngestStage::Classified);

        let key = StorageKey::generate(category, &validated.extension)?;
        let publisher = self.publisher(kind);
        let url = publisher
            .publish(&key, &validated.media_type, staged.reader().await?)
            .await?;
        tracing::debug!(
            backend = publisher.backend(),
            %key,
            content_type = staged.content_type(),
            bytes = staged.len(),
            "published"
        );
        advance(stage, IngestStage::Published);

        let video = self.videos.record_reference(video_id, kind, &url).await?;
        advance(stage, IngestStage::Recorded);
        Ok(video)
    }
}

fn advance(stage: &mut IngestStage, next: IngestStage) {
    tracing::debug!(from = ?*stage, to = ?next, "ingest stage");
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        inspect::StreamInfo,
        publisher::{Body, MemoryPublisher, MemoryStore},
        transform,
        video_store::test_store,
    };
    use async_trait::async_trait;
    use futures::{StreamExt, stream};
    use std::path::Path;
    use tempfile::{TempDir, TempPath};

    struct FixedInspector(Option<StreamInfo>);

    #[async_trait]
    impl MediaInspector for FixedInspector {
        async fn inspect(&self, path: &Path) -> PipelineResult<StreamInfo> {
            assert!(path.exists(), "inspected file must still be staged");
            self.0.ok_or(PipelineError::NoStreamData)
        }
    }

    /// Prepends a marker so tests can tell transformed bytes from the original.
    struct MarkingTransformer {
        fail: bool,
    }

    #[async_trait]
    impl MediaTransformer for MarkingTransformer {
        async fn transform(&self, input: &Path) -> PipelineResult<TempPath> {
            if self.fail {
                return Err(PipelineError::TransformFailed("exit status: 1".into()));
            }
            let output = TempPath::try_from_path(transform::output_path(input))?;
            let mut data = b"faststart:".to_vec();
            data.extend(tokio::fs::read(input).await?);
            tokio::fs::write(&output, data).await?;
            Ok(output)
        }
    }

    /// Leaves a partial output on scratch and never finishes.
    struct StalledTransformer;

    #[async_trait]
    impl MediaTransformer for StalledTransformer {
        async fn transform(&self, input: &Path) -> PipelineResult<TempPath> {
            let output = TempPath::try_from_path(transform::output_path(input))?;
            tokio::fs::write(&output, b"partial").await?;
            std::future::pending::<()>().await;
            Ok(output)
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        fn backend(&self) -> &'static str {
            "failing"
        }

        async fn publish(&self, _: &StorageKey, _: &str, _: Body<'_>) -> PipelineResult<String> {
            Err(PipelineError::PublishFailed("access denied".into()))
        }
    }

    struct Harness {
        scratch: TempDir,
        videos: VideoStore,
        assets: Arc<MemoryStore>,
    }

    impl Harness {
        async fn new() -> Self {
            Self {
                scratch: tempfile::tempdir().unwrap(),
                videos: test_store().await,
                assets: Arc::new(MemoryStore::default()),
            }
        }

        fn pipeline(&self, info: Option<StreamInfo>) -> IngestPipeline {
            let publisher = Arc::new(MemoryPublisher::new(self.assets.clone(), "http://localhost:8091"));
            IngestPipeline::new(
                self.videos.clone(),
                Stager::new(self.scratch.path()),
                Arc::new(FixedInspector(info)),
                publisher.clone(),
                publisher,
                UploadLimits {
                    video: 1024,
                    thumbnail: 64,
                },
            )
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }
    }

    fn upload(
        content_type: &str,
        data: &'static [u8],
    ) -> Upload<impl Stream<Item = io::Result<Bytes>> + Send> {
        Upload {
            content_type: Some(content_type.to_string()),
            body: stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(data))]),
        }
    }

    const HD: Option<StreamInfo> = Some(StreamInfo {
        width: 1920,
        height: 1080,
    });

    #[tokio::test]
    async fn video_is_transformed_classified_published_and_recorded() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "launch", None).await.unwrap();
        let pipeline = h
            .pipeline(HD)
            .with_transformer(Arc::new(MarkingTransformer { fail: false }));

        let updated = pipeline
            .ingest(owner, video.id, AssetKind::Video, upload("video/mp4", b"ftyp...moov"))
            .await
            .unwrap();

        let url = updated.video_url.clone().unwrap();
        let key = url
            .strip_prefix("http://localhost:8091/api/assets/")
            .unwrap();
        assert!(key.starts_with("landscape/"));
        assert!(key.ends_with(".mp4"));

        let asset = h.assets.get(key).await.unwrap();
        assert_eq!(asset.content_type, "video/mp4");
        assert_eq!(asset.data.as_ref(), b"faststart:ftyp...moov");

        let stored = h.videos.get(video.id).await.unwrap().unwrap();
        assert_eq!(stored.video_url, Some(url));
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn untransformed_video_is_byte_identical() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "short", None).await.unwrap();
        let pipeline = h.pipeline(Some(StreamInfo {
            width: 1080,
            height: 1920,
        }));

        let updated = pipeline
            .ingest(owner, video.id, AssetKind::Video, upload("video/mp4", b"raw bytes"))
            .await
            .unwrap();

        let url = updated.video_url.unwrap();
        let key = url.rsplit_once("/api/assets/").unwrap().1;
        assert!(key.starts_with("portrait/"));
        assert_eq!(h.assets.get(key).await.unwrap().data.as_ref(), b"raw bytes");
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn thumbnail_has_no_category_and_skips_transform() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "cover", None).await.unwrap();
        // A failing transformer and a stream-less inspector prove neither runs.
        let pipeline = h
            .pipeline(None)
            .with_transformer(Arc::new(MarkingTransformer { fail: true }));

        let updated = pipeline
            .ingest(owner, video.id, AssetKind::Thumbnail, upload("image/png", b"\x89PNG"))
            .await
            .unwrap();

        let url = updated.thumbnail_url.unwrap();
        let key = url.rsplit_once("/api/assets/").unwrap().1;
        assert!(!key.contains('/'));
        assert!(key.ends_with(".png"));
        assert!(updated.video_url.is_none());
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn other_users_are_forbidden() {
        let h = Harness::new().await;
        let video = h.videos.create(Uuid::new_v4(), "mine", None).await.unwrap();

        let err = h
            .pipeline(HD)
            .ingest(Uuid::new_v4(), video.id, AssetKind::Video, upload("video/mp4", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn missing_record_is_forbidden() {
        let h = Harness::new().await;
        let err = h
            .pipeline(HD)
            .ingest(Uuid::new_v4(), Uuid::new_v4(), AssetKind::Thumbnail, upload("image/png", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn unsupported_type_is_rejected_before_staging() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "gif", None).await.unwrap();

        // The body would error if it were ever read.
        let body = stream::iter(vec![Err::<Bytes, _>(io::Error::other("body read"))]);
        let err = h
            .pipeline(HD)
            .ingest(
                owner,
                video.id,
                AssetKind::Thumbnail,
                Upload {
                    content_type: Some("image/gif".into()),
                    body,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedMediaType(_)));
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "big", None).await.unwrap();

        let err = h
            .pipeline(HD)
            .ingest(owner, video.id, AssetKind::Thumbnail, upload("image/jpeg", &[0u8; 65]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PayloadTooLarge { limit: 64 }));
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn transform_failure_leaves_record_and_scratch_clean() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "broken", None).await.unwrap();
        let pipeline = h
            .pipeline(HD)
            .with_transformer(Arc::new(MarkingTransformer { fail: true }));

        let err = pipeline
            .ingest(owner, video.id, AssetKind::Video, upload("video/mp4", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TransformFailed(_)));
        assert!(h.videos.get(video.id).await.unwrap().unwrap().video_url.is_none());
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn inspection_failure_cleans_transformed_output() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "silent", None).await.unwrap();
        let pipeline = h
            .pipeline(None)
            .with_transformer(Arc::new(MarkingTransformer { fail: false }));

        let err = pipeline
            .ingest(owner, video.id, AssetKind::Video, upload("video/mp4", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoStreamData));
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn publish_failure_does_not_touch_record() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "denied", None).await.unwrap();
        let pipeline = IngestPipeline::new(
            h.videos.clone(),
            Stager::new(h.scratch.path()),
            Arc::new(FixedInspector(HD)),
            Arc::new(FailingPublisher),
            Arc::new(FailingPublisher),
            UploadLimits::default(),
        );

        let err = pipeline
            .ingest(owner, video.id, AssetKind::Video, upload("video/mp4", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PublishFailed(_)));
        let stored = h.videos.get(video.id).await.unwrap().unwrap();
        assert!(stored.video_url.is_none());
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_releases_scratch() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "cancel", None).await.unwrap();
        let pipeline = h.pipeline(HD);

        // First chunk arrives, then the client stalls forever.
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"partial"))])
            .chain(stream::pending());
        let run = pipeline.ingest(
            owner,
            video.id,
            AssetKind::Video,
            Upload {
                content_type: Some("video/mp4".into()),
                body,
            },
        );
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), run).await;
        assert!(timed_out.is_err());
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn cancelled_transform_releases_scratch() {
        let h = Harness::new().await;
        let owner = Uuid::new_v4();
        let video = h.videos.create(owner, "stall", None).await.unwrap();
        let pipeline = h.pipeline(HD).with_transformer(Arc::new(StalledTransformer));

        let run = pipeline.ingest(owner, video.id, AssetKind::Video, upload("video/mp4", b"x"));
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(100), run).await;
        assert!(timed_out.is_err());
        assert!(h.scratch_is_empty());
        assert!(h.videos.get(video.id).await.unwrap().unwrap().video_url.is_none());
    }
}
