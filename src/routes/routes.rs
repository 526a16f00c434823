//! Defines routes for the ingest API.
//!
//! ## Structure
//! - **Records**
//!   - `POST /api/videos` - create a video record owned by the caller
//!   - `GET  /api/videos/{video_id}` - fetch one of the caller's records
//!
//! - **Uploads** (multipart, bearer-authenticated)
//!   - `POST /api/video_upload/{video_id}` - field `video`, `video/mp4`
//!   - `POST /api/thumbnail_upload/{video_id}` - field `thumbnail`, `image/jpeg` or `image/png`
//!
//! - **Published assets**
//!   - `GET /assets/*` - local backend, served from the assets root
//!   - `GET /api/assets/{*key}` - memory backend
//!
//! The wildcard `*key` allows category-prefixed keys like `landscape/ab12.mp4`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{upload_thumbnail, upload_video},
        video_handlers::{create_video, get_memory_asset, get_video},
    },
    models::asset::UploadLimits,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::path::Path;
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Headroom over the file ceiling for multipart boundaries and part headers.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

fn body_limit(file_limit: u64) -> DefaultBodyLimit {
    let total = file_limit.saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(usize::try_from(total).unwrap_or(usize::MAX))
}

/// Build the router for all ingest routes.
///
/// Upload routes get a body limit just above their file ceiling; the stager
/// enforces the exact ceiling on the file part itself.
pub fn routes(limits: UploadLimits, assets_root: &Path) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // records
        .route("/api/videos", post(create_video))
        .route("/api/videos/{video_id}", get(get_video))
        // uploads
        .route(
            "/api/video_upload/{video_id}",
            post(upload_video).layer(body_limit(limits.video)),
        )
        .route(
            "/api/thumbnail_upload/{video_id}",
            post(upload_thumbnail).layer(body_limit(limits.thumbnail)),
        )
        // published assets
        .route("/api/assets/{*key}", get(get_memory_asset))
        .nest_service("/assets", ServeDir::new(assets_root))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::Authenticator,
        errors::PipelineResult,
        services::{
            inspect::{MediaInspector, StreamInfo},
            pipeline::IngestPipeline,
            publisher::{LocalPublisher, MemoryPublisher, MemoryStore},
            staging::Stager,
            video_store::test_store,
        },
    };
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, Response, StatusCode, header},
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BOUNDARY: &str = "ingest-test-boundary";
    const BASE: &str = "http://localhost:8091";

    struct Portrait;

    #[async_trait]
    impl MediaInspector for Portrait {
        async fn inspect(&self, _: &Path) -> PipelineResult<StreamInfo> {
            Ok(StreamInfo {
                width: 720,
                height: 1280,
            })
        }
    }

    struct TestApp {
        router: Router,
        state: AppState,
        scratch: TempDir,
        _assets: TempDir,
    }

    impl TestApp {
        async fn new() -> Self {
            let scratch = tempfile::tempdir().unwrap();
            let assets = tempfile::tempdir().unwrap();
            let videos = test_store().await;
            let memory_assets = Arc::new(MemoryStore::default());
            let limits = UploadLimits {
                video: 1024,
                thumbnail: 64,
            };
            let pipeline = IngestPipeline::new(
                videos.clone(),
                Stager::new(scratch.path()),
                Arc::new(Portrait),
                Arc::new(LocalPublisher::new(assets.path(), BASE)),
                Arc::new(MemoryPublisher::new(memory_assets.clone(), BASE)),
                limits,
            );
            let state = AppState {
                videos,
                auth: Arc::new(Authenticator::new("test-secret")),
                pipeline: Arc::new(pipeline),
                memory_assets,
                scratch_dir: scratch.path().to_path_buf(),
            };
            let router = routes(limits, assets.path()).with_state(state.clone());
            Self {
                router,
                state,
                scratch,
                _assets: assets,
            }
        }

        fn token(&self, user: Uuid) -> String {
            let token = self
                .state
                .auth
                .issue(user, chrono::Duration::minutes(5))
                .unwrap();
            format!("Bearer {token}")
        }

        async fn send(&self, request: Request<Body>) -> Response<Body> {
            self.router.clone().oneshot(request).await.unwrap()
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }
    }

    fn multipart(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(uri: &str, auth: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn json(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoints_respond() {
        let app = TestApp::new().await;
        let live = app
            .send(Request::get("/healthz").body(Body::empty()).unwrap())
            .await;
        assert_eq!(live.status(), StatusCode::OK);

        let ready = app
            .send(Request::get("/readyz").body(Body::empty()).unwrap())
            .await;
        assert_eq!(ready.status(), StatusCode::OK);
        assert_eq!(json(ready).await["checks"]["scratch"]["ok"], true);
    }

    #[tokio::test]
    async fn create_and_fetch_own_video() {
        let app = TestApp::new().await;
        let owner = Uuid::new_v4();

        let created = app
            .send(
                Request::post("/api/videos")
                    .header(header::AUTHORIZATION, app.token(owner))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title":"demo","description":"d"}"#))
                    .unwrap(),
            )
            .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let video = json(created).await;
        assert_eq!(video["user_id"], owner.to_string());
        let id = video["id"].as_str().unwrap().to_string();

        let own = app
            .send(
                Request::get(format!("/api/videos/{id}"))
                    .header(header::AUTHORIZATION, app.token(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(own.status(), StatusCode::OK);

        let foreign = app
            .send(
                Request::get(format!("/api/videos/{id}"))
                    .header(header::AUTHORIZATION, app.token(Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(foreign.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn thumbnail_upload_publishes_to_memory() {
        let app = TestApp::new().await;
        let owner = Uuid::new_v4();
        let video = app.state.videos.create(owner, "t", None).await.unwrap();

        let response = app
            .send(upload_request(
                &format!("/api/thumbnail_upload/{}", video.id),
                Some(&app.token(owner)),
                multipart("thumbnail", "image/png", b"\x89PNG\r\n"),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        let url = body["thumbnail_url"].as_str().unwrap().to_string();
        let path = url.strip_prefix(BASE).unwrap();
        assert!(path.starts_with("/api/assets/") && path.ends_with(".png"));
        assert!(app.scratch_is_empty());

        let asset = app
            .send(Request::get(path).body(Body::empty()).unwrap())
            .await;
        assert_eq!(asset.status(), StatusCode::OK);
        assert_eq!(asset.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = to_bytes(asset.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"\x89PNG\r\n");
    }

    #[tokio::test]
    async fn video_upload_publishes_locally_under_category() {
        let app = TestApp::new().await;
        let owner = Uuid::new_v4();
        let video = app.state.videos.create(owner, "v", None).await.unwrap();

        let response = app
            .send(upload_request(
                &format!("/api/video_upload/{}", video.id),
                Some(&app.token(owner)),
                multipart("video", "video/mp4", b"ftypisom"),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let url = json(response).await["video_url"]
            .as_str()
            .unwrap()
            .to_string();
        let path = url.strip_prefix(BASE).unwrap();
        assert!(path.starts_with("/assets/portrait/") && path.ends_with(".mp4"));
        assert!(app.scratch_is_empty());

        let served = app
            .send(Request::get(path).body(Body::empty()).unwrap())
            .await;
        assert_eq!(served.status(), StatusCode::OK);
        let bytes = to_bytes(served.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"ftypisom");
    }

    #[tokio::test]
    async fn unrelated_fields_before_the_file_are_skipped() {
        let app = TestApp::new().await;
        let owner = Uuid::new_v4();
        let video = app.state.videos.create(owner, "t", None).await.unwrap();

        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n"
        )
        .into_bytes();
        body.extend(multipart("thumbnail", "image/jpeg", b"\xff\xd8\xff"));

        let response = app
            .send(upload_request(
                &format!("/api/thumbnail_upload/{}", video.id),
                Some(&app.token(owner)),
                body,
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejections_map_to_status_codes() {
        let app = TestApp::new().await;
        let owner = Uuid::new_v4();
        let video = app.state.videos.create(owner, "t", None).await.unwrap();
        let uri = format!("/api/thumbnail_upload/{}", video.id);
        let png = || multipart("thumbnail", "image/png", b"png");

        let cases = [
            (
                upload_request("/api/thumbnail_upload/not-a-uuid", Some(&app.token(owner)), png()),
                StatusCode::BAD_REQUEST,
            ),
            (upload_request(&uri, None, png()), StatusCode::UNAUTHORIZED),
            (
                upload_request(&uri, Some("Bearer garbage"), png()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                upload_request(&uri, Some(&app.token(Uuid::new_v4())), png()),
                StatusCode::FORBIDDEN,
            ),
            (
                upload_request(
                    &uri,
                    Some(&app.token(owner)),
                    multipart("thumbnail", "image/gif", b"GIF89a"),
                ),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                upload_request(
                    &uri,
                    Some(&app.token(owner)),
                    multipart("picture", "image/png", b"png"),
                ),
                StatusCode::BAD_REQUEST,
            ),
            (
                upload_request(
                    &uri,
                    Some(&app.token(owner)),
                    multipart("thumbnail", "image/png", &[7u8; 65]),
                ),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
        ];

        for (request, expected) in cases {
            let response = app.send(request).await;
            assert_eq!(response.status(), expected);
            let body = json(response).await;
            assert_eq!(body["status"], expected.as_u16());
            assert!(body["error"].is_string());
        }

        assert!(app.scratch_is_empty());
        let stored = app.state.videos.get(video.id).await.unwrap().unwrap();
        assert!(stored.thumbnail_url.is_none());
    }
}
