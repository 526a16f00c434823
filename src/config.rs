use crate::services::publisher::DEFAULT_PART_SIZE;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, str::FromStr, time::Duration};
use uuid::Uuid;

/// Where an asset kind is published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// S3 bucket, referenced by bucket or CDN URL
    S3,
    /// Files under the assets root, served at /assets
    Local,
    /// Process memory, served at /api/assets
    Memory,
    /// Embedded `data:` URL
    Inline,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        <Backend as ValueEnum>::from_str(s, true).map_err(|err| anyhow::anyhow!(err))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    /// Directory for staged uploads and transform outputs.
    pub scratch_dir: PathBuf,
    pub assets_root: PathBuf,
    /// Prefix of URLs produced by the local and memory backends.
    pub public_base_url: String,
    pub video_backend: Backend,
    pub thumbnail_backend: Backend,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_domain: Option<String>,
    pub cdn_domain: Option<String>,
    /// Upload chunk size for the s3 backend; smaller bodies use a single put.
    pub s3_part_size: usize,
    pub max_video_bytes: u64,
    pub max_thumbnail_bytes: u64,
    pub fast_start: bool,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// `None` means subprocesses may run indefinitely.
    pub tool_timeout: Option<Duration>,
}

/// What `main` should do after configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Migrate,
    IssueToken(Uuid),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Video and thumbnail ingest API")]
pub struct Args {
    /// Host to bind to (overrides INGEST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides INGEST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides INGEST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Scratch directory for staged uploads (overrides INGEST_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Root directory for locally published assets (overrides INGEST_ASSETS_ROOT)
    #[arg(long)]
    pub assets_root: Option<PathBuf>,

    /// Public URL prefix for local and memory assets (overrides INGEST_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Backend for video uploads (overrides INGEST_VIDEO_BACKEND)
    #[arg(long, value_enum)]
    pub video_backend: Option<Backend>,

    /// Backend for thumbnail uploads (overrides INGEST_THUMBNAIL_BACKEND)
    #[arg(long, value_enum)]
    pub thumbnail_backend: Option<Backend>,

    /// S3 bucket (overrides INGEST_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// CDN domain used for S3 references (overrides INGEST_CDN_DOMAIN)
    #[arg(long)]
    pub cdn_domain: Option<String>,

    /// Skip the fast-start rewrite of uploaded videos
    #[arg(long)]
    pub no_fast_start: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Print an access token for this user id and exit
    #[arg(long, value_name = "USER_ID")]
    pub issue_token: Option<Uuid>,
}

/// Read `name`, parsing it when present and falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        let args = Args::parse();
        Self::from_args(args)
    }

    fn from_args(args: Args) -> Result<(Self, Mode)> {
        // --- Environment fallback ---
        let env_host = env::var("INGEST_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("INGEST_PORT", 8091u16)?;
        let env_db = env::var("INGEST_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/ingest.db?mode=rwc".into());
        let env_scratch = env_opt("INGEST_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        let env_assets = env_opt("INGEST_ASSETS_ROOT").unwrap_or_else(|| "./assets".into());
        let env_video_backend = env_or("INGEST_VIDEO_BACKEND", Backend::Local)?;
        let env_thumb_backend = env_or("INGEST_THUMBNAIL_BACKEND", Backend::Local)?;
        let timeout_secs = env_or("INGEST_TOOL_TIMEOUT_SECS", 300u64)?;

        let port = args.port.unwrap_or(env_port);
        let public_base_url = args
            .public_base_url
            .or_else(|| env_opt("INGEST_PUBLIC_BASE_URL"))
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let jwt_secret = env::var("INGEST_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() {
            bail!("INGEST_JWT_SECRET must be set");
        }

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            database_url: args.database_url.unwrap_or(env_db),
            jwt_secret,
            scratch_dir: args.scratch_dir.unwrap_or(env_scratch),
            assets_root: args.assets_root.unwrap_or_else(|| env_assets.into()),
            public_base_url,
            video_backend: args.video_backend.unwrap_or(env_video_backend),
            thumbnail_backend: args.thumbnail_backend.unwrap_or(env_thumb_backend),
            s3_bucket: args.s3_bucket.or_else(|| env_opt("INGEST_S3_BUCKET")),
            s3_region: env::var("INGEST_S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
            s3_endpoint: env_opt("INGEST_S3_ENDPOINT"),
            s3_domain: env_opt("INGEST_S3_DOMAIN"),
            cdn_domain: args.cdn_domain.or_else(|| env_opt("INGEST_CDN_DOMAIN")),
            s3_part_size: env_or("INGEST_S3_PART_SIZE", DEFAULT_PART_SIZE)?,
            max_video_bytes: env_or("INGEST_MAX_VIDEO_BYTES", 1u64 << 30)?,
            max_thumbnail_bytes: env_or("INGEST_MAX_THUMBNAIL_BYTES", 10u64 << 20)?,
            fast_start: !args.no_fast_start && env_or("INGEST_FAST_START", true)?,
            ffmpeg_bin: env_opt("INGEST_FFMPEG").unwrap_or_else(|| "ffmpeg".into()).into(),
            ffprobe_bin: env_opt("INGEST_FFPROBE").unwrap_or_else(|| "ffprobe".into()).into(),
            tool_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        };

        let uses_s3 = cfg.video_backend == Backend::S3 || cfg.thumbnail_backend == Backend::S3;
        if uses_s3 && cfg.s3_bucket.is_none() {
            bail!("an s3 backend is selected but INGEST_S3_BUCKET is not set");
        }

        let mode = match (args.migrate, args.issue_token) {
            (true, _) => Mode::Migrate,
            (false, Some(user)) => Mode::IssueToken(user),
            (false, None) => Mode::Serve,
        };
        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Object-store host used in bucket-style URLs.
    pub fn s3_public_domain(&self) -> String {
        self.s3_domain
            .clone()
            .unwrap_or_else(|| format!("s3.{}.amazonaws.com", self.s3_region))
    }
}
