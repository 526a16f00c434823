//! Core data models for the video ingest service.
//!
//! `Video` is the metadata record that uploads attach references to; `AssetKind`
//! describes the two kinds of file the pipeline accepts.

pub mod asset;
pub mod video;
