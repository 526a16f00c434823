//! The ingest pipeline and the collaborators it sequences.

pub mod inspect;
pub mod keys;
pub mod pipeline;
pub mod publisher;
pub mod staging;
pub mod transform;
pub mod validator;
pub mod video_store;
