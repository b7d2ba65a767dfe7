//! Domain types shared by the Manāra generation backend: job lifecycle,
//! progress events, artifact descriptors, input validation and the
//! [`CoreError`](error::CoreError) taxonomy.

pub mod asset;
pub mod error;
pub mod generation;
pub mod job;
pub mod progress;
pub mod types;
