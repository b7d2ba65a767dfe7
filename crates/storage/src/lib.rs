//! Result materialization: download provider artifacts, persist them under
//! the upload root, and optionally mirror them to Cloudinary.

pub mod cloudinary;
pub mod config;
pub mod materializer;
