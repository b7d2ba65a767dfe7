pub mod download;
pub mod generation;
