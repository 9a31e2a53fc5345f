//! Content services used on the request path
//!
//! Both are pure functions of the upload bytes and safe to call from any
//! number of concurrent requests.

pub mod content_analyzer;
pub mod content_hasher;

pub use content_analyzer::{analyze, ImageAnalysis};
pub use content_hasher::hash_bytes;
