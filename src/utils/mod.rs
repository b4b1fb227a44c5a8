//! Shared utility functions.
//!
//! - `url`: canonical URL normalization and origin keys
//! - `hash`: content hashing

mod hash;
mod url;

pub use hash::content_hash;
pub use url::{canonicalize, origin_key, UrlError};
