pub mod canonical_url;
pub mod surf_logging;

pub use canonical_url::{canonicalize, CanonicalUrl};
pub use url::ParseError;
