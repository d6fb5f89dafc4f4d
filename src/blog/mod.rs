//! Blog content cache.
//!
//! This module keeps an in-memory index of published articles that:
//! - Is rebuilt from an [`ArticleSource`] once the refresh deadline has passed
//! - Rewrites remote article links and attachment URLs to local paths
//! - Mirrors referenced attachments into a local directory
//! - Keeps serving the previous index while a refresh runs or after it fails

mod attachments;
mod cache;
mod index;
mod rewrite;
mod source;

pub use cache::{BlogCache, RefreshOutcome};
pub use index::YearIndex;
pub use source::{ArticleSource, AttachmentFetcher};

/// Extract the article id from a URL slug such as `my-first-post-ab12cd`.
///
/// The id is the last dash-separated segment.
pub fn article_id_from_slug(slug: &str) -> Option<&str> {
  slug.rsplit('-').next().filter(|id| !id.is_empty())
}
