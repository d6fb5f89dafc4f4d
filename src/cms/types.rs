use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

/// Published blog article
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
  pub id: String,
  pub published: DateTime<Utc>,
  /// Latest content; the body is empty until the article has been ingested
  pub latest_content: ArticleContent,
}

impl Article {
  pub fn year(&self) -> i32 {
    self.published.year()
  }

  pub fn language_id(&self) -> &str {
    &self.latest_content.language_id
  }
}

/// Language-specific article content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArticleContent {
  pub title: String,
  /// Body markup, rewritten for local serving once ingested
  pub content: String,
  pub language_id: String,
}
