//! Serde-deserializable types matching the CMS API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{Article, ArticleContent};

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTokenResponse {
  pub access_token: String,
  #[serde(default)]
  pub token_type: String,
  /// Lifetime in seconds
  #[serde(default)]
  pub expires_in: u64,
}

// ============================================================================
// Articles
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiArticleContent {
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub language_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiArticle {
  pub id: String,
  pub published: DateTime<Utc>,
  pub latest_article_content: Option<ApiArticleContent>,
}

/// Search endpoint response
#[derive(Debug, Deserialize)]
pub struct ApiArticlesResponse {
  #[serde(default)]
  pub articles: Vec<ApiArticle>,
  #[serde(default)]
  pub count: u64,
}

/// Single article endpoint response; only the requested content is used
#[derive(Debug, Deserialize)]
pub struct ApiArticleResponse {
  pub content: Option<ApiArticleContent>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiArticleContent> for ArticleContent {
  fn from(c: ApiArticleContent) -> Self {
    ArticleContent {
      title: c.title,
      content: c.content,
      language_id: c.language_id,
    }
  }
}

impl From<ApiArticle> for Article {
  fn from(a: ApiArticle) -> Self {
    Article {
      id: a.id,
      published: a.published,
      latest_content: a.latest_article_content.map(Into::into).unwrap_or_default(),
    }
  }
}
