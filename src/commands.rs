//! CLI subcommands and their text output

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::fmt::Write;

use crate::blog::{
  article_id_from_slug, ArticleSource, AttachmentFetcher, BlogCache, RefreshOutcome, YearIndex,
};
use crate::cms::types::Article;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Refresh the cache and report what was loaded
  Refresh,
  /// List all articles grouped by year
  List,
  /// Show one article by its slug or id
  Show {
    /// Slug as used in /blog/{slug}; the id is its last dash-separated part
    slug: String,
  },
  /// Show the most recently published articles
  Latest {
    /// Number of articles (default: blog.latest_count)
    #[arg(short = 'n', long)]
    count: Option<usize>,
  },
}

impl Command {
  /// Run the command against an already started cache.
  pub async fn run<S, F>(&self, cache: &BlogCache<S, F>, latest_count: usize) -> Result<String>
  where
    S: ArticleSource,
    F: AttachmentFetcher,
  {
    match self {
      Command::Refresh => Ok(format_outcome(&cache.refresh().await)),
      Command::List => Ok(format_year_index(&cache.get_articles().await)),
      Command::Show { slug } => {
        let id = article_id_from_slug(slug).ok_or_else(|| eyre!("Invalid slug: {:?}", slug))?;
        let article = cache
          .get_article(id)
          .await
          .ok_or_else(|| eyre!("Article not found: {}", id))?;
        Ok(format_article(&article))
      }
      Command::Latest { count } => {
        let articles = cache
          .get_latest_articles(count.unwrap_or(latest_count))
          .await;
        Ok(articles.iter().map(format_summary).collect())
      }
    }
  }
}

pub fn format_outcome(outcome: &RefreshOutcome) -> String {
  match outcome {
    RefreshOutcome::Updated {
      articles,
      attachments,
      fingerprint,
    } => format!(
      "{} articles loaded ({} attachments downloaded, {} already cached, {} failed)\nindex {}\n",
      articles, attachments.downloaded, attachments.cached, attachments.failed, fingerprint
    ),
    RefreshOutcome::Failed => "Refresh failed, serving the previous index\n".to_string(),
  }
}

/// Years newest first, each followed by its articles.
pub fn format_year_index(index: &YearIndex) -> String {
  let mut out = String::new();
  for (year, articles) in index.iter().rev() {
    let _ = writeln!(out, "{}", year);
    for article in articles {
      out.push_str("  ");
      out.push_str(&format_summary(article));
    }
  }
  out
}

fn format_summary(article: &Article) -> String {
  format!(
    "{}  {}  {}\n",
    article.published.format("%Y-%m-%d"),
    article.id,
    article.latest_content.title
  )
}

pub fn format_article(article: &Article) -> String {
  format!(
    "{}\n{}\n\n{}\n",
    article.latest_content.title,
    article.published.format("%Y-%m-%d %H:%M"),
    article.latest_content.content
  )
}
