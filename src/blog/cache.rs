//! Demand-driven, stale-while-valid cache of blog articles.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::attachments::{AttachmentMirror, MirrorStats};
use super::index::{ArticleIndex, YearIndex};
use super::rewrite::ContentRewriter;
use super::source::{ArticleSource, AttachmentFetcher};
use crate::cms::types::{Article, ArticleContent};
use crate::config::BlogConfig;

/// Result of one refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
  /// The live index was replaced
  Updated {
    articles: usize,
    attachments: MirrorStats,
    fingerprint: String,
  },
  /// Listing failed, the previous index is still served
  Failed,
}

/// In-memory blog index refreshed from an [`ArticleSource`].
///
/// Every read first checks the refresh deadline. Once it has passed, the
/// reading task rebuilds the whole index from the source while concurrent
/// readers keep getting the previous snapshot. A failed refresh keeps the
/// previous index; the deadline moves forward either way.
pub struct BlogCache<S, F> {
  source: S,
  fetcher: F,
  rewriter: ContentRewriter,
  mirror: AttachmentMirror,
  tag: String,
  refresh_interval: chrono::Duration,
  content_concurrency: usize,
  index: RwLock<Arc<ArticleIndex>>,
  next_refresh: Mutex<DateTime<Utc>>,
  /// Held for the duration of a refresh
  refreshing: tokio::sync::Mutex<()>,
}

impl<S: ArticleSource, F: AttachmentFetcher> BlogCache<S, F> {
  /// Create an empty cache whose first read triggers a refresh.
  pub fn new(source: S, fetcher: F, config: &BlogConfig) -> Result<Self> {
    let refresh_interval = chrono::Duration::from_std(config.refresh_interval())
      .map_err(|e| eyre!("Refresh interval out of range: {}", e))?;

    Ok(Self {
      source,
      fetcher,
      rewriter: ContentRewriter::new(&config.rewrite)?,
      mirror: AttachmentMirror::new(&config.cache_dir),
      tag: config.tag.clone(),
      refresh_interval,
      content_concurrency: config.content_concurrency.max(1),
      index: RwLock::new(Arc::new(ArticleIndex::default())),
      next_refresh: Mutex::new(Utc::now()),
      refreshing: tokio::sync::Mutex::new(()),
    })
  }

  /// Create the cache and load the articles right away.
  pub async fn start(source: S, fetcher: F, config: &BlogConfig) -> Result<Self> {
    info!("Initializing blog");
    let cache = Self::new(source, fetcher, config)?;

    if let Err(e) = cache.mirror.ensure_root().await {
      error!(error = %e, "Error creating blog file cache directory");
    }

    cache.refresh().await;
    Ok(cache)
  }

  /// Article with the given id, if known.
  pub async fn get_article(&self, id: &str) -> Option<Article> {
    self.refresh_if_required().await;
    self.snapshot().get(id).cloned()
  }

  /// All articles bucketed by publication year.
  pub async fn get_articles(&self) -> YearIndex {
    self.refresh_if_required().await;
    self.snapshot().by_year().clone()
  }

  /// Up to `n` articles, most recently published first.
  pub async fn get_latest_articles(&self, n: usize) -> Vec<Article> {
    self.refresh_if_required().await;
    self.snapshot().latest(n)
  }

  pub fn next_refresh(&self) -> DateTime<Utc> {
    *self
      .next_refresh
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn is_refresh_due(&self) -> bool {
    Utc::now() >= self.next_refresh()
  }

  fn snapshot(&self) -> Arc<ArticleIndex> {
    let guard = self
      .index
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(&guard)
  }

  fn replace_index(&self, index: ArticleIndex) {
    let mut guard = self
      .index
      .write()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Arc::new(index);
  }

  fn schedule_next_refresh(&self) {
    let mut guard = self
      .next_refresh
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Utc::now()
      .checked_add_signed(self.refresh_interval)
      .unwrap_or(DateTime::<Utc>::MAX_UTC);
  }

  /// Refresh if the deadline has passed and no other refresh is running.
  async fn refresh_if_required(&self) {
    if !self.is_refresh_due() {
      return;
    }

    let Ok(_guard) = self.refreshing.try_lock() else {
      debug!("Refresh already in progress, serving current index");
      return;
    };

    // A refresh may have completed between the check and the lock
    if !self.is_refresh_due() {
      return;
    }

    self.run_refresh().await;
  }

  /// Refresh now, waiting for a running refresh to finish first.
  pub async fn refresh(&self) -> RefreshOutcome {
    let _guard = self.refreshing.lock().await;
    self.run_refresh().await
  }

  async fn run_refresh(&self) -> RefreshOutcome {
    info!("Refreshing blog articles...");

    let outcome = match self.list_all().await {
      Ok(listed) => {
        let (index, attachments) = self.ingest(listed).await;
        if index.is_empty() {
          warn!(tag = %self.tag, "No blog articles found");
        }
        let outcome = RefreshOutcome::Updated {
          articles: index.len(),
          attachments,
          fingerprint: index.fingerprint(),
        };
        self.replace_index(index);
        outcome
      }
      Err(e) => {
        error!(error = %e, "Error loading blog articles");
        RefreshOutcome::Failed
      }
    };

    self.schedule_next_refresh();

    if let RefreshOutcome::Updated {
      articles,
      attachments,
      ..
    } = &outcome
    {
      info!(
        count = articles,
        downloaded = attachments.downloaded,
        failed_attachments = attachments.failed,
        "Blog articles refreshed"
      );
    }

    outcome
  }

  /// Walk all listing pages until one comes back empty.
  async fn list_all(&self) -> Result<HashMap<String, Article>> {
    let mut articles = HashMap::new();
    let mut offset = 0;

    loop {
      let page = self.source.list_articles(&self.tag, offset).await?;
      if page.is_empty() {
        break;
      }

      offset += page.len();
      for article in page {
        articles.insert(article.id.clone(), article);
      }
    }

    Ok(articles)
  }

  async fn ingest(&self, listed: HashMap<String, Article>) -> (ArticleIndex, MirrorStats) {
    let previous = self.snapshot();

    let results: Vec<(Option<Article>, MirrorStats)> = stream::iter(listed.into_values())
      .map(|article| self.ingest_article(article, &previous))
      .buffer_unordered(self.content_concurrency)
      .collect()
      .await;

    let mut stats = MirrorStats::default();
    let mut articles = Vec::with_capacity(results.len());
    for (article, article_stats) in results {
      stats += article_stats;
      articles.extend(article);
    }

    (ArticleIndex::new(articles), stats)
  }

  /// Load, mirror and rewrite one article.
  ///
  /// Falls back to the previously ingested version when the content cannot be
  /// fetched; an article never ingested before is left out.
  async fn ingest_article(
    &self,
    article: Article,
    previous: &ArticleIndex,
  ) -> (Option<Article>, MirrorStats) {
    let content = match self
      .source
      .get_content(&article.id, article.language_id())
      .await
    {
      Ok(content) => content,
      Err(e) => {
        error!(id = %article.id, error = %e, "Error loading article");
        return (previous.get(&article.id).cloned(), MirrorStats::default());
      }
    };

    let attachments = self.rewriter.find_attachments(&content.content);
    let stats = self
      .mirror
      .mirror(&self.fetcher, &article.id, &attachments)
      .await;
    let body = self.rewriter.rewrite(&article.id, &content.content);
    debug!(id = %article.id, attachments = attachments.len(), "Article loaded");

    let article = Article {
      latest_content: ArticleContent {
        content: body,
        ..content
      },
      ..article
    };
    (Some(article), stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::RewriteConfig;
  use chrono::TimeZone;
  use std::collections::HashSet;
  use std::path::Path;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::time::Duration;

  const PAGE_SIZE: usize = 2;

  #[derive(Default)]
  struct FakeSource {
    articles: Mutex<Vec<Article>>,
    bodies: Mutex<HashMap<String, String>>,
    failing_content: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    list_delay: Option<Duration>,
    /// Listing requests at offset 0, one per refresh attempt
    refreshes: AtomicUsize,
    list_calls: AtomicUsize,
    content_calls: AtomicUsize,
  }

  impl FakeSource {
    fn add(&self, id: &str, year: i32, body: &str) {
      self.articles.lock().unwrap().push(Article {
        id: id.to_string(),
        published: Utc.with_ymd_and_hms(year, 6, 1, 8, 0, 0).unwrap(),
        latest_content: ArticleContent {
          title: format!("Title {}", id),
          content: String::new(),
          language_id: "en".to_string(),
        },
      });
      self
        .bodies
        .lock()
        .unwrap()
        .insert(id.to_string(), body.to_string());
    }

    fn total_calls(&self) -> usize {
      self.list_calls.load(Ordering::SeqCst) + self.content_calls.load(Ordering::SeqCst)
    }
  }

  impl ArticleSource for FakeSource {
    async fn list_articles(&self, tag: &str, offset: usize) -> Result<Vec<Article>> {
      assert_eq!(tag, "blog");
      self.list_calls.fetch_add(1, Ordering::SeqCst);
      if offset == 0 {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
      }
      if let Some(delay) = self.list_delay {
        tokio::time::sleep(delay).await;
      }
      if self.fail_listing.load(Ordering::SeqCst) {
        return Err(eyre!("listing unavailable"));
      }

      let articles = self.articles.lock().unwrap();
      Ok(
        articles
          .iter()
          .skip(offset)
          .take(PAGE_SIZE)
          .cloned()
          .collect(),
      )
    }

    async fn get_content(&self, id: &str, language_id: &str) -> Result<ArticleContent> {
      assert_eq!(language_id, "en");
      self.content_calls.fetch_add(1, Ordering::SeqCst);
      if self.failing_content.lock().unwrap().contains(id) {
        return Err(eyre!("content of {} unavailable", id));
      }

      let body = self
        .bodies
        .lock()
        .unwrap()
        .get(id)
        .cloned()
        .ok_or_else(|| eyre!("unknown article {}", id))?;
      Ok(ArticleContent {
        title: format!("Title {}", id),
        content: body,
        language_id: "en".to_string(),
      })
    }
  }

  #[derive(Default)]
  struct CountingFetcher {
    calls: AtomicUsize,
  }

  impl AttachmentFetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(url.as_bytes().to_vec())
    }
  }

  fn config(cache_dir: &Path, refresh_interval_secs: u64) -> BlogConfig {
    BlogConfig {
      cache_dir: cache_dir.to_path_buf(),
      refresh_interval_secs,
      tag: "blog".to_string(),
      latest_count: 3,
      content_concurrency: 2,
      rewrite: RewriteConfig::default(),
    }
  }

  fn sample_source() -> FakeSource {
    let source = FakeSource::default();
    source.add(
      "a1",
      2019,
      r#"<p>See <a href="/read/a2">part two</a></p><img src="https://cms.example.com/api/v1/content/pic.png">"#,
    );
    source.add("a2", 2020, r#"<p>Back to <a href="/read/a1">part one</a></p>"#);
    source.add(
      "a3",
      2020,
      r#"<a href="https://cms.example.com/api/v1/content/doc.pdf">pdf</a>"#,
    );
    source
  }

  #[tokio::test]
  async fn test_start_ingests_and_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlogCache::start(
      sample_source(),
      CountingFetcher::default(),
      &config(dir.path(), 3600),
    )
    .await
    .unwrap();

    let a1 = cache.get_article("a1").await.unwrap();
    assert_eq!(a1.latest_content.title, "Title a1");
    assert!(a1.latest_content.content.contains(r#"href="/blog/a2""#));
    assert!(a1
      .latest_content
      .content
      .contains(r#"src="/static/blog/a1/pic.png""#));
    assert!(!a1.latest_content.content.contains("/read/"));
    assert!(!a1.latest_content.content.contains("cms.example.com"));

    assert!(dir.path().join("a1/pic.png").exists());
    assert!(dir.path().join("a3/doc.pdf").exists());
    assert!(cache.get_article("missing").await.is_none());

    let years = cache.get_articles().await;
    assert_eq!(years.keys().copied().collect::<Vec<_>>(), vec![2019, 2020]);
    assert_eq!(years[&2020].len(), 2);
  }

  #[tokio::test]
  async fn test_latest_articles_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let source = sample_source();
    source.add("a4", 2021, "<p>new</p>");
    let cache = BlogCache::start(source, CountingFetcher::default(), &config(dir.path(), 3600))
      .await
      .unwrap();

    let latest = cache.get_latest_articles(2).await;
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].id, "a4");
    assert_eq!(latest[1].year(), 2020);
  }

  #[tokio::test]
  async fn test_refresh_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlogCache::new(
      sample_source(),
      CountingFetcher::default(),
      &config(dir.path(), 3600),
    )
    .unwrap();

    let first = cache.refresh().await;
    let first_index = cache.snapshot();
    let second = cache.refresh().await;

    assert_eq!(*first_index, *cache.snapshot());
    match (first, second) {
      (
        RefreshOutcome::Updated {
          fingerprint: fp1,
          attachments: first_stats,
          ..
        },
        RefreshOutcome::Updated {
          fingerprint: fp2,
          attachments: second_stats,
          ..
        },
      ) => {
        assert_eq!(fp1, fp2);
        assert_eq!(first_stats.downloaded, 2);
        assert_eq!(second_stats.downloaded, 0);
        assert_eq!(second_stats.cached, 2);
      }
      other => panic!("unexpected outcomes: {:?}", other),
    }
    assert_eq!(cache.fetcher.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_content_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let source = sample_source();
    source.failing_content.lock().unwrap().insert("a2".to_string());

    let cache = BlogCache::start(source, CountingFetcher::default(), &config(dir.path(), 3600))
      .await
      .unwrap();

    assert!(cache.get_article("a2").await.is_none());
    assert!(cache.get_article("a1").await.is_some());
    assert!(cache.get_article("a3").await.is_some());
    assert_eq!(cache.snapshot().len(), 2);
  }

  #[tokio::test]
  async fn test_content_failure_keeps_previous_version() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlogCache::start(
      sample_source(),
      CountingFetcher::default(),
      &config(dir.path(), 3600),
    )
    .await
    .unwrap();
    let before = cache.get_article("a2").await.unwrap();

    cache
      .source
      .failing_content
      .lock()
      .unwrap()
      .insert("a2".to_string());
    cache.refresh().await;

    assert_eq!(cache.get_article("a2").await, Some(before));
    assert_eq!(cache.snapshot().len(), 3);
  }

  #[tokio::test]
  async fn test_failed_listing_serves_previous_index() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlogCache::start(
      sample_source(),
      CountingFetcher::default(),
      &config(dir.path(), 3600),
    )
    .await
    .unwrap();
    let before = cache.get_articles().await;
    let deadline = cache.next_refresh();
    let before_failure = Utc::now();

    cache.source.fail_listing.store(true, Ordering::SeqCst);
    assert_eq!(cache.refresh().await, RefreshOutcome::Failed);

    assert_eq!(cache.get_articles().await, before);
    // The deadline moves forward even after a failure
    assert!(cache.next_refresh() > deadline);
    assert!(cache.next_refresh() >= before_failure + chrono::Duration::seconds(3600));
  }

  #[tokio::test]
  async fn test_failed_first_listing_leaves_empty_index() {
    let dir = tempfile::tempdir().unwrap();
    let source = sample_source();
    source.fail_listing.store(true, Ordering::SeqCst);

    let cache = BlogCache::start(source, CountingFetcher::default(), &config(dir.path(), 3600))
      .await
      .unwrap();

    assert!(cache.get_articles().await.is_empty());
    assert_eq!(cache.source.content_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_read_before_deadline_makes_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlogCache::start(
      sample_source(),
      CountingFetcher::default(),
      &config(dir.path(), 3600),
    )
    .await
    .unwrap();
    let calls = cache.source.total_calls();

    cache.get_article("a1").await;
    cache.get_articles().await;
    cache.get_latest_articles(3).await;

    assert_eq!(cache.source.total_calls(), calls);
    assert_eq!(cache.source.refreshes.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_read_after_deadline_refreshes_once() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlogCache::start(sample_source(), CountingFetcher::default(), &config(dir.path(), 0))
      .await
      .unwrap();
    assert_eq!(cache.source.refreshes.load(Ordering::SeqCst), 1);

    cache.source.add("a4", 2021, "<p>fresh</p>");
    let article = cache.get_article("a4").await;

    assert!(article.is_some());
    assert_eq!(cache.source.refreshes.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_concurrent_reads_share_one_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeSource {
      list_delay: Some(Duration::from_millis(50)),
      ..sample_source()
    };
    let cache = BlogCache::start(source, CountingFetcher::default(), &config(dir.path(), 0))
      .await
      .unwrap();
    let before = cache.get_articles().await;
    assert_eq!(cache.source.refreshes.load(Ordering::SeqCst), 2);

    let (first, second, third) = tokio::join!(
      cache.get_articles(),
      cache.get_articles(),
      cache.get_latest_articles(1),
    );

    // Only the first reader refreshed; the others got the current snapshot
    assert_eq!(cache.source.refreshes.load(Ordering::SeqCst), 3);
    assert_eq!(first, before);
    assert_eq!(second, before);
    assert_eq!(third.len(), 1);
  }

  #[tokio::test]
  async fn test_huge_interval_saturates_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlogCache::start(
      sample_source(),
      CountingFetcher::default(),
      &config(dir.path(), 10_000_000_000_000),
    )
    .await
    .unwrap();

    assert_eq!(cache.next_refresh(), DateTime::<Utc>::MAX_UTC);
    assert!(cache.get_article("a1").await.is_some());
    assert_eq!(cache.source.refreshes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_new_cache_is_due_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlogCache::new(
      FakeSource::default(),
      CountingFetcher::default(),
      &config(dir.path(), 3600),
    )
    .unwrap();

    assert!(cache.is_refresh_due());
    assert!(cache.snapshot().is_empty());
  }
}
