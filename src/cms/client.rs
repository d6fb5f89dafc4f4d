use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::blog::{ArticleSource, AttachmentFetcher};
use crate::cms::api_types::{ApiArticlesResponse, ApiArticleResponse, ApiTokenResponse};
use crate::cms::types::{Article, ArticleContent};
use crate::config::{CmsConfig, Config};

/// Renew tokens this long before the server-side expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct AccessToken {
  value: String,
  /// None when the server did not announce a lifetime
  expires_at: Option<Instant>,
}

impl AccessToken {
  fn from_response(resp: ApiTokenResponse) -> Self {
    let expires_at = (resp.expires_in > 0).then(|| {
      Instant::now() + Duration::from_secs(resp.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN)
    });
    Self {
      value: resp.access_token,
      expires_at,
    }
  }

  fn is_valid(&self) -> bool {
    self.expires_at.map_or(true, |at| Instant::now() < at)
  }
}

/// Headless CMS API client
#[derive(Clone)]
pub struct CmsClient {
  http: reqwest::Client,
  api_url: Url,
  auth_url: Url,
  organization: String,
  client_id: String,
  client_secret: String,
  token: Arc<Mutex<Option<AccessToken>>>,
}

impl CmsClient {
  pub fn new(config: &Config) -> Result<Self> {
    let client_id = config.get_client_id()?;
    let client_secret = Config::get_client_secret()?;
    Self::with_credentials(&config.cms, client_id, client_secret)
  }

  pub fn with_credentials(
    cms: &CmsConfig,
    client_id: String,
    client_secret: String,
  ) -> Result<Self> {
    let http = http_client(cms.request_timeout())?;

    Ok(Self {
      http,
      api_url: base_url(&cms.api_url)?,
      auth_url: base_url(cms.auth_url())?,
      organization: cms.organization.clone(),
      client_id,
      client_secret,
      token: Arc::new(Mutex::new(None)),
    })
  }

  /// Return the cached access token, requesting a new one if needed.
  async fn access_token(&self) -> Result<String> {
    let mut guard = self.token.lock().await;
    if let Some(token) = guard.as_ref().filter(|t| t.is_valid()) {
      return Ok(token.value.clone());
    }

    let token = self.request_token().await?;
    let value = token.value.clone();
    *guard = Some(token);
    Ok(value)
  }

  async fn request_token(&self) -> Result<AccessToken> {
    let url = join(&self.auth_url, "api/v1/auth/token")?;
    debug!(url = %url, "Requesting access token");

    let resp = self
      .http
      .post(url.clone())
      .form(&[
        ("grant_type", "client_credentials"),
        ("client_id", self.client_id.as_str()),
        ("client_secret", self.client_secret.as_str()),
      ])
      .send()
      .await
      .map_err(|e| eyre!("Failed to request access token: {}", e))?;

    if !resp.status().is_success() {
      return Err(eyre!("Access token request failed with status {}", resp.status()));
    }

    let token: ApiTokenResponse = resp
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse access token response: {}", e))?;
    debug!(
      token_type = %token.token_type,
      expires_in = token.expires_in,
      "Access token received"
    );

    Ok(AccessToken::from_response(token))
  }

  /// Authenticated GET, renewing the token once if the API rejects it.
  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
    let mut renewed = false;

    loop {
      let token = self.access_token().await?;
      let resp = self
        .http
        .get(url.clone())
        .bearer_auth(&token)
        .header("Client", &self.client_id)
        .header("Organization", &self.organization)
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

      if resp.status() == StatusCode::UNAUTHORIZED && !renewed {
        debug!(url = %url, "Access token rejected, renewing");
        *self.token.lock().await = None;
        renewed = true;
        continue;
      }

      if !resp.status().is_success() {
        return Err(eyre!("Request to {} failed with status {}", url, resp.status()));
      }

      return resp
        .json()
        .await
        .map_err(|e| eyre!("Failed to parse response from {}: {}", url, e));
    }
  }
}

impl ArticleSource for CmsClient {
  /// Search published articles by tag, newest first
  async fn list_articles(&self, tag: &str, offset: usize) -> Result<Vec<Article>> {
    let mut url = join(&self.api_url, "api/v1/search/article")?;
    url
      .query_pairs_mut()
      .append_pair("tags", tag)
      .append_pair("sort_published", "desc")
      .append_pair("offset", &offset.to_string());

    let response: ApiArticlesResponse = self
      .get_json(url)
      .await
      .map_err(|e| eyre!("Failed to list articles at offset {}: {}", offset, e))?;
    debug!(offset, returned = response.articles.len(), count = response.count, "Article page received");

    Ok(response.articles.into_iter().map(Article::from).collect())
  }

  /// Get the latest content of an article (version 0 means latest)
  async fn get_content(&self, id: &str, language_id: &str) -> Result<ArticleContent> {
    let mut url = join(&self.api_url, "api/v1/article/")?;
    url
      .path_segments_mut()
      .map_err(|_| eyre!("API URL cannot be a base: {}", self.api_url))?
      .pop_if_empty()
      .push(id);
    url
      .query_pairs_mut()
      .append_pair("lang", language_id)
      .append_pair("version", "0");

    let response: ApiArticleResponse = self
      .get_json(url)
      .await
      .map_err(|e| eyre!("Failed to get article {}: {}", id, e))?;

    response
      .content
      .map(ArticleContent::from)
      .ok_or_else(|| eyre!("Article {} has no content", id))
  }
}

/// Unauthenticated attachment downloader
#[derive(Clone)]
pub struct HttpFetcher {
  http: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    Ok(Self {
      http: http_client(timeout)?,
    })
  }
}

impl AttachmentFetcher for HttpFetcher {
  async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
    let resp = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to download {}: {}", url, e))?;

    if !resp.status().is_success() {
      return Err(eyre!("Download of {} failed with status {}", url, resp.status()));
    }

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

    Ok(body.to_vec())
  }
}

/// HTTP client whose requests give up after `timeout`, so a silent server
/// cannot stall a refresh.
fn http_client(timeout: Duration) -> Result<reqwest::Client> {
  reqwest::Client::builder()
    .user_agent(concat!("blog-mirror/", env!("CARGO_PKG_VERSION")))
    .connect_timeout(timeout)
    .timeout(timeout)
    .build()
    .map_err(|e| eyre!("Failed to create HTTP client: {}", e))
}

/// Parse a base URL, making sure relative joins append below its path.
fn base_url(raw: &str) -> Result<Url> {
  let mut url = Url::parse(raw).map_err(|e| eyre!("Invalid URL {}: {}", raw, e))?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

fn join(base: &Url, path: &str) -> Result<Url> {
  base
    .join(path)
    .map_err(|e| eyre!("Failed to build URL {}{}: {}", base, path, e))
}
