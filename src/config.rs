use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for blog.refresh_interval_secs (one year)
const MAX_REFRESH_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub cms: CmsConfig,
  #[serde(default)]
  pub blog: BlogConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmsConfig {
  /// Base URL of the content API (e.g., "https://api.example.com")
  pub api_url: String,
  /// Base URL of the token endpoint (defaults to api_url)
  pub auth_url: Option<String>,
  pub organization: String,
  /// Client id, overridden by BLOG_MIRROR_CLIENT_ID
  pub client_id: Option<String>,
  /// Applies to API requests and attachment downloads
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
  30
}

impl CmsConfig {
  pub fn auth_url(&self) -> &str {
    self.auth_url.as_deref().unwrap_or(&self.api_url)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlogConfig {
  /// Root of the attachment mirror, one subdirectory per article
  pub cache_dir: PathBuf,
  pub refresh_interval_secs: u64,
  /// Only articles carrying this tag are listed
  pub tag: String,
  pub latest_count: usize,
  /// Maximum number of article bodies fetched at the same time
  pub content_concurrency: usize,
  pub rewrite: RewriteConfig,
}

impl Default for BlogConfig {
  fn default() -> Self {
    Self {
      cache_dir: PathBuf::from("static/blog"),
      refresh_interval_secs: 3600,
      tag: "blog".to_string(),
      latest_count: 3,
      content_concurrency: 4,
      rewrite: RewriteConfig::default(),
    }
  }
}

impl BlogConfig {
  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.refresh_interval_secs)
  }
}

/// Path fragments used to rewrite article markup for local serving.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RewriteConfig {
  /// Path of article-to-article links on the remote side
  pub remote_link_path: String,
  /// Local path prefix replacing remote_link_path
  pub local_link_prefix: String,
  /// Path of the remote content-serving endpoint
  pub remote_content_path: String,
  /// Local static prefix; the article id is appended below it
  pub local_static_prefix: String,
}

impl Default for RewriteConfig {
  fn default() -> Self {
    Self {
      remote_link_path: "/read/".to_string(),
      local_link_prefix: "/blog/".to_string(),
      remote_content_path: "/api/v1/content/".to_string(),
      local_static_prefix: "/static/blog/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter directive, RUST_LOG takes precedence
  pub level: String,
  /// Optional log file written next to stdout
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./blog-mirror.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/blog-mirror/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/blog-mirror/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("blog-mirror.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("blog-mirror").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.cms.api_url)
      .map_err(|e| eyre!("cms.api_url is not a valid URL: {}", e))?;
    url::Url::parse(self.cms.auth_url())
      .map_err(|e| eyre!("cms.auth_url is not a valid URL: {}", e))?;

    if self.cms.request_timeout_secs == 0 {
      return Err(eyre!("cms.request_timeout_secs must be at least 1"));
    }
    if self.blog.refresh_interval_secs > MAX_REFRESH_INTERVAL_SECS {
      return Err(eyre!(
        "blog.refresh_interval_secs must not exceed {} (one year)",
        MAX_REFRESH_INTERVAL_SECS
      ));
    }
    if self.blog.content_concurrency == 0 {
      return Err(eyre!("blog.content_concurrency must be at least 1"));
    }
    if self.blog.latest_count == 0 {
      return Err(eyre!("blog.latest_count must be at least 1"));
    }

    let rewrite = &self.blog.rewrite;
    for (name, value) in [
      ("remote_link_path", &rewrite.remote_link_path),
      ("local_link_prefix", &rewrite.local_link_prefix),
      ("remote_content_path", &rewrite.remote_content_path),
      ("local_static_prefix", &rewrite.local_static_prefix),
    ] {
      if value.is_empty() {
        return Err(eyre!("blog.rewrite.{} must not be empty", name));
      }
    }

    Ok(())
  }

  /// Get the API client id.
  ///
  /// Checks BLOG_MIRROR_CLIENT_ID first, then the config file.
  pub fn get_client_id(&self) -> Result<String> {
    std::env::var("BLOG_MIRROR_CLIENT_ID")
      .ok()
      .or_else(|| self.cms.client_id.clone())
      .ok_or_else(|| {
        eyre!("API client id not found. Set BLOG_MIRROR_CLIENT_ID or cms.client_id in the config.")
      })
  }

  /// Get the API client secret from BLOG_MIRROR_CLIENT_SECRET.
  pub fn get_client_secret() -> Result<String> {
    std::env::var("BLOG_MIRROR_CLIENT_SECRET").map_err(|_| {
      eyre!("API client secret not found. Set BLOG_MIRROR_CLIENT_SECRET environment variable.")
    })
  }
}
