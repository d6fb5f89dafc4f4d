mod blog;
mod cms;
mod commands;
mod config;
mod logging;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing::info;

use crate::blog::BlogCache;
use crate::cms::client::{CmsClient, HttpFetcher};
use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(name = "blog-mirror")]
#[command(about = "Blog content cache that mirrors a headless CMS with local attachments")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/blog-mirror/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  info!(
    api_url = %config.cms.api_url,
    cache_dir = %config.blog.cache_dir.display(),
    "Configuration loaded"
  );

  let source = CmsClient::new(&config)?;
  let fetcher = HttpFetcher::new(config.cms.request_timeout())?;

  // The refresh command runs its own refresh, everything else reads from a
  // cache loaded at startup
  let cache = match args.command {
    Command::Refresh => BlogCache::new(source, fetcher, &config.blog)?,
    _ => BlogCache::start(source, fetcher, &config.blog).await?,
  };

  let output = args.command.run(&cache, config.blog.latest_count).await?;
  print!("{}", output);

  Ok(())
}
