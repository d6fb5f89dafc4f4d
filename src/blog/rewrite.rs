//! Pattern-based rewriting of article markup for local serving.

use color_eyre::{eyre::eyre, Result};
use regex::{Captures, Regex};

use crate::config::RewriteConfig;

/// Attachment referenced from article markup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentRef {
  /// Remote URL the attachment is downloaded from
  pub url: String,
  /// Path-like token naming the attachment
  pub token: String,
}

/// Rewrites remote links and attachment references to local paths.
#[derive(Debug, Clone)]
pub struct ContentRewriter {
  link: Regex,
  attachment: Regex,
  local_link_prefix: String,
  local_static_prefix: String,
}

impl ContentRewriter {
  pub fn new(config: &RewriteConfig) -> Result<Self> {
    let link = Regex::new(&format!(
      r#"(?i)href="{}([^"]+)""#,
      regex::escape(&config.remote_link_path)
    ))
    .map_err(|e| eyre!("Invalid link pattern: {}", e))?;

    // Group 2 is the host plus the content path as written in the markup,
    // kept lazy so the content path is matched at its first occurrence.
    let attachment = Regex::new(&format!(
      r#"(?i)(href|src)="([^"]+?{})([^"]+)""#,
      regex::escape(&config.remote_content_path)
    ))
    .map_err(|e| eyre!("Invalid attachment pattern: {}", e))?;

    Ok(Self {
      link,
      attachment,
      local_link_prefix: config.local_link_prefix.clone(),
      local_static_prefix: config.local_static_prefix.clone(),
    })
  }

  /// Attachments referenced from `content`, deduplicated, in order of appearance.
  pub fn find_attachments(&self, content: &str) -> Vec<AttachmentRef> {
    let mut found: Vec<AttachmentRef> = Vec::new();

    for caps in self.attachment.captures_iter(content) {
      let attachment = AttachmentRef {
        url: format!("{}{}", &caps[2], &caps[3]),
        token: caps[3].to_string(),
      };
      if !found.contains(&attachment) {
        found.push(attachment);
      }
    }

    found
  }

  /// Rewrite article links and attachment references of article `id`.
  pub fn rewrite(&self, id: &str, content: &str) -> String {
    let linked = self.link.replace_all(content, |caps: &Captures| {
      format!(r#"href="{}{}""#, self.local_link_prefix, &caps[1])
    });

    self
      .attachment
      .replace_all(&linked, |caps: &Captures| {
        format!(
          r#"{}="{}{}/{}""#,
          &caps[1], self.local_static_prefix, id, &caps[3]
        )
      })
      .into_owned()
  }
}
