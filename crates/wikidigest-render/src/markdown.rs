//! Markdown digest renderer.

use std::fmt::Write as _;

use wikidigest_core::{
  delivery::{Payload, Renderer},
  subscription::{Container, PageId},
  tree::{ContainerDigest, PageDigest, UserActivity},
};

use crate::error::{Error, Result};

pub const DEFAULT_SUBJECT: &str = "Wiki Digest";

/// Renders a container digest as a Markdown message.
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
  subject:  String,
  base_url: Option<String>,
}

impl Default for MarkdownRenderer {
  fn default() -> Self { Self::new(DEFAULT_SUBJECT) }
}

impl MarkdownRenderer {
  pub fn new(subject: impl Into<String>) -> Self {
    Self { subject: subject.into(), base_url: None }
  }

  /// Link page headings to `{base_url}/page/{page_id}`.
  pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
    let url: String = base_url.into();
    self.base_url = Some(url.trim_end_matches('/').to_owned());
    self
  }

  fn page_link(&self, page_id: PageId) -> Option<String> {
    self.base_url.as_ref().map(|base| format!("{base}/page/{page_id}"))
  }

  fn write_page(&self, out: &mut String, page: &PageDigest) -> Result<()> {
    let title = escape_inline(&page.title);
    match self.page_link(page.page_id) {
      Some(link) => writeln!(out, "## Page: [{title}]({link})")?,
      None => writeln!(out, "## Page: {title}")?,
    }
    writeln!(out)?;

    for user in page.users.values() {
      write_user(out, user)?;
    }
    Ok(())
  }
}

fn write_user(out: &mut String, user: &UserActivity) -> Result<()> {
  writeln!(out, "### User {} made following changes.", escape_inline(&user.full_name))?;
  writeln!(out)?;

  let created = user.edits.iter().any(|e| e.created);
  let edits: u32 = user.edits.iter().map(|e| e.edit_count).sum();

  if created {
    writeln!(out, "- Created Page")?;
  }
  if edits > 0 {
    writeln!(out, "- Made {edits} edits.")?;
  }
  if !user.comments.is_empty() {
    writeln!(out, "- Made {} comment(s):", user.comment_count)?;
    for comment in &user.comments {
      writeln!(out)?;
      for line in comment.body.lines() {
        writeln!(out, "  > {line}")?;
      }
    }
  }
  writeln!(out)?;
  Ok(())
}

// ─── Escaping ────────────────────────────────────────────────────────────────

/// Escape characters that would otherwise start Markdown inline markup.
fn escape_inline(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']' | '<' | '>' | '#') {
      out.push('\\');
    }
    out.push(c);
  }
  out
}

// ─── Renderer impl ───────────────────────────────────────────────────────────

impl Renderer for MarkdownRenderer {
  type Error = Error;

  fn render(&self, container: &Container, digest: &ContainerDigest) -> Result<Payload> {
    if digest.pages.is_empty() {
      return Err(Error::EmptyDigest(digest.container_id));
    }

    let mut body = String::new();
    writeln!(body, "# All Wiki Notifications for: {}", escape_inline(&container.name))?;
    writeln!(body)?;

    for page in digest.pages.values() {
      self.write_page(&mut body, page)?;
    }

    Ok(Payload { subject: self.subject.clone(), body: body.trim_end().to_owned() })
  }
}
