//! [`ExtractiveAdapter`]: a deterministic [`ContentAdapter`] that builds
//! derivatives by excerpting the source article. Used when no generation
//! service is configured, and as a stable baseline in tests.

use crate::collab::{
  AdaptedContent, CollaboratorError, ContentAdapter, ContentPurpose, ContentRequest,
};
use crate::content::DerivativeKind;

/// Truncate `s` to at most `max` characters, on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    Some((idx, _)) => s[..idx].to_owned(),
    None => s.to_owned(),
  }
}

#[derive(Debug, Clone)]
pub struct ExtractiveAdapter {
  /// Number of leading sentences used for the excerpt.
  pub excerpt_sentences: usize,
  /// Number of leading paragraphs carried into the body.
  pub body_paragraphs:   usize,
}

impl Default for ExtractiveAdapter {
  fn default() -> Self { Self { excerpt_sentences: 2, body_paragraphs: 3 } }
}

impl ExtractiveAdapter {
  pub fn adapt(&self, request: &ContentRequest) -> AdaptedContent {
    let title = match &request.purpose {
      ContentPurpose::Derivative { kind } => kind_title(*kind, &request.title),
      ContentPurpose::Contextual { .. } => request.title.clone(),
    };

    let excerpt = leading_sentences(&request.body, self.excerpt_sentences);

    let link = match &request.target_url {
      Some(url) => format!("<a href=\"{url}\">{}</a>", request.anchor.text),
      None => request.anchor.text.clone(),
    };

    let mut paragraphs: Vec<String> = request
      .body
      .split("\n\n")
      .map(str::trim)
      .filter(|p| !p.is_empty())
      .take(self.body_paragraphs.max(1))
      .map(str::to_owned)
      .collect();
    if paragraphs.is_empty() {
      paragraphs.push(excerpt.clone());
    }
    paragraphs.push(format!("More on this from {link}."));

    AdaptedContent { title, content: paragraphs.join("\n\n"), excerpt }
  }
}

impl ContentAdapter for ExtractiveAdapter {
  async fn generate(
    &self,
    request: ContentRequest,
  ) -> Result<AdaptedContent, CollaboratorError> {
    if request.body.trim().is_empty() {
      return Err(CollaboratorError::Rejected("article body is empty".into()));
    }
    Ok(self.adapt(&request))
  }
}

fn kind_title(kind: DerivativeKind, title: &str) -> String {
  match kind {
    DerivativeKind::Syndication => title.to_owned(),
    DerivativeKind::Opinion => format!("Why {title} matters"),
    DerivativeKind::Listicle => format!("Key takeaways: {title}"),
    DerivativeKind::Summary => format!("{title}, summarised"),
    DerivativeKind::Snippet => format!("Quick read: {title}"),
    DerivativeKind::Abstract => format!("Abstract: {title}"),
    DerivativeKind::SocialPost => truncate_chars(title, 80),
  }
}

fn leading_sentences(body: &str, n: usize) -> String {
  let mut count = 0;
  for (i, c) in body.char_indices() {
    if matches!(c, '.' | '!' | '?') {
      count += 1;
      if count == n {
        return body[..=i].trim().to_owned();
      }
    }
  }
  body.trim().to_owned()
}
