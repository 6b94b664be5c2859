//! Domain extraction for URLs and bare host names.

use url::Url;

use crate::{Error, Result};

/// The lowercase host of `input` with any leading `www.` removed.
///
/// Accepts full URLs (`https://www.example.com/post`) as well as bare hosts
/// (`example.com`, `blog.example.com/path`).
pub fn base_domain(input: &str) -> Result<String> {
  let trimmed = input.trim();
  if trimmed.is_empty() {
    return Err(invalid(input, "empty"));
  }

  let parsed = match Url::parse(trimmed) {
    Ok(url) if url.has_host() => url,
    _ => Url::parse(&format!("https://{trimmed}"))
      .map_err(|e| invalid(input, &e.to_string()))?,
  };

  let host = parsed
    .host_str()
    .ok_or_else(|| invalid(input, "no host"))?
    .trim_end_matches('.')
    .to_ascii_lowercase();

  let host = host.strip_prefix("www.").unwrap_or(&host).to_owned();
  if !host.contains('.') {
    return Err(invalid(input, "host has no top-level domain"));
  }
  Ok(host)
}

/// Second-level labels that country registries sell names under, as in
/// `example.co.uk` or `example.com.au`.
const REGISTRY_SECOND_LEVEL: &[&str] =
  &["ac", "co", "com", "edu", "gov", "ne", "net", "or", "org"];

/// The registered name behind `input`: `provider.com` for
/// `https://blog.provider.com/post`, `shop.co.uk` for `www.shop.co.uk`.
///
/// Subdomains of one registration are one physical platform, so module
/// isolation compares these rather than full hosts. A country-code TLD
/// whose second level is a generic registry label keeps three labels; any
/// other host keeps two. IP addresses come back whole.
pub fn registrable_domain(input: &str) -> Result<String> {
  let host = base_domain(input)?;
  if host.parse::<std::net::IpAddr>().is_ok() {
    return Ok(host);
  }
  let labels: Vec<&str> = host.split('.').collect();
  let n = labels.len();
  let country_registry =
    n >= 3 && labels[n - 1].len() == 2 && REGISTRY_SECOND_LEVEL.contains(&labels[n - 2]);
  let keep = if country_registry { 3 } else { 2 };
  Ok(labels[n.saturating_sub(keep)..].join("."))
}

/// Like [`base_domain`], falling back to the trimmed input when it does not
/// parse. Used for anchor text, where a best effort beats an error.
pub fn naked_domain(input: &str) -> String {
  base_domain(input).unwrap_or_else(|_| input.trim().to_owned())
}

/// The final label of a domain, e.g. `com` for `blog.example.com`.
pub fn top_level(domain: &str) -> &str {
  domain.rsplit('.').next().unwrap_or(domain)
}

fn invalid(url: &str, reason: &str) -> Error {
  Error::InvalidUrl { url: url.to_owned(), reason: reason.to_owned() }
}
