//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with a fixed microsecond
//! precision and a `Z` suffix, so lexicographic order matches chronological
//! order and range filters can run in SQL. UUIDs are stored as hyphenated
//! lowercase strings. Enums are stored as their `as_str` discriminants and
//! tiers as integers.
//!
//! Row mappers decode straight from a [`rusqlite::Row`]; a malformed column
//! surfaces as [`rusqlite::Error::FromSqlConversionFailure`].

use chrono::{DateTime, SecondsFormat, Utc};
use linkmesh_core::{
  anchor::AnchorType,
  content::{
    Article, Derivative, DerivativeKind, DerivativeStatus, DistributionStatus,
    DistributionTask, Platform, Site, TaskStatus,
  },
  exchange::{BlacklistEntry, CreditsStatus, ExchangeLink, InventoryItem},
  ledger::{Ledger, Transaction, TransactionKind},
  link::{Backlink, DomainUsage, Module},
  tier::Tier,
};
use rusqlite::{Row, types::Type};
use uuid::Uuid;

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn encode_opt_uuid(id: Option<Uuid>) -> Option<String> { id.map(encode_uuid) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn encode_opt_dt(dt: Option<DateTime<Utc>>) -> Option<String> { dt.map(encode_dt) }

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
  Uuid::parse_str(s).map_err(|e| conversion(idx, e))
}

fn parse_dt(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| conversion(idx, e))
}

pub fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
  let s: String = row.get(idx)?;
  parse_uuid(idx, &s)
}

pub fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
  let s: Option<String> = row.get(idx)?;
  s.map(|s| parse_uuid(idx, &s)).transpose()
}

pub fn dt_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let s: String = row.get(idx)?;
  parse_dt(idx, &s)
}

pub fn opt_dt_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
  let s: Option<String> = row.get(idx)?;
  s.map(|s| parse_dt(idx, &s)).transpose()
}

fn tier_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Tier> {
  let n: u8 = row.get(idx)?;
  Tier::try_from(n).map_err(|e| conversion(idx, e))
}

/// Decode a text discriminant with one of the core `parse` functions.
fn enum_at<T>(
  row: &Row<'_>,
  idx: usize,
  parse: fn(&str) -> linkmesh_core::Result<T>,
) -> rusqlite::Result<T> {
  let s: String = row.get(idx)?;
  parse(&s).map_err(|e| conversion(idx, e))
}

fn keywords_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
  let s: String = row.get(idx)?;
  serde_json::from_str(&s).map_err(|e| conversion(idx, e))
}

// ─── Catalog rows ────────────────────────────────────────────────────────────

pub const SITE_COLUMNS: &str = "site_id, user_id, name, domain, created_at";

pub fn site_from_row(row: &Row<'_>) -> rusqlite::Result<Site> {
  Ok(Site {
    site_id:    uuid_at(row, 0)?,
    user_id:    uuid_at(row, 1)?,
    name:       row.get(2)?,
    domain:     row.get(3)?,
    created_at: dt_at(row, 4)?,
  })
}

pub const ARTICLE_COLUMNS: &str = "article_id, site_id, user_id, title, body, \
  primary_keyword, secondary_keywords, target_url, distribution_status, created_at";

pub fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
  Ok(Article {
    article_id:          uuid_at(row, 0)?,
    site_id:             uuid_at(row, 1)?,
    user_id:             uuid_at(row, 2)?,
    title:               row.get(3)?,
    body:                row.get(4)?,
    primary_keyword:     row.get(5)?,
    secondary_keywords:  keywords_at(row, 6)?,
    target_url:          row.get(7)?,
    distribution_status: enum_at(row, 8, DistributionStatus::parse)?,
    created_at:          dt_at(row, 9)?,
  })
}

pub const PLATFORM_COLUMNS: &str =
  "platform_id, name, url, tier, category, authority, active";

pub fn platform_from_row(row: &Row<'_>) -> rusqlite::Result<Platform> {
  Ok(Platform {
    platform_id: uuid_at(row, 0)?,
    name:        row.get(1)?,
    url:         row.get(2)?,
    tier:        tier_at(row, 3)?,
    category:    row.get(4)?,
    authority:   row.get(5)?,
    active:      row.get(6)?,
  })
}

// ─── Distribution rows ───────────────────────────────────────────────────────

pub const DERIVATIVE_COLUMNS: &str = "derivative_id, article_id, user_id, kind, \
  tier, title, body, excerpt, anchor_text, anchor_type, target_url, target_tier, \
  parent_derivative_id, platform_category, status, created_at";

pub fn derivative_from_row(row: &Row<'_>) -> rusqlite::Result<Derivative> {
  Ok(Derivative {
    derivative_id:        uuid_at(row, 0)?,
    article_id:           uuid_at(row, 1)?,
    user_id:              uuid_at(row, 2)?,
    kind:                 enum_at(row, 3, DerivativeKind::parse)?,
    tier:                 tier_at(row, 4)?,
    title:                row.get(5)?,
    body:                 row.get(6)?,
    excerpt:              row.get(7)?,
    anchor_text:          row.get(8)?,
    anchor_type:          enum_at(row, 9, AnchorType::parse)?,
    target_url:           row.get(10)?,
    target_tier:          tier_at(row, 11)?,
    parent_derivative_id: opt_uuid_at(row, 12)?,
    platform_category:    row.get(13)?,
    status:               enum_at(row, 14, DerivativeStatus::parse)?,
    created_at:           dt_at(row, 15)?,
  })
}

pub const TASK_COLUMNS: &str = "task_id, derivative_id, article_id, user_id, \
  platform_id, tier, scheduled_for, priority, status, placed_url, failure_reason, \
  created_at, finished_at";

pub fn task_from_row(row: &Row<'_>) -> rusqlite::Result<DistributionTask> {
  Ok(DistributionTask {
    task_id:        uuid_at(row, 0)?,
    derivative_id:  uuid_at(row, 1)?,
    article_id:     uuid_at(row, 2)?,
    user_id:        uuid_at(row, 3)?,
    platform_id:    uuid_at(row, 4)?,
    tier:           tier_at(row, 5)?,
    scheduled_for:  dt_at(row, 6)?,
    priority:       row.get(7)?,
    status:         enum_at(row, 8, TaskStatus::parse)?,
    placed_url:     row.get(9)?,
    failure_reason: row.get(10)?,
    created_at:     dt_at(row, 11)?,
    finished_at:    opt_dt_at(row, 12)?,
  })
}

// ─── Backlink rows ───────────────────────────────────────────────────────────

pub const BACKLINK_COLUMNS: &str = "backlink_id, user_id, module, tier, source_url, \
  source_domain, target_url, anchor_text, anchor_type, is_live, is_indexed, \
  created_at, last_checked_at, removed_at, task_id, exchange_link_id";

pub fn backlink_from_row(row: &Row<'_>) -> rusqlite::Result<Backlink> {
  Ok(Backlink {
    backlink_id:      uuid_at(row, 0)?,
    user_id:          uuid_at(row, 1)?,
    module:           enum_at(row, 2, Module::parse)?,
    tier:             tier_at(row, 3)?,
    source_url:       row.get(4)?,
    source_domain:    row.get(5)?,
    target_url:       row.get(6)?,
    anchor_text:      row.get(7)?,
    anchor_type:      enum_at(row, 8, AnchorType::parse)?,
    is_live:          row.get(9)?,
    is_indexed:       row.get(10)?,
    created_at:       dt_at(row, 11)?,
    last_checked_at:  opt_dt_at(row, 12)?,
    removed_at:       opt_dt_at(row, 13)?,
    task_id:          opt_uuid_at(row, 14)?,
    exchange_link_id: opt_uuid_at(row, 15)?,
  })
}

pub fn module_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Module> {
  enum_at(row, idx, Module::parse)
}

/// Bind order matches [`BACKLINK_COLUMNS`].
pub fn insert_backlink(conn: &rusqlite::Connection, b: &Backlink) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO backlinks ({BACKLINK_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
    ),
    rusqlite::params![
      encode_uuid(b.backlink_id),
      encode_uuid(b.user_id),
      b.module.as_str(),
      b.tier.number(),
      b.source_url,
      b.source_domain,
      b.target_url,
      b.anchor_text,
      b.anchor_type.as_str(),
      b.is_live,
      b.is_indexed,
      encode_dt(b.created_at),
      encode_opt_dt(b.last_checked_at),
      encode_opt_dt(b.removed_at),
      encode_opt_uuid(b.task_id),
      encode_opt_uuid(b.exchange_link_id),
    ],
  )?;
  Ok(())
}

pub fn insert_domain_usage(
  conn: &rusqlite::Connection,
  usage: &DomainUsage,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO domain_usage (user_id, domain, module, first_used_at)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![
      encode_uuid(usage.user_id),
      usage.domain,
      usage.module.as_str(),
      encode_dt(usage.first_used_at),
    ],
  )?;
  Ok(())
}

// ─── Exchange rows ───────────────────────────────────────────────────────────

pub const INVENTORY_COLUMNS: &str = "inventory_id, owner_id, domain, page_url, \
  authority, quality_score, risk_score, tier, credits_per_link, max_outbound_links, \
  current_outbound_links, active, created_at";

pub fn inventory_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
  Ok(InventoryItem {
    inventory_id:           uuid_at(row, 0)?,
    owner_id:               uuid_at(row, 1)?,
    domain:                 row.get(2)?,
    page_url:               row.get(3)?,
    authority:              row.get(4)?,
    quality_score:          row.get(5)?,
    risk_score:             row.get(6)?,
    tier:                   tier_at(row, 7)?,
    credits_per_link:       row.get(8)?,
    max_outbound_links:     row.get(9)?,
    current_outbound_links: row.get(10)?,
    active:                 row.get(11)?,
    created_at:             dt_at(row, 12)?,
  })
}

pub const LINK_COLUMNS: &str = "link_id, requester_id, provider_id, inventory_id, \
  page_url, target_url, hop_distance, anchor_text, anchor_type, credits_awarded, \
  credits_status, is_live, is_indexed, created_at, settled_at";

pub fn link_from_row(row: &Row<'_>) -> rusqlite::Result<ExchangeLink> {
  Ok(ExchangeLink {
    link_id:         uuid_at(row, 0)?,
    requester_id:    uuid_at(row, 1)?,
    provider_id:     uuid_at(row, 2)?,
    inventory_id:    uuid_at(row, 3)?,
    page_url:        row.get(4)?,
    target_url:      row.get(5)?,
    hop_distance:    row.get(6)?,
    anchor_text:     row.get(7)?,
    anchor_type:     enum_at(row, 8, AnchorType::parse)?,
    credits_awarded: row.get(9)?,
    credits_status:  enum_at(row, 10, CreditsStatus::parse)?,
    is_live:         row.get(11)?,
    is_indexed:      row.get(12)?,
    created_at:      dt_at(row, 13)?,
    settled_at:      opt_dt_at(row, 14)?,
  })
}

pub const BLACKLIST_COLUMNS: &str =
  "participant_a, participant_b, reason, created_at, expires_at";

pub fn blacklist_from_row(row: &Row<'_>) -> rusqlite::Result<BlacklistEntry> {
  Ok(BlacklistEntry {
    participant_a: uuid_at(row, 0)?,
    participant_b: uuid_at(row, 1)?,
    reason:        row.get(2)?,
    created_at:    dt_at(row, 3)?,
    expires_at:    dt_at(row, 4)?,
  })
}

// ─── Ledger rows ─────────────────────────────────────────────────────────────

pub const LEDGER_COLUMNS: &str = "user_id, balance, pending_credits, \
  lifetime_earned, lifetime_spent, created_at, updated_at";

pub fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<Ledger> {
  Ok(Ledger {
    user_id:         uuid_at(row, 0)?,
    balance:         row.get(1)?,
    pending_credits: row.get(2)?,
    lifetime_earned: row.get(3)?,
    lifetime_spent:  row.get(4)?,
    created_at:      dt_at(row, 5)?,
    updated_at:      dt_at(row, 6)?,
  })
}

pub const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, kind, amount, \
  balance_after, pending_after, reason, related_link_id, related_inventory_id, \
  created_at";

pub fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
  Ok(Transaction {
    transaction_id:       uuid_at(row, 0)?,
    user_id:              uuid_at(row, 1)?,
    kind:                 enum_at(row, 2, TransactionKind::parse)?,
    amount:               row.get(3)?,
    balance_after:        row.get(4)?,
    pending_after:        row.get(5)?,
    reason:               row.get(6)?,
    related_link_id:      opt_uuid_at(row, 7)?,
    related_inventory_id: opt_uuid_at(row, 8)?,
    created_at:           dt_at(row, 9)?,
  })
}
