//! The `LinkStore` trait and supporting query and batch types.
//!
//! The trait is implemented by storage backends (e.g. `linkmesh-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend.
//!
//! Operations that move credits (`commit_exchange`, `settle_exchange_link`,
//! `apply_ledger_entries`) are atomic: the ledger rows, the paired transaction
//! records and any related link rows are written together or not at all.
//! Business rejections inside those operations come back as outcome enums,
//! not as errors.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  collab::HealthReport,
  content::{
    Article, Derivative, DistributionStatus, DistributionTask, Platform, Site,
    TaskStatus,
  },
  exchange::{
    BlacklistEntry, CreditsStatus, ExchangeLink, InventoryItem, SettlementDecision,
  },
  ledger::{Ledger, LedgerEntry, Transaction, TransactionKind},
  link::{Backlink, DomainUsage, Module},
  tier::{LinkSettings, Tier},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`LinkStore::list_tasks`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskQuery {
  pub user_id:    Option<Uuid>,
  pub article_id: Option<Uuid>,
  pub status:     Option<TaskStatus>,
  /// Only tasks scheduled at or before this instant.
  pub due_before: Option<DateTime<Utc>>,
  pub limit:      Option<usize>,
}

/// Parameters for [`LinkStore::list_backlinks`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklinkQuery {
  pub user_id:       Option<Uuid>,
  pub module:        Option<Module>,
  pub tier:          Option<Tier>,
  pub created_after: Option<DateTime<Utc>>,
  /// Exclude links already marked removed.
  pub live_only:     bool,
  /// Order by the last check attempt, successful or not (never-checked
  /// first), instead of newest first.
  pub stalest_first: bool,
  pub limit:         Option<usize>,
}

/// Parameters for [`LinkStore::list_inventory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryQuery {
  pub owner_id:      Option<Uuid>,
  pub exclude_owner: Option<Uuid>,
  pub min_authority: Option<u32>,
  pub tier:          Option<Tier>,
  /// Only active items with remaining outbound capacity.
  pub with_capacity: bool,
  pub limit:         Option<usize>,
}

/// Parameters for [`LinkStore::list_exchange_links`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeLinkQuery {
  /// Links where this participant is either requester or provider.
  pub participant:           Option<Uuid>,
  pub requester_id:          Option<Uuid>,
  pub provider_id:           Option<Uuid>,
  pub status:                Option<CreditsStatus>,
  pub created_after:         Option<DateTime<Utc>>,
  pub created_before:        Option<DateTime<Utc>>,
  /// Oldest first instead of newest first.
  pub oldest_first:          bool,
  /// Never-attempted links first, then by the last inconclusive settlement
  /// attempt. Takes precedence over `oldest_first`.
  pub least_attempted_first: bool,
  pub limit:                 Option<usize>,
}

/// Parameters for [`LinkStore::list_transactions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionQuery {
  pub user_id:         Option<Uuid>,
  pub kind:            Option<TransactionKind>,
  pub related_link_id: Option<Uuid>,
  pub limit:           Option<usize>,
}

// ─── Batch and outcome types ─────────────────────────────────────────────────

/// Everything one distribution run persists, written in one transaction.
/// Tasks are upserted by id, so replaying a batch is harmless.
#[derive(Debug, Clone, Default)]
pub struct DistributionBatch {
  pub derivatives: Vec<Derivative>,
  pub tasks:       Vec<DistributionTask>,
  pub usages:      Vec<DomainUsage>,
}

/// Blacklisting rule evaluated inside [`LinkStore::commit_exchange`], after
/// the new link has been counted.
#[derive(Debug, Clone)]
pub struct PairLimit {
  pub max_connections: u32,
  pub blacklist_until: DateTime<Utc>,
  pub reason:          String,
}

/// The writes that realise one exchange, applied atomically:
/// link row, requester debit, provider pending credit, inventory counter,
/// backlink, module usage and (if the pair limit is reached) a blacklist row.
#[derive(Debug, Clone)]
pub struct ExchangeCommit {
  pub link:            ExchangeLink,
  pub backlink:        Backlink,
  pub usage:           DomainUsage,
  pub requester_debit: LedgerEntry,
  pub provider_credit: LedgerEntry,
  pub pair_limit:      PairLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
  Committed {
    link:              ExchangeLink,
    requester_balance: i64,
    provider_pending:  i64,
    blacklisted:       bool,
  },
  InsufficientBalance {
    required:  i64,
    available: i64,
  },
  CapacityExhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettleOutcome {
  Settled {
    link:        ExchangeLink,
    transaction: Transaction,
  },
  AlreadySettled(CreditsStatus),
  NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LedgerOutcome {
  /// Entries were applied. Entries whose `(related_link_id, kind)` already
  /// had a transaction were skipped and counted in `skipped`.
  Applied {
    transactions: Vec<Transaction>,
    skipped:      usize,
  },
  /// Applying the entries would push `user_id` below zero; nothing was
  /// written.
  Insufficient { user_id: Uuid },
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a linkmesh store backend.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait LinkStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Catalog ───────────────────────────────────────────────────────────

  fn insert_site(
    &self,
    site: Site,
  ) -> impl Future<Output = Result<Site, Self::Error>> + Send + '_;

  fn get_site(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Site>, Self::Error>> + Send + '_;

  fn insert_article(
    &self,
    article: Article,
  ) -> impl Future<Output = Result<Article, Self::Error>> + Send + '_;

  fn get_article(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Article>, Self::Error>> + Send + '_;

  fn set_article_status(
    &self,
    id: Uuid,
    status: DistributionStatus,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Insert or replace a platform by id.
  fn upsert_platform(
    &self,
    platform: Platform,
  ) -> impl Future<Output = Result<Platform, Self::Error>> + Send + '_;

  /// Platforms, highest authority first.
  fn list_platforms(
    &self,
    tier: Option<Tier>,
    active_only: bool,
  ) -> impl Future<Output = Result<Vec<Platform>, Self::Error>> + Send + '_;

  // ── Settings ──────────────────────────────────────────────────────────

  fn get_settings(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Option<LinkSettings>, Self::Error>> + Send + '_;

  fn put_settings(
    &self,
    user_id: Uuid,
    settings: LinkSettings,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Distribution ──────────────────────────────────────────────────────

  fn record_distribution(
    &self,
    batch: DistributionBatch,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_derivative(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Derivative>, Self::Error>> + Send + '_;

  fn list_derivatives(
    &self,
    article_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Derivative>, Self::Error>> + Send + '_;

  fn get_task(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<DistributionTask>, Self::Error>> + Send + '_;

  /// Tasks ordered by `scheduled_for`, then descending priority.
  fn list_tasks(
    &self,
    query: TaskQuery,
  ) -> impl Future<Output = Result<Vec<DistributionTask>, Self::Error>> + Send + '_;

  /// Mark a pending task completed, its derivative placed, and append the
  /// resulting backlink. Errors if the task is missing or not pending.
  fn complete_task(
    &self,
    task_id: Uuid,
    placed_url: String,
    backlink: Backlink,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<DistributionTask, Self::Error>> + Send + '_;

  /// Mark a pending task and its derivative failed.
  fn fail_task(
    &self,
    task_id: Uuid,
    reason: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<DistributionTask, Self::Error>> + Send + '_;

  // ── Backlinks ─────────────────────────────────────────────────────────

  fn insert_backlink(
    &self,
    backlink: Backlink,
  ) -> impl Future<Output = Result<Backlink, Self::Error>> + Send + '_;

  fn count_backlinks_since(
    &self,
    user_id: Uuid,
    tier: Tier,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;

  fn latest_backlink(
    &self,
    user_id: Uuid,
    tier: Tier,
  ) -> impl Future<Output = Result<Option<Backlink>, Self::Error>> + Send + '_;

  fn list_backlinks(
    &self,
    query: BacklinkQuery,
  ) -> impl Future<Output = Result<Vec<Backlink>, Self::Error>> + Send + '_;

  /// Store a health-check result. A dead link gets `removed_at` stamped the
  /// first time it is seen dead; a link seen live again has it cleared. The
  /// owning exchange link, if any, mirrors the liveness flags.
  fn record_backlink_health(
    &self,
    backlink_id: Uuid,
    report: HealthReport,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Backlink, Self::Error>> + Send + '_;

  /// Note a health check that failed to produce a result, so the sweep
  /// moves on to other backlinks before retrying this one.
  fn record_backlink_attempt(
    &self,
    backlink_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Module isolation ──────────────────────────────────────────────────

  /// Modules that already use `domain` for `user_id`.
  fn domain_modules(
    &self,
    user_id: Uuid,
    domain: String,
  ) -> impl Future<Output = Result<Vec<Module>, Self::Error>> + Send + '_;

  fn record_domain_usage(
    &self,
    usage: DomainUsage,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Inventory ─────────────────────────────────────────────────────────

  fn insert_inventory(
    &self,
    item: InventoryItem,
  ) -> impl Future<Output = Result<InventoryItem, Self::Error>> + Send + '_;

  fn get_inventory(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<InventoryItem>, Self::Error>> + Send + '_;

  /// Inventory, highest authority first.
  fn list_inventory(
    &self,
    query: InventoryQuery,
  ) -> impl Future<Output = Result<Vec<InventoryItem>, Self::Error>> + Send + '_;

  fn set_inventory_active(
    &self,
    id: Uuid,
    active: bool,
  ) -> impl Future<Output = Result<InventoryItem, Self::Error>> + Send + '_;

  // ── Exchange ──────────────────────────────────────────────────────────

  fn commit_exchange(
    &self,
    commit: ExchangeCommit,
  ) -> impl Future<Output = Result<CommitOutcome, Self::Error>> + Send + '_;

  fn get_exchange_link(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ExchangeLink>, Self::Error>> + Send + '_;

  /// Exchange links, newest first unless the query asks otherwise.
  fn list_exchange_links(
    &self,
    query: ExchangeLinkQuery,
  ) -> impl Future<Output = Result<Vec<ExchangeLink>, Self::Error>> + Send + '_;

  /// Distinct participants that `source` links to through exchange links that
  /// were not clawed back. These are the out-edges of the link graph.
  fn linked_participants(
    &self,
    source: Uuid,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Exchange links between `a` and `b` in either direction that were not
  /// clawed back.
  fn count_connections(
    &self,
    a: Uuid,
    b: Uuid,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;

  /// Apply a settlement decision to a pending link together with the
  /// provider's `earned` or `clawback` transaction. A link that is no longer
  /// pending is left untouched.
  fn settle_exchange_link(
    &self,
    link_id: Uuid,
    decision: SettlementDecision,
    report: HealthReport,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<SettleOutcome, Self::Error>> + Send + '_;

  /// Note a settlement attempt that decided nothing. Links that are no
  /// longer pending are left alone.
  fn record_settlement_attempt(
    &self,
    link_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Ledger ────────────────────────────────────────────────────────────

  fn get_ledger(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Option<Ledger>, Self::Error>> + Send + '_;

  fn list_ledgers(
    &self,
  ) -> impl Future<Output = Result<Vec<Ledger>, Self::Error>> + Send + '_;

  /// Apply entries in order, creating missing ledgers, with one transaction
  /// record per entry. All-or-nothing.
  fn apply_ledger_entries(
    &self,
    entries: Vec<LedgerEntry>,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<LedgerOutcome, Self::Error>> + Send + '_;

  /// Transactions, oldest first.
  fn list_transactions(
    &self,
    query: TransactionQuery,
  ) -> impl Future<Output = Result<Vec<Transaction>, Self::Error>> + Send + '_;

  /// Timestamp of the newest transaction of any of `kinds` for `user_id`.
  fn last_transaction_at(
    &self,
    user_id: Uuid,
    kinds: Vec<TransactionKind>,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;

  // ── Blacklist ─────────────────────────────────────────────────────────

  /// Insert a blacklist row, or extend the expiry of the existing one for
  /// the same pair.
  fn upsert_blacklist(
    &self,
    entry: BlacklistEntry,
  ) -> impl Future<Output = Result<BlacklistEntry, Self::Error>> + Send + '_;

  /// The unexpired entry covering `a` and `b`, if any.
  fn active_blacklist(
    &self,
    a: Uuid,
    b: Uuid,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<BlacklistEntry>, Self::Error>> + Send + '_;

  fn list_blacklist(
    &self,
    participant: Option<Uuid>,
    active_at: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Vec<BlacklistEntry>, Self::Error>> + Send + '_;
}
