//! [`SqliteStore`]: the SQLite implementation of [`LinkStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, Row, types::Value};
use uuid::Uuid;

use linkmesh_core::{
  collab::HealthReport,
  content::{
    Article, Derivative, DerivativeStatus, DistributionStatus, DistributionTask,
    Platform, Site, TaskStatus,
  },
  exchange::{
    BlacklistEntry, ExchangeLink, InventoryItem, SettlementDecision, canonical_pair,
  },
  ledger::{Ledger, LedgerEntry, Transaction, TransactionKind},
  link::{Backlink, DomainUsage, Module},
  store::{
    BacklinkQuery, CommitOutcome, DistributionBatch, ExchangeCommit,
    ExchangeLinkQuery, InventoryQuery, LedgerOutcome, LinkStore, SettleOutcome,
    TaskQuery, TransactionQuery,
  },
  tier::{LinkSettings, Tier},
};

use crate::{
  Error, Result,
  encode::{
    ARTICLE_COLUMNS, BACKLINK_COLUMNS, BLACKLIST_COLUMNS, DERIVATIVE_COLUMNS,
    INVENTORY_COLUMNS, LEDGER_COLUMNS, LINK_COLUMNS, PLATFORM_COLUMNS, SITE_COLUMNS,
    TASK_COLUMNS, TRANSACTION_COLUMNS, article_from_row, backlink_from_row,
    blacklist_from_row, derivative_from_row, encode_dt, encode_opt_dt,
    encode_opt_uuid, encode_uuid, insert_backlink, insert_domain_usage,
    inventory_from_row, ledger_from_row, link_from_row, module_at, platform_from_row,
    site_from_row, task_from_row, transaction_from_row, uuid_at,
  },
  schema::{ADDED_COLUMNS, ADDED_INDEXES, SCHEMA},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A linkmesh store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        for (table, column, decl) in ADDED_COLUMNS {
          add_missing_column(conn, table, column, decl)?;
        }
        conn.execute_batch(ADDED_INDEXES)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The underlying connection, for maintenance queries outside
  /// [`LinkStore`].
  pub fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }
}

fn add_missing_column(
  conn: &Connection,
  table: &str,
  column: &str,
  decl: &str,
) -> rusqlite::Result<()> {
  let present: bool = conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
    rusqlite::params![table, column],
    |r| r.get(0),
  )?;
  if !present {
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
  }
  Ok(())
}

// ─── SQL helpers ─────────────────────────────────────────────────────────────

/// A `WHERE` clause assembled from optional filters. Conditions use anonymous
/// `?` placeholders, bound in push order.
#[derive(Default)]
struct Filter {
  conds:  Vec<&'static str>,
  values: Vec<Value>,
}

impl Filter {
  fn and(&mut self, cond: &'static str, value: impl Into<Value>) {
    self.conds.push(cond);
    self.values.push(value.into());
  }

  fn and_pair(&mut self, cond: &'static str, a: impl Into<Value>, b: impl Into<Value>) {
    self.conds.push(cond);
    self.values.push(a.into());
    self.values.push(b.into());
  }

  fn and_raw(&mut self, cond: &'static str) { self.conds.push(cond); }

  fn clause(&self) -> String {
    if self.conds.is_empty() {
      String::new()
    } else {
      format!("WHERE {}", self.conds.join(" AND "))
    }
  }
}

fn limit_clause(limit: Option<usize>) -> String {
  limit.map(|n| format!("LIMIT {n}")).unwrap_or_default()
}

fn query_all<T>(
  conn: &Connection,
  sql: &str,
  values: &[Value],
  map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt
    .query_map(rusqlite::params_from_iter(values.iter()), map)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

fn query_by_id<T>(
  conn: &Connection,
  sql: &str,
  id: Uuid,
  map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Option<T>> {
  conn
    .query_row(sql, rusqlite::params![encode_uuid(id)], map)
    .optional()
}

fn load_task(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<DistributionTask>> {
  query_by_id(
    conn,
    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
    id,
    task_from_row,
  )
}

fn load_backlink(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<Backlink>> {
  query_by_id(
    conn,
    &format!("SELECT {BACKLINK_COLUMNS} FROM backlinks WHERE backlink_id = ?1"),
    id,
    backlink_from_row,
  )
}

fn load_inventory(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<InventoryItem>> {
  query_by_id(
    conn,
    &format!("SELECT {INVENTORY_COLUMNS} FROM inventory WHERE inventory_id = ?1"),
    id,
    inventory_from_row,
  )
}

fn load_link(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<ExchangeLink>> {
  query_by_id(
    conn,
    &format!("SELECT {LINK_COLUMNS} FROM exchange_links WHERE link_id = ?1"),
    id,
    link_from_row,
  )
}

fn load_ledger(conn: &Connection, user_id: Uuid) -> rusqlite::Result<Option<Ledger>> {
  query_by_id(
    conn,
    &format!("SELECT {LEDGER_COLUMNS} FROM ledgers WHERE user_id = ?1"),
    user_id,
    ledger_from_row,
  )
}

fn insert_derivative(conn: &Connection, d: &Derivative) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT OR IGNORE INTO derivatives ({DERIVATIVE_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
    ),
    rusqlite::params![
      encode_uuid(d.derivative_id),
      encode_uuid(d.article_id),
      encode_uuid(d.user_id),
      d.kind.as_str(),
      d.tier.number(),
      d.title,
      d.body,
      d.excerpt,
      d.anchor_text,
      d.anchor_type.as_str(),
      d.target_url,
      d.target_tier.number(),
      encode_opt_uuid(d.parent_derivative_id),
      d.platform_category,
      d.status.as_str(),
      encode_dt(d.created_at),
    ],
  )?;
  Ok(())
}

/// Insert a task unless one with the same id already exists.
fn insert_task(conn: &Connection, t: &DistributionTask) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO tasks ({TASK_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
       ON CONFLICT(task_id) DO NOTHING"
    ),
    rusqlite::params![
      encode_uuid(t.task_id),
      encode_uuid(t.derivative_id),
      encode_uuid(t.article_id),
      encode_uuid(t.user_id),
      encode_uuid(t.platform_id),
      t.tier.number(),
      encode_dt(t.scheduled_for),
      t.priority,
      t.status.as_str(),
      t.placed_url,
      t.failure_reason,
      encode_dt(t.created_at),
      encode_opt_dt(t.finished_at),
    ],
  )?;
  Ok(())
}

pub(crate) fn insert_link(conn: &Connection, l: &ExchangeLink) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO exchange_links ({LINK_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
    ),
    rusqlite::params![
      encode_uuid(l.link_id),
      encode_uuid(l.requester_id),
      encode_uuid(l.provider_id),
      encode_uuid(l.inventory_id),
      l.page_url,
      l.target_url,
      l.hop_distance,
      l.anchor_text,
      l.anchor_type.as_str(),
      l.credits_awarded,
      l.credits_status.as_str(),
      l.is_live,
      l.is_indexed,
      encode_dt(l.created_at),
      encode_opt_dt(l.settled_at),
    ],
  )?;
  Ok(())
}

fn upsert_blacklist_row(conn: &Connection, e: &BlacklistEntry) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO blacklist ({BLACKLIST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)
       ON CONFLICT(participant_a, participant_b) DO UPDATE SET
         reason     = excluded.reason,
         expires_at = MAX(blacklist.expires_at, excluded.expires_at)"
    ),
    rusqlite::params![
      encode_uuid(e.participant_a),
      encode_uuid(e.participant_b),
      e.reason,
      encode_dt(e.created_at),
      encode_dt(e.expires_at),
    ],
  )?;
  Ok(())
}

fn count_pair(conn: &Connection, a: Uuid, b: Uuid) -> rusqlite::Result<u32> {
  conn.query_row(
    "SELECT COUNT(*) FROM exchange_links
     WHERE ((requester_id = ?1 AND provider_id = ?2)
         OR (requester_id = ?2 AND provider_id = ?1))
       AND credits_status != 'clawedback'",
    rusqlite::params![encode_uuid(a), encode_uuid(b)],
    |r| r.get(0),
  )
}

/// Mirror a health check onto backlink rows matched by `column`.
fn apply_health(
  conn: &Connection,
  column: &'static str,
  id: Uuid,
  report: HealthReport,
  at: DateTime<Utc>,
) -> rusqlite::Result<usize> {
  conn.execute(
    &format!(
      "UPDATE backlinks SET
         is_live         = ?2,
         is_indexed      = ?3,
         last_checked_at = ?4,
         last_attempt_at = ?4,
         removed_at      = CASE WHEN ?2 THEN NULL ELSE COALESCE(removed_at, ?4) END
       WHERE {column} = ?1"
    ),
    rusqlite::params![encode_uuid(id), report.is_live, report.is_indexed, encode_dt(at)],
  )
}

// ─── Ledger application ──────────────────────────────────────────────────────

enum Applied {
  Done { transactions: Vec<Transaction>, skipped: usize },
  Insufficient(Uuid),
}

/// Apply `entries` in order against `conn`, which must be inside a SQLite
/// transaction: on [`Applied::Insufficient`] the caller drops it so nothing
/// persists.
fn apply_entries(
  conn: &Connection,
  entries: &[LedgerEntry],
  at: DateTime<Utc>,
) -> rusqlite::Result<Applied> {
  let at_str = encode_dt(at);
  let mut transactions = Vec::with_capacity(entries.len());
  let mut skipped = 0;

  for entry in entries {
    if let Some(link_id) = entry.related_link_id {
      let exists = conn
        .query_row(
          "SELECT 1 FROM transactions WHERE related_link_id = ?1 AND kind = ?2",
          rusqlite::params![encode_uuid(link_id), entry.kind.as_str()],
          |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
      if exists {
        skipped += 1;
        continue;
      }
    }
    if let Some(key) = &entry.once_key {
      let exists = conn
        .query_row(
          "SELECT 1 FROM transactions WHERE user_id = ?1 AND once_key = ?2",
          rusqlite::params![encode_uuid(entry.user_id), key],
          |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
      if exists {
        skipped += 1;
        continue;
      }
    }

    let ledger = load_ledger(conn, entry.user_id)?
      .unwrap_or_else(|| Ledger::empty(entry.user_id, at));
    let Some(next) = ledger.apply(entry, at) else {
      return Ok(Applied::Insufficient(entry.user_id));
    };

    conn.execute(
      &format!(
        "INSERT INTO ledgers ({LEDGER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_id) DO UPDATE SET
           balance         = excluded.balance,
           pending_credits = excluded.pending_credits,
           lifetime_earned = excluded.lifetime_earned,
           lifetime_spent  = excluded.lifetime_spent,
           updated_at      = excluded.updated_at"
      ),
      rusqlite::params![
        encode_uuid(next.user_id),
        next.balance,
        next.pending_credits,
        next.lifetime_earned,
        next.lifetime_spent,
        encode_dt(next.created_at),
        encode_dt(next.updated_at),
      ],
    )?;

    let tx = Transaction {
      transaction_id:       Uuid::new_v4(),
      user_id:              entry.user_id,
      kind:                 entry.kind,
      amount:               entry.amount,
      balance_after:        next.balance,
      pending_after:        next.pending_credits,
      reason:               entry.reason.clone(),
      related_link_id:      entry.related_link_id,
      related_inventory_id: entry.related_inventory_id,
      created_at:           at,
    };
    conn.execute(
      &format!(
        "INSERT INTO transactions ({TRANSACTION_COLUMNS}, once_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
      ),
      rusqlite::params![
        encode_uuid(tx.transaction_id),
        encode_uuid(tx.user_id),
        tx.kind.as_str(),
        tx.amount,
        tx.balance_after,
        tx.pending_after,
        tx.reason,
        encode_opt_uuid(tx.related_link_id),
        encode_opt_uuid(tx.related_inventory_id),
        at_str,
        entry.once_key,
      ],
    )?;
    transactions.push(tx);
  }

  Ok(Applied::Done { transactions, skipped })
}

// ─── LinkStore impl ──────────────────────────────────────────────────────────

impl LinkStore for SqliteStore {
  type Error = Error;

  // ── Catalog ───────────────────────────────────────────────────────────

  async fn insert_site(&self, site: Site) -> Result<Site> {
    let row = site.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!("INSERT INTO sites ({SITE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
          rusqlite::params![
            encode_uuid(row.site_id),
            encode_uuid(row.user_id),
            row.name,
            row.domain,
            encode_dt(row.created_at),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(site)
  }

  async fn get_site(&self, id: Uuid) -> Result<Option<Site>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(query_by_id(
            conn,
            &format!("SELECT {SITE_COLUMNS} FROM sites WHERE site_id = ?1"),
            id,
            site_from_row,
          )?)
        })
        .await?,
    )
  }

  async fn insert_article(&self, article: Article) -> Result<Article> {
    let keywords = serde_json::to_string(&article.secondary_keywords)?;
    let row = article.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO articles ({ARTICLE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
          ),
          rusqlite::params![
            encode_uuid(row.article_id),
            encode_uuid(row.site_id),
            encode_uuid(row.user_id),
            row.title,
            row.body,
            row.primary_keyword,
            keywords,
            row.target_url,
            row.distribution_status.as_str(),
            encode_dt(row.created_at),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(article)
  }

  async fn get_article(&self, id: Uuid) -> Result<Option<Article>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(query_by_id(
            conn,
            &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE article_id = ?1"),
            id,
            article_from_row,
          )?)
        })
        .await?,
    )
  }

  async fn set_article_status(&self, id: Uuid, status: DistributionStatus) -> Result<()> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE articles SET distribution_status = ?2 WHERE article_id = ?1",
          rusqlite::params![encode_uuid(id), status.as_str()],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::NotFound { entity: "article", id });
    }
    Ok(())
  }

  async fn upsert_platform(&self, platform: Platform) -> Result<Platform> {
    let row = platform.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO platforms ({PLATFORM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(platform_id) DO UPDATE SET
               name      = excluded.name,
               url       = excluded.url,
               tier      = excluded.tier,
               category  = excluded.category,
               authority = excluded.authority,
               active    = excluded.active"
          ),
          rusqlite::params![
            encode_uuid(row.platform_id),
            row.name,
            row.url,
            row.tier.number(),
            row.category,
            row.authority,
            row.active,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(platform)
  }

  async fn list_platforms(&self, tier: Option<Tier>, active_only: bool) -> Result<Vec<Platform>> {
    let mut filter = Filter::default();
    if let Some(t) = tier {
      filter.and("tier = ?", i64::from(t.number()));
    }
    if active_only {
      filter.and_raw("active = 1");
    }

    Ok(
      self
        .conn
        .call(move |conn| {
          let sql = format!(
            "SELECT {PLATFORM_COLUMNS} FROM platforms {}
             ORDER BY authority DESC, name ASC",
            filter.clause()
          );
          Ok(query_all(conn, &sql, &filter.values, platform_from_row)?)
        })
        .await?,
    )
  }

  // ── Settings ──────────────────────────────────────────────────────────

  async fn get_settings(&self, user_id: Uuid) -> Result<Option<LinkSettings>> {
    let json: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT settings_json FROM link_settings WHERE user_id = ?1",
              rusqlite::params![encode_uuid(user_id)],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(json.map(|s| serde_json::from_str(&s)).transpose()?)
  }

  async fn put_settings(&self, user_id: Uuid, settings: LinkSettings) -> Result<()> {
    let json = serde_json::to_string(&settings)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO link_settings (user_id, settings_json) VALUES (?1, ?2)
           ON CONFLICT(user_id) DO UPDATE SET settings_json = excluded.settings_json",
          rusqlite::params![encode_uuid(user_id), json],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Distribution ──────────────────────────────────────────────────────

  async fn record_distribution(&self, batch: DistributionBatch) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for d in &batch.derivatives {
          insert_derivative(&tx, d)?;
        }
        for t in &batch.tasks {
          insert_task(&tx, t)?;
        }
        for u in &batch.usages {
          insert_domain_usage(&tx, u)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_derivative(&self, id: Uuid) -> Result<Option<Derivative>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(query_by_id(
            conn,
            &format!("SELECT {DERIVATIVE_COLUMNS} FROM derivatives WHERE derivative_id = ?1"),
            id,
            derivative_from_row,
          )?)
        })
        .await?,
    )
  }

  async fn list_derivatives(&self, article_id: Uuid) -> Result<Vec<Derivative>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let sql = format!(
            "SELECT {DERIVATIVE_COLUMNS} FROM derivatives WHERE article_id = ?
             ORDER BY tier ASC, created_at ASC, rowid ASC"
          );
          Ok(query_all(
            conn,
            &sql,
            &[Value::from(encode_uuid(article_id))],
            derivative_from_row,
          )?)
        })
        .await?,
    )
  }

  async fn get_task(&self, id: Uuid) -> Result<Option<DistributionTask>> {
    Ok(self.conn.call(move |conn| Ok(load_task(conn, id)?)).await?)
  }

  async fn list_tasks(&self, query: TaskQuery) -> Result<Vec<DistributionTask>> {
    let mut filter = Filter::default();
    if let Some(u) = query.user_id {
      filter.and("user_id = ?", encode_uuid(u));
    }
    if let Some(a) = query.article_id {
      filter.and("article_id = ?", encode_uuid(a));
    }
    if let Some(s) = query.status {
      filter.and("status = ?", s.as_str().to_owned());
    }
    if let Some(due) = query.due_before {
      filter.and("scheduled_for <= ?", encode_dt(due));
    }
    let limit = limit_clause(query.limit);

    Ok(
      self
        .conn
        .call(move |conn| {
          let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {}
             ORDER BY scheduled_for ASC, priority DESC, rowid ASC {limit}",
            filter.clause()
          );
          Ok(query_all(conn, &sql, &filter.values, task_from_row)?)
        })
        .await?,
    )
  }

  async fn complete_task(
    &self,
    task_id: Uuid,
    placed_url: String,
    backlink: Backlink,
    at: DateTime<Utc>,
  ) -> Result<DistributionTask> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(mut task) = load_task(&tx, task_id)? else {
          return Ok(Err(Error::NotFound { entity: "task", id: task_id }));
        };
        if task.status.is_terminal() {
          return Ok(Err(Error::InvalidTransition(format!(
            "task {task_id} is already {}",
            task.status.as_str()
          ))));
        }

        tx.execute(
          "UPDATE tasks SET status = ?2, placed_url = ?3, finished_at = ?4 WHERE task_id = ?1",
          rusqlite::params![
            encode_uuid(task_id),
            TaskStatus::Completed.as_str(),
            placed_url,
            encode_dt(at),
          ],
        )?;
        tx.execute(
          "UPDATE derivatives SET status = ?2 WHERE derivative_id = ?1",
          rusqlite::params![
            encode_uuid(task.derivative_id),
            DerivativeStatus::Placed.as_str(),
          ],
        )?;
        insert_backlink(&tx, &backlink)?;
        tx.commit()?;

        task.status = TaskStatus::Completed;
        task.placed_url = Some(placed_url);
        task.finished_at = Some(at);
        Ok(Ok(task))
      })
      .await?
  }

  async fn fail_task(
    &self,
    task_id: Uuid,
    reason: String,
    at: DateTime<Utc>,
  ) -> Result<DistributionTask> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(mut task) = load_task(&tx, task_id)? else {
          return Ok(Err(Error::NotFound { entity: "task", id: task_id }));
        };
        if task.status.is_terminal() {
          return Ok(Err(Error::InvalidTransition(format!(
            "task {task_id} is already {}",
            task.status.as_str()
          ))));
        }

        tx.execute(
          "UPDATE tasks SET status = ?2, failure_reason = ?3, finished_at = ?4
           WHERE task_id = ?1",
          rusqlite::params![
            encode_uuid(task_id),
            TaskStatus::Failed.as_str(),
            reason,
            encode_dt(at),
          ],
        )?;
        tx.execute(
          "UPDATE derivatives SET status = ?2 WHERE derivative_id = ?1",
          rusqlite::params![
            encode_uuid(task.derivative_id),
            DerivativeStatus::Failed.as_str(),
          ],
        )?;
        tx.commit()?;

        task.status = TaskStatus::Failed;
        task.failure_reason = Some(reason);
        task.finished_at = Some(at);
        Ok(Ok(task))
      })
      .await?
  }

  // ── Backlinks ─────────────────────────────────────────────────────────

  async fn insert_backlink(&self, backlink: Backlink) -> Result<Backlink> {
    let row = backlink.clone();
    self
      .conn
      .call(move |conn| {
        insert_backlink(conn, &row)?;
        Ok(())
      })
      .await?;
    Ok(backlink)
  }

  async fn count_backlinks_since(
    &self,
    user_id: Uuid,
    tier: Tier,
    since: DateTime<Utc>,
  ) -> Result<u32> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(conn.query_row(
            "SELECT COUNT(*) FROM backlinks
             WHERE user_id = ?1 AND tier = ?2 AND created_at >= ?3",
            rusqlite::params![encode_uuid(user_id), tier.number(), encode_dt(since)],
            |r| r.get(0),
          )?)
        })
        .await?,
    )
  }

  async fn latest_backlink(&self, user_id: Uuid, tier: Tier) -> Result<Option<Backlink>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                &format!(
                  "SELECT {BACKLINK_COLUMNS} FROM backlinks
                   WHERE user_id = ?1 AND tier = ?2
                   ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                rusqlite::params![encode_uuid(user_id), tier.number()],
                backlink_from_row,
              )
              .optional()?,
          )
        })
        .await?,
    )
  }

  async fn list_backlinks(&self, query: BacklinkQuery) -> Result<Vec<Backlink>> {
    let mut filter = Filter::default();
    if let Some(u) = query.user_id {
      filter.and("user_id = ?", encode_uuid(u));
    }
    if let Some(m) = query.module {
      filter.and("module = ?", m.as_str().to_owned());
    }
    if let Some(t) = query.tier {
      filter.and("tier = ?", i64::from(t.number()));
    }
    if let Some(after) = query.created_after {
      filter.and("created_at >= ?", encode_dt(after));
    }
    if query.live_only {
      filter.and_raw("removed_at IS NULL");
    }
    let order = if query.stalest_first {
      "COALESCE(last_attempt_at, last_checked_at, '') ASC, created_at ASC"
    } else {
      "created_at DESC, rowid DESC"
    };
    let limit = limit_clause(query.limit);

    Ok(
      self
        .conn
        .call(move |conn| {
          let sql = format!(
            "SELECT {BACKLINK_COLUMNS} FROM backlinks {} ORDER BY {order} {limit}",
            filter.clause()
          );
          Ok(query_all(conn, &sql, &filter.values, backlink_from_row)?)
        })
        .await?,
    )
  }

  async fn record_backlink_health(
    &self,
    backlink_id: Uuid,
    report: HealthReport,
    at: DateTime<Utc>,
  ) -> Result<Backlink> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if apply_health(&tx, "backlink_id", backlink_id, report, at)? == 0 {
          return Ok(Err(Error::NotFound { entity: "backlink", id: backlink_id }));
        }
        let Some(backlink) = load_backlink(&tx, backlink_id)? else {
          return Ok(Err(Error::NotFound { entity: "backlink", id: backlink_id }));
        };
        if let Some(link_id) = backlink.exchange_link_id {
          tx.execute(
            "UPDATE exchange_links SET is_live = ?2, is_indexed = ?3 WHERE link_id = ?1",
            rusqlite::params![encode_uuid(link_id), report.is_live, report.is_indexed],
          )?;
        }
        tx.commit()?;
        Ok(Ok(backlink))
      })
      .await?
  }

  async fn record_backlink_attempt(&self, backlink_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE backlinks SET last_attempt_at = ?2 WHERE backlink_id = ?1",
          rusqlite::params![encode_uuid(backlink_id), encode_dt(at)],
        )?)
      })
      .await?;
    if updated == 0 {
      return Err(Error::NotFound { entity: "backlink", id: backlink_id });
    }
    Ok(())
  }

  // ── Module isolation ──────────────────────────────────────────────────

  async fn domain_modules(&self, user_id: Uuid, domain: String) -> Result<Vec<Module>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(query_all(
            conn,
            "SELECT module FROM domain_usage WHERE user_id = ? AND domain = ?
             ORDER BY module",
            &[Value::from(encode_uuid(user_id)), Value::from(domain)],
            |row| module_at(row, 0),
          )?)
        })
        .await?,
    )
  }

  async fn record_domain_usage(&self, usage: DomainUsage) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        insert_domain_usage(conn, &usage)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Inventory ─────────────────────────────────────────────────────────

  async fn insert_inventory(&self, item: InventoryItem) -> Result<InventoryItem> {
    let row = item.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO inventory ({INVENTORY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
          ),
          rusqlite::params![
            encode_uuid(row.inventory_id),
            encode_uuid(row.owner_id),
            row.domain,
            row.page_url,
            row.authority,
            row.quality_score,
            row.risk_score,
            row.tier.number(),
            row.credits_per_link,
            row.max_outbound_links,
            row.current_outbound_links,
            row.active,
            encode_dt(row.created_at),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(item)
  }

  async fn get_inventory(&self, id: Uuid) -> Result<Option<InventoryItem>> {
    Ok(self.conn.call(move |conn| Ok(load_inventory(conn, id)?)).await?)
  }

  async fn list_inventory(&self, query: InventoryQuery) -> Result<Vec<InventoryItem>> {
    let mut filter = Filter::default();
    if let Some(o) = query.owner_id {
      filter.and("owner_id = ?", encode_uuid(o));
    }
    if let Some(o) = query.exclude_owner {
      filter.and("owner_id != ?", encode_uuid(o));
    }
    if let Some(a) = query.min_authority {
      filter.and("authority >= ?", i64::from(a));
    }
    if let Some(t) = query.tier {
      filter.and("tier = ?", i64::from(t.number()));
    }
    if query.with_capacity {
      filter.and_raw("active = 1 AND current_outbound_links < max_outbound_links");
    }
    let limit = limit_clause(query.limit);

    Ok(
      self
        .conn
        .call(move |conn| {
          let sql = format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory {}
             ORDER BY authority DESC, created_at ASC {limit}",
            filter.clause()
          );
          Ok(query_all(conn, &sql, &filter.values, inventory_from_row)?)
        })
        .await?,
    )
  }

  async fn set_inventory_active(&self, id: Uuid, active: bool) -> Result<InventoryItem> {
    let item = self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE inventory SET active = ?2 WHERE inventory_id = ?1",
          rusqlite::params![encode_uuid(id), active],
        )?;
        Ok(load_inventory(conn, id)?)
      })
      .await?;
    item.ok_or(Error::NotFound { entity: "inventory item", id })
  }

  // ── Exchange ──────────────────────────────────────────────────────────

  async fn commit_exchange(&self, commit: ExchangeCommit) -> Result<CommitOutcome> {
    let at = commit.link.created_at;

    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let link = commit.link;
          let required = commit.requester_debit.amount.abs();

          let available = load_ledger(&tx, link.requester_id)?
            .map(|l| l.balance)
            .unwrap_or(0);
          if available < required {
            return Ok(CommitOutcome::InsufficientBalance { required, available });
          }

          let reserved = tx.execute(
            "UPDATE inventory SET current_outbound_links = current_outbound_links + 1
             WHERE inventory_id = ?1 AND active = 1
               AND current_outbound_links < max_outbound_links",
            rusqlite::params![encode_uuid(link.inventory_id)],
          )?;
          if reserved == 0 {
            return Ok(CommitOutcome::CapacityExhausted);
          }

          insert_link(&tx, &link)?;
          insert_backlink(&tx, &commit.backlink)?;
          insert_domain_usage(&tx, &commit.usage)?;

          let entries = [commit.requester_debit, commit.provider_credit];
          if let Applied::Insufficient(_) = apply_entries(&tx, &entries, at)? {
            return Ok(CommitOutcome::InsufficientBalance { required, available });
          }

          let connections = count_pair(&tx, link.requester_id, link.provider_id)?;
          let blacklisted = connections >= commit.pair_limit.max_connections;
          if blacklisted {
            upsert_blacklist_row(
              &tx,
              &BlacklistEntry::new(
                link.requester_id,
                link.provider_id,
                commit.pair_limit.reason,
                at,
                commit.pair_limit.blacklist_until,
              ),
            )?;
          }

          let requester_balance = load_ledger(&tx, link.requester_id)?
            .map(|l| l.balance)
            .unwrap_or(0);
          let provider_pending = load_ledger(&tx, link.provider_id)?
            .map(|l| l.pending_credits)
            .unwrap_or(0);

          tx.commit()?;
          Ok(CommitOutcome::Committed {
            link,
            requester_balance,
            provider_pending,
            blacklisted,
          })
        })
        .await?,
    )
  }

  async fn get_exchange_link(&self, id: Uuid) -> Result<Option<ExchangeLink>> {
    Ok(self.conn.call(move |conn| Ok(load_link(conn, id)?)).await?)
  }

  async fn list_exchange_links(&self, query: ExchangeLinkQuery) -> Result<Vec<ExchangeLink>> {
    let mut filter = Filter::default();
    if let Some(p) = query.participant {
      filter.and_pair(
        "(requester_id = ? OR provider_id = ?)",
        encode_uuid(p),
        encode_uuid(p),
      );
    }
    if let Some(r) = query.requester_id {
      filter.and("requester_id = ?", encode_uuid(r));
    }
    if let Some(p) = query.provider_id {
      filter.and("provider_id = ?", encode_uuid(p));
    }
    if let Some(s) = query.status {
      filter.and("credits_status = ?", s.as_str().to_owned());
    }
    if let Some(after) = query.created_after {
      filter.and("created_at >= ?", encode_dt(after));
    }
    if let Some(before) = query.created_before {
      filter.and("created_at <= ?", encode_dt(before));
    }
    let order = if query.least_attempted_first {
      "COALESCE(last_attempt_at, '') ASC, created_at ASC, rowid ASC"
    } else if query.oldest_first {
      "created_at ASC, rowid ASC"
    } else {
      "created_at DESC, rowid DESC"
    };
    let limit = limit_clause(query.limit);

    Ok(
      self
        .conn
        .call(move |conn| {
          let sql = format!(
            "SELECT {LINK_COLUMNS} FROM exchange_links {} ORDER BY {order} {limit}",
            filter.clause()
          );
          Ok(query_all(conn, &sql, &filter.values, link_from_row)?)
        })
        .await?,
    )
  }

  async fn linked_participants(&self, source: Uuid) -> Result<Vec<Uuid>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(query_all(
            conn,
            "SELECT DISTINCT requester_id FROM exchange_links
             WHERE provider_id = ? AND credits_status != 'clawedback'",
            &[Value::from(encode_uuid(source))],
            |row| uuid_at(row, 0),
          )?)
        })
        .await?,
    )
  }

  async fn count_connections(&self, a: Uuid, b: Uuid) -> Result<u32> {
    Ok(self.conn.call(move |conn| Ok(count_pair(conn, a, b)?)).await?)
  }

  async fn record_settlement_attempt(&self, link_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE exchange_links SET last_attempt_at = ?2
           WHERE link_id = ?1 AND credits_status = 'pending'",
          rusqlite::params![encode_uuid(link_id), encode_dt(at)],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn settle_exchange_link(
    &self,
    link_id: Uuid,
    decision: SettlementDecision,
    report: HealthReport,
    at: DateTime<Utc>,
  ) -> Result<SettleOutcome> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(mut link) = load_link(&tx, link_id)? else {
          return Ok(Ok(SettleOutcome::NotFound));
        };
        let Some(next) = link.credits_status.settle(decision) else {
          return Ok(Ok(SettleOutcome::AlreadySettled(link.credits_status)));
        };

        let (entry, kind) = match decision {
          SettlementDecision::Award => (
            LedgerEntry::earn(link.provider_id, link.credits_awarded, "link verified live"),
            TransactionKind::Earned,
          ),
          SettlementDecision::Clawback => (
            LedgerEntry::clawback(
              link.provider_id,
              link.credits_awarded,
              "link not live at settlement",
            ),
            TransactionKind::Clawback,
          ),
        };
        let entry = entry.for_link(link_id).for_inventory(link.inventory_id);

        let transaction = match apply_entries(&tx, &[entry], at)? {
          Applied::Done { mut transactions, .. } if !transactions.is_empty() => {
            transactions.remove(0)
          }
          Applied::Done { .. } => {
            // Already recorded by an earlier, interrupted settlement.
            let existing = tx
              .query_row(
                &format!(
                  "SELECT {TRANSACTION_COLUMNS} FROM transactions
                   WHERE related_link_id = ?1 AND kind = ?2"
                ),
                rusqlite::params![encode_uuid(link_id), kind.as_str()],
                transaction_from_row,
              )
              .optional()?;
            match existing {
              Some(t) => t,
              None => {
                return Ok(Err(Error::InvalidTransition(format!(
                  "link {link_id} has no {} transaction",
                  kind.as_str()
                ))));
              }
            }
          }
          Applied::Insufficient(user) => {
            return Ok(Err(Error::InvalidTransition(format!(
              "ledger {user} has too few pending credits to settle link {link_id}"
            ))));
          }
        };

        tx.execute(
          "UPDATE exchange_links
           SET credits_status = ?2, settled_at = ?3, is_live = ?4, is_indexed = ?5
           WHERE link_id = ?1",
          rusqlite::params![
            encode_uuid(link_id),
            next.as_str(),
            encode_dt(at),
            report.is_live,
            report.is_indexed,
          ],
        )?;
        apply_health(&tx, "exchange_link_id", link_id, report, at)?;
        tx.commit()?;

        link.credits_status = next;
        link.settled_at = Some(at);
        link.is_live = report.is_live;
        link.is_indexed = report.is_indexed;
        Ok(Ok(SettleOutcome::Settled { link, transaction }))
      })
      .await?
  }

  // ── Ledger ────────────────────────────────────────────────────────────

  async fn get_ledger(&self, user_id: Uuid) -> Result<Option<Ledger>> {
    Ok(self.conn.call(move |conn| Ok(load_ledger(conn, user_id)?)).await?)
  }

  async fn list_ledgers(&self) -> Result<Vec<Ledger>> {
    Ok(
      self
        .conn
        .call(|conn| {
          Ok(query_all(
            conn,
            &format!("SELECT {LEDGER_COLUMNS} FROM ledgers ORDER BY created_at ASC"),
            &[],
            ledger_from_row,
          )?)
        })
        .await?,
    )
  }

  async fn apply_ledger_entries(
    &self,
    entries: Vec<LedgerEntry>,
    at: DateTime<Utc>,
  ) -> Result<LedgerOutcome> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          match apply_entries(&tx, &entries, at)? {
            Applied::Done { transactions, skipped } => {
              tx.commit()?;
              Ok(LedgerOutcome::Applied { transactions, skipped })
            }
            Applied::Insufficient(user_id) => Ok(LedgerOutcome::Insufficient { user_id }),
          }
        })
        .await?,
    )
  }

  async fn list_transactions(&self, query: TransactionQuery) -> Result<Vec<Transaction>> {
    let mut filter = Filter::default();
    if let Some(u) = query.user_id {
      filter.and("user_id = ?", encode_uuid(u));
    }
    if let Some(k) = query.kind {
      filter.and("kind = ?", k.as_str().to_owned());
    }
    if let Some(l) = query.related_link_id {
      filter.and("related_link_id = ?", encode_uuid(l));
    }
    let limit = limit_clause(query.limit);

    Ok(
      self
        .conn
        .call(move |conn| {
          let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions {}
             ORDER BY created_at ASC, rowid ASC {limit}",
            filter.clause()
          );
          Ok(query_all(conn, &sql, &filter.values, transaction_from_row)?)
        })
        .await?,
    )
  }

  async fn last_transaction_at(
    &self,
    user_id: Uuid,
    kinds: Vec<TransactionKind>,
  ) -> Result<Option<DateTime<Utc>>> {
    let latest: Option<String> = self
      .conn
      .call(move |conn| {
        let mut latest: Option<String> = None;
        for kind in kinds {
          let at: Option<String> = conn.query_row(
            "SELECT MAX(created_at) FROM transactions WHERE user_id = ?1 AND kind = ?2",
            rusqlite::params![encode_uuid(user_id), kind.as_str()],
            |r| r.get(0),
          )?;
          latest = latest.max(at);
        }
        Ok(latest)
      })
      .await?;

    latest
      .map(|s| {
        DateTime::parse_from_rfc3339(&s)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| Error::DateParse(e.to_string()))
      })
      .transpose()
  }

  // ── Blacklist ─────────────────────────────────────────────────────────

  async fn upsert_blacklist(&self, entry: BlacklistEntry) -> Result<BlacklistEntry> {
    let (a, b) = canonical_pair(entry.participant_a, entry.participant_b);
    let stored = self
      .conn
      .call(move |conn| {
        let entry = BlacklistEntry { participant_a: a, participant_b: b, ..entry };
        upsert_blacklist_row(conn, &entry)?;
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {BLACKLIST_COLUMNS} FROM blacklist
                 WHERE participant_a = ?1 AND participant_b = ?2"
              ),
              rusqlite::params![encode_uuid(a), encode_uuid(b)],
              blacklist_from_row,
            )
            .optional()?,
        )
      })
      .await?;
    stored.ok_or(Error::NotFound { entity: "blacklist entry", id: a })
  }

  async fn active_blacklist(
    &self,
    a: Uuid,
    b: Uuid,
    now: DateTime<Utc>,
  ) -> Result<Option<BlacklistEntry>> {
    let (a, b) = canonical_pair(a, b);
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                &format!(
                  "SELECT {BLACKLIST_COLUMNS} FROM blacklist
                   WHERE participant_a = ?1 AND participant_b = ?2 AND expires_at > ?3"
                ),
                rusqlite::params![encode_uuid(a), encode_uuid(b), encode_dt(now)],
                blacklist_from_row,
              )
              .optional()?,
          )
        })
        .await?,
    )
  }

  async fn list_blacklist(
    &self,
    participant: Option<Uuid>,
    active_at: Option<DateTime<Utc>>,
  ) -> Result<Vec<BlacklistEntry>> {
    let mut filter = Filter::default();
    if let Some(p) = participant {
      filter.and_pair(
        "(participant_a = ? OR participant_b = ?)",
        encode_uuid(p),
        encode_uuid(p),
      );
    }
    if let Some(now) = active_at {
      filter.and("expires_at > ?", encode_dt(now));
    }

    Ok(
      self
        .conn
        .call(move |conn| {
          let sql = format!(
            "SELECT {BLACKLIST_COLUMNS} FROM blacklist {} ORDER BY created_at DESC",
            filter.clause()
          );
          Ok(query_all(conn, &sql, &filter.values, blacklist_from_row)?)
        })
        .await?,
    )
  }
}
