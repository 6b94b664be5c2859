//! SQL schema for the linkmesh SQLite store.
//!
//! Executed once at connection startup, followed by [`ADDED_COLUMNS`] and
//! [`ADDED_INDEXES`] for stores created before those columns existed.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Catalog ──────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS sites (
    site_id     TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    domain      TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS articles (
    article_id          TEXT PRIMARY KEY,
    site_id             TEXT NOT NULL REFERENCES sites(site_id),
    user_id             TEXT NOT NULL,
    title               TEXT NOT NULL,
    body                TEXT NOT NULL,
    primary_keyword     TEXT NOT NULL,
    secondary_keywords  TEXT NOT NULL DEFAULT '[]',   -- JSON array
    target_url          TEXT NOT NULL,
    distribution_status TEXT NOT NULL DEFAULT 'not_started',
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS platforms (
    platform_id TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    url         TEXT NOT NULL,
    tier        INTEGER NOT NULL CHECK (tier BETWEEN 1 AND 3),
    category    TEXT NOT NULL,
    authority   INTEGER NOT NULL,
    active      INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS link_settings (
    user_id       TEXT PRIMARY KEY,
    settings_json TEXT NOT NULL
);

-- ── Distribution ─────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS derivatives (
    derivative_id        TEXT PRIMARY KEY,
    article_id           TEXT NOT NULL REFERENCES articles(article_id),
    user_id              TEXT NOT NULL,
    kind                 TEXT NOT NULL,
    tier                 INTEGER NOT NULL,
    title                TEXT NOT NULL,
    body                 TEXT NOT NULL,
    excerpt              TEXT NOT NULL,
    anchor_text          TEXT NOT NULL,
    anchor_type          TEXT NOT NULL,
    target_url           TEXT,             -- NULL for tier-3 derivatives
    target_tier          INTEGER NOT NULL,
    parent_derivative_id TEXT,
    platform_category    TEXT NOT NULL,
    status               TEXT NOT NULL,
    created_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    task_id        TEXT PRIMARY KEY,
    derivative_id  TEXT NOT NULL REFERENCES derivatives(derivative_id),
    article_id     TEXT NOT NULL,
    user_id        TEXT NOT NULL,
    platform_id    TEXT NOT NULL REFERENCES platforms(platform_id),
    tier           INTEGER NOT NULL,
    scheduled_for  TEXT NOT NULL,
    priority       INTEGER NOT NULL,
    status         TEXT NOT NULL,
    placed_url     TEXT,
    failure_reason TEXT,
    created_at     TEXT NOT NULL,
    finished_at    TEXT
);

-- ── Backlinks ────────────────────────────────────────────────────────────

-- Append-only apart from the health columns.
CREATE TABLE IF NOT EXISTS backlinks (
    backlink_id      TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    module           TEXT NOT NULL,
    tier             INTEGER NOT NULL,
    source_url       TEXT NOT NULL,
    source_domain    TEXT NOT NULL,
    target_url       TEXT NOT NULL,
    anchor_text      TEXT NOT NULL,
    anchor_type      TEXT NOT NULL,
    is_live          INTEGER NOT NULL,
    is_indexed       INTEGER NOT NULL,
    created_at       TEXT NOT NULL,
    last_checked_at  TEXT,
    last_attempt_at  TEXT,             -- any check, successful or not
    removed_at       TEXT,
    task_id          TEXT,
    exchange_link_id TEXT
);

CREATE TABLE IF NOT EXISTS domain_usage (
    user_id       TEXT NOT NULL,
    domain        TEXT NOT NULL,
    module        TEXT NOT NULL,
    first_used_at TEXT NOT NULL,
    PRIMARY KEY (user_id, domain, module)
);

-- ── Exchange ─────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS inventory (
    inventory_id           TEXT PRIMARY KEY,
    owner_id               TEXT NOT NULL,
    domain                 TEXT NOT NULL,
    page_url               TEXT NOT NULL,
    authority              INTEGER NOT NULL,
    quality_score          REAL NOT NULL,
    risk_score             REAL NOT NULL,
    tier                   INTEGER NOT NULL,
    credits_per_link       INTEGER NOT NULL,
    max_outbound_links     INTEGER NOT NULL,
    current_outbound_links INTEGER NOT NULL DEFAULT 0,
    active                 INTEGER NOT NULL DEFAULT 1,
    created_at             TEXT NOT NULL,
    CHECK (current_outbound_links <= max_outbound_links)
);

CREATE TABLE IF NOT EXISTS exchange_links (
    link_id         TEXT PRIMARY KEY,
    requester_id    TEXT NOT NULL,
    provider_id     TEXT NOT NULL,
    inventory_id    TEXT NOT NULL REFERENCES inventory(inventory_id),
    page_url        TEXT NOT NULL,
    target_url      TEXT NOT NULL,
    hop_distance    INTEGER NOT NULL,
    anchor_text     TEXT NOT NULL,
    anchor_type     TEXT NOT NULL,
    credits_awarded INTEGER NOT NULL,
    credits_status  TEXT NOT NULL,   -- 'pending' | 'awarded' | 'clawedback'
    is_live         INTEGER NOT NULL,
    is_indexed      INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    settled_at      TEXT,
    last_attempt_at TEXT               -- last settlement check that decided nothing
);

CREATE TABLE IF NOT EXISTS blacklist (
    participant_a TEXT NOT NULL,
    participant_b TEXT NOT NULL,
    reason        TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    expires_at    TEXT NOT NULL,
    PRIMARY KEY (participant_a, participant_b),
    CHECK (participant_a < participant_b)
);

-- ── Ledger ───────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS ledgers (
    user_id         TEXT PRIMARY KEY,
    balance         INTEGER NOT NULL CHECK (balance >= 0),
    pending_credits INTEGER NOT NULL CHECK (pending_credits >= 0),
    lifetime_earned INTEGER NOT NULL,
    lifetime_spent  INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

-- Strictly append-only.
CREATE TABLE IF NOT EXISTS transactions (
    transaction_id       TEXT PRIMARY KEY,
    user_id              TEXT NOT NULL,
    kind                 TEXT NOT NULL,
    amount               INTEGER NOT NULL,   -- signed
    balance_after        INTEGER NOT NULL,
    pending_after        INTEGER NOT NULL,
    reason               TEXT NOT NULL,
    related_link_id      TEXT,
    related_inventory_id TEXT,
    created_at           TEXT NOT NULL,
    once_key             TEXT
);

-- One transaction of each kind per exchange link.
CREATE UNIQUE INDEX IF NOT EXISTS transactions_link_kind_idx
    ON transactions(related_link_id, kind) WHERE related_link_id IS NOT NULL;

CREATE INDEX IF NOT EXISTS articles_user_idx       ON articles(user_id);
CREATE INDEX IF NOT EXISTS derivatives_article_idx ON derivatives(article_id);
CREATE INDEX IF NOT EXISTS tasks_schedule_idx      ON tasks(status, scheduled_for);
CREATE INDEX IF NOT EXISTS tasks_article_idx       ON tasks(article_id);
CREATE INDEX IF NOT EXISTS backlinks_user_tier_idx ON backlinks(user_id, tier, created_at);
CREATE INDEX IF NOT EXISTS inventory_owner_idx     ON inventory(owner_id);
CREATE INDEX IF NOT EXISTS links_requester_idx     ON exchange_links(requester_id);
CREATE INDEX IF NOT EXISTS links_provider_idx      ON exchange_links(provider_id);
CREATE INDEX IF NOT EXISTS links_status_idx        ON exchange_links(credits_status, created_at);
CREATE INDEX IF NOT EXISTS transactions_user_idx   ON transactions(user_id, created_at);

PRAGMA user_version = 2;
";

/// Columns added after version 1, as `(table, column, declaration)`.
/// Added on open to stores that predate them.
pub const ADDED_COLUMNS: [(&str, &str, &str); 3] = [
  ("backlinks", "last_attempt_at", "TEXT"),
  ("exchange_links", "last_attempt_at", "TEXT"),
  ("transactions", "once_key", "TEXT"),
];

/// Indexes over [`ADDED_COLUMNS`], created once those exist.
pub const ADDED_INDEXES: &str = "
CREATE UNIQUE INDEX IF NOT EXISTS transactions_once_idx
    ON transactions(user_id, once_key) WHERE once_key IS NOT NULL;
";
