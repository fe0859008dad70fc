//! SQL schema definitions.

/// Complete schema for cortado v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Customer loyalty ledger
-- ============================================================

CREATE TABLE IF NOT EXISTS customers (
    wallet_address TEXT PRIMARY KEY,
    stamp_count INTEGER NOT NULL DEFAULT 0 CHECK (stamp_count >= 0),
    pending_rewards INTEGER NOT NULL DEFAULT 0 CHECK (pending_rewards >= 0),
    total_volume INTEGER NOT NULL DEFAULT 0 CHECK (total_volume >= 0),
    last_purchase_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Purchase & reward history (append-only)
-- ============================================================

CREATE TABLE IF NOT EXISTS purchase_history (
    tx_hash TEXT PRIMARY KEY,
    wallet_address TEXT NOT NULL,
    block_number INTEGER,
    price INTEGER NOT NULL,
    product_id TEXT,
    product_name TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_purchase_wallet ON purchase_history(wallet_address);
CREATE INDEX IF NOT EXISTS idx_purchase_created ON purchase_history(created_at);

CREATE TABLE IF NOT EXISTS reward_history (
    tx_hash TEXT PRIMARY KEY,
    wallet_address TEXT NOT NULL,
    block_number INTEGER,
    reward_amount INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reward_wallet ON reward_history(wallet_address);

-- ============================================================
-- Settings
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
