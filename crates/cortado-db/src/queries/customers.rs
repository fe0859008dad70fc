//! Customer ledger row queries.
//!
//! One row per wallet, keyed by the lowercase-normalized address. The
//! accrual and redemption layers own all writes to the counter columns;
//! everything else reads.

use rusqlite::Connection;
use serde::Serialize;

use cortado_types::WalletAddress;

use crate::{DbError, Result};

/// A customer loyalty ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerRow {
    pub wallet_address: String,
    pub stamp_count: u32,
    pub pending_rewards: u32,
    pub total_volume: u64,
    pub last_purchase_at: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<CustomerRow> {
    Ok(CustomerRow {
        wallet_address: row.get(0)?,
        stamp_count: row.get::<_, i64>(1)? as u32,
        pending_rewards: row.get::<_, i64>(2)? as u32,
        total_volume: row.get::<_, i64>(3)? as u64,
        last_purchase_at: row.get::<_, i64>(4)? as u64,
        created_at: row.get::<_, i64>(5)? as u64,
        updated_at: row.get::<_, i64>(6)? as u64,
    })
}

/// Load a customer row, or `None` if the wallet has never purchased.
pub fn get_opt(conn: &Connection, wallet: &WalletAddress) -> Result<Option<CustomerRow>> {
    let result = conn.query_row(
        "SELECT wallet_address, stamp_count, pending_rewards, total_volume,
                last_purchase_at, created_at, updated_at
         FROM customers WHERE wallet_address = ?1",
        [wallet.as_str()],
        row_from_sql,
    );
    match result {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::Sqlite(e)),
    }
}

/// Load a customer row.
///
/// # Errors
///
/// - [`DbError::NotFound`] if the wallet has no ledger row
pub fn get(conn: &Connection, wallet: &WalletAddress) -> Result<CustomerRow> {
    get_opt(conn, wallet)?
        .ok_or_else(|| DbError::NotFound(format!("customer '{wallet}'")))
}

/// Write a customer row, creating it on first purchase.
///
/// `created_at` is set on insert and never overwritten afterwards.
pub fn upsert(conn: &Connection, row: &CustomerRow) -> Result<()> {
    conn.execute(
        "INSERT INTO customers (wallet_address, stamp_count, pending_rewards, total_volume,
             last_purchase_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(wallet_address) DO UPDATE SET
             stamp_count = excluded.stamp_count,
             pending_rewards = excluded.pending_rewards,
             total_volume = excluded.total_volume,
             last_purchase_at = excluded.last_purchase_at,
             updated_at = excluded.updated_at",
        rusqlite::params![
            row.wallet_address,
            row.stamp_count as i64,
            row.pending_rewards as i64,
            row.total_volume as i64,
            row.last_purchase_at as i64,
            row.created_at as i64,
            row.updated_at as i64,
        ],
    )?;
    Ok(())
}

/// Consume one pending reward if any is available.
///
/// Single conditional statement, so two concurrent redemptions with one
/// pending reward cannot both succeed. Returns `false` when no reward was
/// pending (no mutation happened).
pub fn decrement_pending_reward(
    conn: &Connection,
    wallet: &WalletAddress,
    now: u64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE customers
         SET pending_rewards = pending_rewards - 1, updated_at = ?1
         WHERE wallet_address = ?2 AND pending_rewards > 0",
        rusqlite::params![now as i64, wallet.as_str()],
    )?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::parse(&format!("0x{:040x}", n)).expect("test wallet")
    }

    fn fresh_row(wallet: &WalletAddress, now: u64) -> CustomerRow {
        CustomerRow {
            wallet_address: wallet.as_str().to_string(),
            stamp_count: 0,
            pending_rewards: 0,
            total_volume: 0,
            last_purchase_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_get_opt_missing() {
        let conn = test_db();
        assert!(get_opt(&conn, &wallet(1)).expect("query").is_none());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let conn = test_db();
        assert!(matches!(get(&conn, &wallet(1)), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_upsert_creates_and_reads_back() {
        let conn = test_db();
        let w = wallet(1);
        let mut row = fresh_row(&w, 1000);
        row.stamp_count = 3;
        row.total_volume = 42;
        upsert(&conn, &row).expect("upsert");

        let loaded = get(&conn, &w).expect("get");
        assert_eq!(loaded, row);
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let conn = test_db();
        let w = wallet(1);
        upsert(&conn, &fresh_row(&w, 1000)).expect("first upsert");

        let mut updated = fresh_row(&w, 2000);
        updated.stamp_count = 5;
        upsert(&conn, &updated).expect("second upsert");

        let loaded = get(&conn, &w).expect("get");
        assert_eq!(loaded.created_at, 1000, "created_at is immutable");
        assert_eq!(loaded.updated_at, 2000);
        assert_eq!(loaded.stamp_count, 5);
    }

    #[test]
    fn test_decrement_pending_reward() {
        let conn = test_db();
        let w = wallet(1);
        let mut row = fresh_row(&w, 1000);
        row.pending_rewards = 1;
        upsert(&conn, &row).expect("upsert");

        assert!(decrement_pending_reward(&conn, &w, 2000).expect("first decrement"));
        let loaded = get(&conn, &w).expect("get");
        assert_eq!(loaded.pending_rewards, 0);
        assert_eq!(loaded.updated_at, 2000);

        // Second decrement finds nothing to consume.
        assert!(!decrement_pending_reward(&conn, &w, 3000).expect("second decrement"));
        assert_eq!(get(&conn, &w).expect("get").updated_at, 2000);
    }

    #[test]
    fn test_decrement_missing_wallet() {
        let conn = test_db();
        assert!(!decrement_pending_reward(&conn, &wallet(9), 1000).expect("decrement"));
    }
}
