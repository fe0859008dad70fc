//! Reward redemption history queries (append-only).

use rusqlite::Connection;
use serde::Serialize;

use cortado_types::{TxHash, WalletAddress};

use crate::Result;

/// A new redemption record to append.
#[derive(Debug, Clone)]
pub struct NewRedemption<'a> {
    pub wallet: &'a WalletAddress,
    pub tx_hash: &'a TxHash,
    pub block_number: Option<u64>,
    pub reward_amount: u32,
    pub created_at: u64,
}

/// A stored redemption record.
#[derive(Debug, Clone, Serialize)]
pub struct RedemptionRow {
    pub tx_hash: String,
    pub wallet_address: String,
    pub block_number: Option<u64>,
    pub reward_amount: u32,
    pub created_at: u64,
}

/// Append a redemption record unless its `tx_hash` is already recorded.
pub fn insert_ignore(conn: &Connection, redemption: &NewRedemption<'_>) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO reward_history
             (tx_hash, wallet_address, block_number, reward_amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            redemption.tx_hash.as_str(),
            redemption.wallet.as_str(),
            redemption.block_number.map(|n| n as i64),
            redemption.reward_amount as i64,
            redemption.created_at as i64,
        ],
    )?;
    Ok(inserted > 0)
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<RedemptionRow> {
    Ok(RedemptionRow {
        tx_hash: row.get(0)?,
        wallet_address: row.get(1)?,
        block_number: row.get::<_, Option<i64>>(2)?.map(|n| n as u64),
        reward_amount: row.get::<_, i64>(3)? as u32,
        created_at: row.get::<_, i64>(4)? as u64,
    })
}

/// List recent redemptions across all wallets, newest first.
pub fn recent(conn: &Connection, limit: u32) -> Result<Vec<RedemptionRow>> {
    let mut stmt = conn.prepare(
        "SELECT tx_hash, wallet_address, block_number, reward_amount, created_at
         FROM reward_history ORDER BY created_at DESC LIMIT ?1",
    )?;

    let rows = stmt
        .query_map([limit], row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// List recent redemptions for one wallet, newest first.
pub fn for_wallet(
    conn: &Connection,
    wallet: &WalletAddress,
    limit: u32,
) -> Result<Vec<RedemptionRow>> {
    let mut stmt = conn.prepare(
        "SELECT tx_hash, wallet_address, block_number, reward_amount, created_at
         FROM reward_history WHERE wallet_address = ?1 ORDER BY created_at DESC LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![wallet.as_str(), limit], row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
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

    fn tx(n: u8) -> TxHash {
        TxHash::parse(&format!("0x{:064x}", n)).expect("test tx hash")
    }

    #[test]
    fn test_insert_and_list() {
        let conn = test_db();
        let w = wallet(1);
        let hash = tx(1);
        let inserted = insert_ignore(
            &conn,
            &NewRedemption {
                wallet: &w,
                tx_hash: &hash,
                block_number: Some(55),
                reward_amount: 1,
                created_at: 1000,
            },
        )
        .expect("insert");
        assert!(inserted);

        let rows = for_wallet(&conn, &w, 10).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reward_amount, 1);
        assert_eq!(rows[0].block_number, Some(55));
    }

    #[test]
    fn test_duplicate_tx_hash_is_noop() {
        let conn = test_db();
        let w = wallet(1);
        let hash = tx(1);
        let redemption = NewRedemption {
            wallet: &w,
            tx_hash: &hash,
            block_number: Some(55),
            reward_amount: 1,
            created_at: 1000,
        };

        assert!(insert_ignore(&conn, &redemption).expect("first insert"));
        assert!(!insert_ignore(&conn, &redemption).expect("duplicate insert"));
        assert_eq!(recent(&conn, 10).expect("list").len(), 1);
    }
}
