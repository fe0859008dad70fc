//! Purchase history queries (append-only).

use rusqlite::Connection;
use serde::Serialize;

use cortado_types::{Product, TxHash, WalletAddress};

use crate::Result;

/// A new purchase record to append.
#[derive(Debug, Clone)]
pub struct NewPurchase<'a> {
    pub wallet: &'a WalletAddress,
    pub tx_hash: &'a TxHash,
    pub block_number: Option<u64>,
    /// Price paid in micro-tokens.
    pub price: u64,
    /// Absent for stamp-only transactions.
    pub product: Option<&'a Product>,
    pub created_at: u64,
}

/// A stored purchase record.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseRow {
    pub tx_hash: String,
    pub wallet_address: String,
    pub block_number: Option<u64>,
    pub price: u64,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub created_at: u64,
}

/// Append a purchase record unless its `tx_hash` is already recorded.
///
/// Returns `true` when a new row was inserted, `false` when the hash was a
/// duplicate. The duplicate case is the idempotency no-op, not an error.
pub fn insert_ignore(conn: &Connection, purchase: &NewPurchase<'_>) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO purchase_history
             (tx_hash, wallet_address, block_number, price, product_id, product_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            purchase.tx_hash.as_str(),
            purchase.wallet.as_str(),
            purchase.block_number.map(|n| n as i64),
            purchase.price as i64,
            purchase.product.map(|p| p.id.as_str()),
            purchase.product.map(|p| p.name.as_str()),
            purchase.created_at as i64,
        ],
    )?;
    Ok(inserted > 0)
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<PurchaseRow> {
    Ok(PurchaseRow {
        tx_hash: row.get(0)?,
        wallet_address: row.get(1)?,
        block_number: row.get::<_, Option<i64>>(2)?.map(|n| n as u64),
        price: row.get::<_, i64>(3)? as u64,
        product_id: row.get(4)?,
        product_name: row.get(5)?,
        created_at: row.get::<_, i64>(6)? as u64,
    })
}

/// List recent purchases across all wallets, newest first.
pub fn recent(conn: &Connection, limit: u32) -> Result<Vec<PurchaseRow>> {
    let mut stmt = conn.prepare(
        "SELECT tx_hash, wallet_address, block_number, price, product_id, product_name, created_at
         FROM purchase_history ORDER BY created_at DESC LIMIT ?1",
    )?;

    let rows = stmt
        .query_map([limit], row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// List recent purchases for one wallet, newest first.
pub fn for_wallet(
    conn: &Connection,
    wallet: &WalletAddress,
    limit: u32,
) -> Result<Vec<PurchaseRow>> {
    let mut stmt = conn.prepare(
        "SELECT tx_hash, wallet_address, block_number, price, product_id, product_name, created_at
         FROM purchase_history WHERE wallet_address = ?1 ORDER BY created_at DESC LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![wallet.as_str(), limit], row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
