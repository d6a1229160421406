use super::{uuid_column, Database};
use crate::models::{Token, TokenBalance, Wallet};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const WALLET_COLUMNS: &str = "id, user_id, name, address, is_active, created_at";

fn wallet_from_row(row: &Row<'_>) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        id: row.get(0)?,
        user_id: uuid_column(row, 1)?,
        name: row.get(2)?,
        address: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn balance_from_row(row: &Row<'_>) -> rusqlite::Result<TokenBalance> {
    Ok(TokenBalance {
        wallet_id: row.get(0)?,
        balance: row.get(1)?,
        last_updated_at: row.get(2)?,
        token: Token {
            id: row.get(3)?,
            symbol: row.get(4)?,
            name: row.get(5)?,
            mint_address: row.get(6)?,
            decimals: row.get(7)?,
        },
    })
}

impl Database {
    pub fn create_wallet(&self, user_id: &Uuid, name: &str, address: &str) -> Result<Wallet> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO wallets (user_id, name, address, is_active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
            params![user_id.to_string(), name, address, created_at],
        )
        .context("Failed to insert wallet")?;

        Ok(Wallet {
            id: conn.last_insert_rowid(),
            user_id: *user_id,
            name: name.to_string(),
            address: address.to_string(),
            is_active: true,
            created_at,
        })
    }

    pub fn wallet_by_address(&self, user_id: &Uuid, address: &str) -> Result<Option<Wallet>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ?1 AND address = ?2"
        ))?;
        Ok(stmt
            .query_row(params![user_id.to_string(), address], wallet_from_row)
            .optional()?)
    }

    pub fn list_wallets(&self, user_id: &Uuid) -> Result<Vec<Wallet>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ?1 ORDER BY id"
        ))?;
        let wallets = stmt
            .query_map(params![user_id.to_string()], wallet_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(wallets)
    }

    /// Wallet lookup scoped to its owner
    pub fn get_wallet(&self, user_id: &Uuid, wallet_id: i64) -> Result<Option<Wallet>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = ?1 AND user_id = ?2"
        ))?;
        Ok(stmt
            .query_row(params![wallet_id, user_id.to_string()], wallet_from_row)
            .optional()?)
    }

    /// First active wallet, used as the execution wallet
    pub fn first_active_wallet(&self, user_id: &Uuid) -> Result<Option<Wallet>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ?1 AND is_active = 1 ORDER BY id LIMIT 1"
        ))?;
        Ok(stmt
            .query_row(params![user_id.to_string()], wallet_from_row)
            .optional()?)
    }

    pub fn wallet_balances(&self, wallet_id: i64) -> Result<Vec<TokenBalance>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT b.wallet_id, b.balance, b.last_updated_at,
                    t.id, t.symbol, t.name, t.mint_address, t.decimals
             FROM token_balances b JOIN tokens t ON t.id = b.token_id
             WHERE b.wallet_id = ?1
             ORDER BY t.id",
        )?;
        let balances = stmt
            .query_map(params![wallet_id], balance_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(balances)
    }

    /// Balances across every wallet the user owns
    pub fn user_balances(&self, user_id: &Uuid) -> Result<Vec<TokenBalance>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT b.wallet_id, b.balance, b.last_updated_at,
                    t.id, t.symbol, t.name, t.mint_address, t.decimals
             FROM token_balances b
             JOIN tokens t ON t.id = b.token_id
             JOIN wallets w ON w.id = b.wallet_id
             WHERE w.user_id = ?1
             ORDER BY b.wallet_id, t.id",
        )?;
        let balances = stmt
            .query_map(params![user_id.to_string()], balance_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(balances)
    }

    pub fn upsert_balance(&self, wallet_id: i64, token_id: i64, balance: f64) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO token_balances (wallet_id, token_id, balance, last_updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(wallet_id, token_id)
                 DO UPDATE SET balance = excluded.balance, last_updated_at = excluded.last_updated_at",
                params![wallet_id, token_id, balance, Utc::now()],
            )
            .context("Failed to upsert token balance")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::models::SOL_MINT;
    use crate::storage::test_support::{memory_db, seed_user};

    #[test]
    fn test_wallets_are_scoped_to_owner() {
        let db = memory_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let wallet = db.create_wallet(&alice, "Main", "AliceAddr111").unwrap();
        assert!(wallet.is_active);

        assert!(db.get_wallet(&alice, wallet.id).unwrap().is_some());
        assert!(db.get_wallet(&bob, wallet.id).unwrap().is_none());
        assert!(db.list_wallets(&bob).unwrap().is_empty());
        assert_eq!(db.first_active_wallet(&alice).unwrap().unwrap().id, wallet.id);
    }

    #[test]
    fn test_duplicate_address_per_user_rejected() {
        let db = memory_db();
        let alice = seed_user(&db, "alice");
        db.create_wallet(&alice, "Main", "SameAddr").unwrap();
        assert!(db.create_wallet(&alice, "Again", "SameAddr").is_err());
        assert!(db.wallet_by_address(&alice, "SameAddr").unwrap().is_some());
    }

    #[test]
    fn test_balance_upsert_overwrites() {
        let db = memory_db();
        let alice = seed_user(&db, "alice");
        let wallet = db.create_wallet(&alice, "Main", "AliceAddr111").unwrap();
        let sol = db.token_by_mint(SOL_MINT).unwrap().unwrap();

        db.upsert_balance(wallet.id, sol.id, 1.5).unwrap();
        db.upsert_balance(wallet.id, sol.id, 2.25).unwrap();

        let balances = db.wallet_balances(wallet.id).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].balance, 2.25);
        assert_eq!(balances[0].token.symbol, "SOL");
        assert_eq!(db.user_balances(&alice).unwrap().len(), 1);
    }
}
