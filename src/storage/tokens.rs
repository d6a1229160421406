use super::Database;
use crate::models::{Token, SOL_MINT, USDC_MINT};
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

/// Tokens seeded on first start: (symbol, name, mint, decimals)
const SEED_TOKENS: &[(&str, &str, &str, u8)] = &[
    ("SOL", "Solana", SOL_MINT, 9),
    ("USDC", "USD Coin", USDC_MINT, 6),
    ("BONK", "Bonk", "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", 5),
    ("RAY", "Raydium", "4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R", 6),
    ("JTO", "Jito", "jtojtomepa8beP8AuQc6eXt5FriJwfFMwQx2v2f9mCL", 9),
];

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        symbol: row.get(1)?,
        name: row.get(2)?,
        mint_address: row.get(3)?,
        decimals: row.get(4)?,
    })
}

impl Database {
    pub(super) fn seed_tokens(&self) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO tokens (symbol, name, mint_address, decimals) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (symbol, name, mint, decimals) in SEED_TOKENS {
            stmt.execute(params![symbol, name, mint, decimals])
                .with_context(|| format!("Failed to seed token {}", symbol))?;
        }
        Ok(())
    }

    pub fn list_tokens(&self) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, symbol, name, mint_address, decimals FROM tokens ORDER BY id",
        )?;
        let tokens = stmt
            .query_map([], token_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }

    pub fn token_by_mint(&self, mint: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, symbol, name, mint_address, decimals FROM tokens WHERE mint_address = ?1",
        )?;
        Ok(stmt.query_row(params![mint], token_from_row).optional()?)
    }

    pub fn token_by_id(&self, id: i64) -> Result<Option<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, symbol, name, mint_address, decimals FROM tokens WHERE id = ?1",
        )?;
        Ok(stmt.query_row(params![id], token_from_row).optional()?)
    }
}
