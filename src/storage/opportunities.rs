use super::Database;
use crate::models::{Opportunity, OpportunityStatus, PairKey, SpreadCandidate};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

pub(super) const OPPORTUNITY_COLUMNS: &str = "id, token_pair, base_mint, quote_mint, buy_venue, sell_venue, \
     buy_price, sell_price, price_diff_percent, net_spread_percent, potential_profit_usd, \
     status, error_message, created_at, updated_at";

pub(super) fn opportunity_from_row(row: &Row<'_>) -> rusqlite::Result<Opportunity> {
    Ok(Opportunity {
        id: row.get(0)?,
        token_pair: row.get(1)?,
        base_mint: row.get(2)?,
        quote_mint: row.get(3)?,
        buy_venue: row.get(4)?,
        sell_venue: row.get(5)?,
        buy_price: row.get(6)?,
        sell_price: row.get(7)?,
        price_diff_percent: row.get(8)?,
        net_spread_percent: row.get(9)?,
        potential_profit_usd: row.get(10)?,
        status: row.get(11)?,
        error_message: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl Database {
    pub fn insert_opportunity(&self, candidate: &SpreadCandidate) -> Result<Opportunity> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO opportunities (token_pair, base_mint, quote_mint, buy_venue, sell_venue,
                buy_price, sell_price, price_diff_percent, net_spread_percent, potential_profit_usd,
                status, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12, ?12)",
            params![
                candidate.symbol,
                candidate.pair.input_mint,
                candidate.pair.output_mint,
                candidate.buy_venue,
                candidate.sell_venue,
                candidate.buy_price,
                candidate.sell_price,
                candidate.price_diff_percent,
                candidate.net_spread_percent,
                candidate.potential_profit_usd,
                OpportunityStatus::Active,
                now,
            ],
        )
        .context("Failed to insert opportunity")?;

        Ok(Opportunity {
            id: conn.last_insert_rowid(),
            token_pair: candidate.symbol.clone(),
            base_mint: candidate.pair.input_mint.clone(),
            quote_mint: candidate.pair.output_mint.clone(),
            buy_venue: candidate.buy_venue.clone(),
            sell_venue: candidate.sell_venue.clone(),
            buy_price: candidate.buy_price,
            sell_price: candidate.sell_price,
            price_diff_percent: candidate.price_diff_percent,
            net_spread_percent: candidate.net_spread_percent,
            potential_profit_usd: candidate.potential_profit_usd,
            status: OpportunityStatus::Active,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrite prices and venues of an opportunity that is still active.
    /// Returns `None` when it has left `active` in the meantime.
    pub fn refresh_opportunity(&self, id: i64, candidate: &SpreadCandidate) -> Result<Option<Opportunity>> {
        let updated = self
            .conn()
            .execute(
                "UPDATE opportunities SET buy_venue = ?2, sell_venue = ?3, buy_price = ?4, sell_price = ?5,
                    price_diff_percent = ?6, net_spread_percent = ?7, potential_profit_usd = ?8, updated_at = ?9
                 WHERE id = ?1 AND status = 'active'",
                params![
                    id,
                    candidate.buy_venue,
                    candidate.sell_venue,
                    candidate.buy_price,
                    candidate.sell_price,
                    candidate.price_diff_percent,
                    candidate.net_spread_percent,
                    candidate.potential_profit_usd,
                    Utc::now(),
                ],
            )
            .context("Failed to refresh opportunity")?;

        if updated == 0 {
            return Ok(None);
        }
        self.get_opportunity(id)
    }

    pub fn get_opportunity(&self, id: i64) -> Result<Option<Opportunity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE id = ?1"
        ))?;
        Ok(stmt.query_row(params![id], opportunity_from_row).optional()?)
    }

    /// Latest non-terminal opportunity for a pair (active or executing)
    pub fn live_opportunity_for_pair(&self, pair: &PairKey) -> Result<Option<Opportunity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities
             WHERE base_mint = ?1 AND quote_mint = ?2 AND status IN ('active', 'executing')
             ORDER BY id DESC LIMIT 1"
        ))?;
        Ok(stmt
            .query_row(params![pair.input_mint, pair.output_mint], opportunity_from_row)
            .optional()?)
    }

    /// Active opportunities, widest gross spread first
    pub fn list_active_opportunities(&self) -> Result<Vec<Opportunity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities
             WHERE status = 'active'
             ORDER BY price_diff_percent DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], opportunity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recently detected active opportunities
    pub fn recent_active_opportunities(&self, limit: usize) -> Result<Vec<Opportunity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities
             WHERE status = 'active'
             ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], opportunity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_active_opportunities(&self) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM opportunities WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?)
    }

    /// Conditional status change. Returns false when the row was not in `from`.
    pub fn transition_opportunity(
        &self,
        id: i64,
        from: OpportunityStatus,
        to: OpportunityStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let updated = self
            .conn()
            .execute(
                "UPDATE opportunities SET status = ?3, error_message = COALESCE(?4, error_message), updated_at = ?5
                 WHERE id = ?1 AND status = ?2",
                params![id, from, to, error_message, Utc::now()],
            )
            .context("Failed to update opportunity status")?;
        Ok(updated == 1)
    }
}
