use super::Database;
use crate::models::{OpportunityStatus, PerformancePoint, Trade, TradeStatus};
use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of an execution, ready to persist
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub opportunity_id: i64,
    pub wallet_id: i64,
    pub token_pair: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub amount: f64,
    pub profit_usd: f64,
    pub status: TradeStatus,
    pub tx_hash_buy: Option<String>,
    pub tx_hash_sell: Option<String>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub duration_ms: i64,
}

const TRADE_COLUMNS: &str = "t.id, t.opportunity_id, t.wallet_id, t.token_pair, t.base_mint, t.quote_mint, \
     t.buy_venue, t.sell_venue, t.buy_price, t.sell_price, t.amount, t.profit_usd, t.status, \
     t.tx_hash_buy, t.tx_hash_sell, t.error_message, t.attempts, t.duration_ms, t.created_at";

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        opportunity_id: row.get(1)?,
        wallet_id: row.get(2)?,
        token_pair: row.get(3)?,
        base_mint: row.get(4)?,
        quote_mint: row.get(5)?,
        buy_venue: row.get(6)?,
        sell_venue: row.get(7)?,
        buy_price: row.get(8)?,
        sell_price: row.get(9)?,
        amount: row.get(10)?,
        profit_usd: row.get(11)?,
        status: row.get(12)?,
        tx_hash_buy: row.get(13)?,
        tx_hash_sell: row.get(14)?,
        error_message: row.get(15)?,
        attempts: row.get(16)?,
        duration_ms: row.get(17)?,
        created_at: row.get(18)?,
    })
}

impl Database {
    /// Leave `executing` and record the trade in one transaction.
    ///
    /// Fails (and writes nothing) if the opportunity is not currently executing.
    pub fn finish_execution(&self, user_id: &Uuid, trade: &NewTrade) -> Result<Trade> {
        let final_status = match trade.status {
            TradeStatus::Completed => OpportunityStatus::Completed,
            TradeStatus::Failed => OpportunityStatus::Failed,
        };
        let now = Utc::now();

        let mut conn = self.conn();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let updated = tx.execute(
            "UPDATE opportunities SET status = ?2, error_message = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'executing'",
            params![trade.opportunity_id, final_status, trade.error_message, now],
        )?;
        if updated != 1 {
            bail!("Opportunity {} is not executing", trade.opportunity_id);
        }

        tx.execute(
            "INSERT INTO trades (opportunity_id, wallet_id, token_pair, base_mint, quote_mint, buy_venue,
                sell_venue, buy_price, sell_price, amount, profit_usd, status, tx_hash_buy, tx_hash_sell,
                error_message, attempts, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                trade.opportunity_id,
                trade.wallet_id,
                trade.token_pair,
                trade.base_mint,
                trade.quote_mint,
                trade.buy_venue,
                trade.sell_venue,
                trade.buy_price,
                trade.sell_price,
                trade.amount,
                trade.profit_usd,
                trade.status,
                trade.tx_hash_buy,
                trade.tx_hash_sell,
                trade.error_message,
                trade.attempts,
                trade.duration_ms,
                now,
            ],
        )
        .context("Failed to insert trade")?;
        let id = tx.last_insert_rowid();

        if trade.status == TradeStatus::Completed {
            tx.execute(
                "INSERT INTO performance_metrics (user_id, date, profit_usd, trades_count)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(user_id, date)
                 DO UPDATE SET profit_usd = profit_usd + excluded.profit_usd, trades_count = trades_count + 1",
                params![user_id.to_string(), now.date_naive().to_string(), trade.profit_usd],
            )
            .context("Failed to update performance metrics")?;
        }

        tx.commit().context("Failed to commit execution result")?;

        Ok(Trade {
            id,
            opportunity_id: Some(trade.opportunity_id),
            wallet_id: trade.wallet_id,
            token_pair: trade.token_pair.clone(),
            base_mint: trade.base_mint.clone(),
            quote_mint: trade.quote_mint.clone(),
            buy_venue: trade.buy_venue.clone(),
            sell_venue: trade.sell_venue.clone(),
            buy_price: trade.buy_price,
            sell_price: trade.sell_price,
            amount: trade.amount,
            profit_usd: trade.profit_usd,
            status: trade.status,
            tx_hash_buy: trade.tx_hash_buy.clone(),
            tx_hash_sell: trade.tx_hash_sell.clone(),
            error_message: trade.error_message.clone(),
            attempts: trade.attempts,
            duration_ms: trade.duration_ms,
            created_at: now,
        })
    }

    /// Trades on the user's wallets, newest first
    pub fn list_trades(&self, user_id: &Uuid, limit: Option<usize>) -> Result<Vec<Trade>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades t JOIN wallets w ON w.id = t.wallet_id
             WHERE w.user_id = ?1
             ORDER BY t.created_at DESC, t.id DESC LIMIT ?2"
        ))?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![user_id.to_string(), limit], trade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_trade(&self, user_id: &Uuid, trade_id: i64) -> Result<Option<Trade>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades t JOIN wallets w ON w.id = t.wallet_id
             WHERE w.user_id = ?1 AND t.id = ?2"
        ))?;
        Ok(stmt
            .query_row(params![user_id.to_string(), trade_id], trade_from_row)
            .optional()?)
    }

    /// (completed profit sum, trade count, average execution duration in ms)
    pub fn trade_stats(&self, user_id: &Uuid) -> Result<(f64, i64, f64)> {
        let stats = self.conn().query_row(
            "SELECT COALESCE(SUM(CASE WHEN t.status = 'completed' THEN t.profit_usd ELSE 0 END), 0),
                    COUNT(t.id),
                    COALESCE(AVG(t.duration_ms), 0)
             FROM trades t JOIN wallets w ON w.id = t.wallet_id
             WHERE w.user_id = ?1",
            params![user_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(stats)
    }

    /// Daily series for the last `days` days, oldest first, with empty days zeroed
    pub fn performance_series(&self, user_id: &Uuid, days: i64) -> Result<Vec<PerformancePoint>> {
        let today = Utc::now().date_naive();
        let start = today - Duration::days(days - 1);
        let conn = self.conn();

        let mut metrics: HashMap<NaiveDate, (f64, i64)> = HashMap::new();
        let mut stmt = conn.prepare_cached(
            "SELECT date, profit_usd, trades_count FROM performance_metrics
             WHERE user_id = ?1 AND date >= ?2",
        )?;
        let rows = stmt.query_map(params![user_id.to_string(), start.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (date, profit, trades) = row?;
            if let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") {
                metrics.insert(date, (profit, trades));
            }
        }

        let mut detected: HashMap<NaiveDate, i64> = HashMap::new();
        let mut stmt = conn.prepare_cached(
            "SELECT date(created_at), COUNT(*) FROM opportunities
             WHERE date(created_at) >= ?1 GROUP BY date(created_at)",
        )?;
        let rows = stmt.query_map(params![start.to_string()], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            if let (Some(date), count) = row? {
                if let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") {
                    detected.insert(date, count);
                }
            }
        }

        Ok((0..days)
            .map(|offset| {
                let day = start + Duration::days(offset);
                let (profit, trades) = metrics.get(&day).copied().unwrap_or((0.0, 0));
                PerformancePoint {
                    date: day.format("%m/%d").to_string(),
                    profit,
                    trades,
                    opportunities: detected.get(&day).copied().unwrap_or(0),
                }
            })
            .collect())
    }
}
