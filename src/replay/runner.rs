//! Drives the bot over recorded quotes against the paper venue.

use super::data::CsvQuoteLoader;
use crate::bot::{BotStats, CapmBot, TickReport};
use crate::config::Config;
use crate::venue::{HoldingsVector, PaperVenue, SecurityClass, SecurityId};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Replay parameters.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Starting cash
    pub initial_cash: Decimal,
    /// Session length from the first quote
    pub session_minutes: i64,
    /// Seconds between ticks
    pub tick_secs: i64,
    /// Keep every tick report in the result
    pub keep_reports: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::new(10_000, 0),
            session_minutes: 20,
            tick_secs: 5,
            keep_reports: false,
        }
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_cash: Decimal,
    pub final_cash: Decimal,
    pub final_holdings: HoldingsVector,
    /// Cash plus holdings at the last mid prices
    pub final_wealth: Decimal,
    pub pnl: Decimal,
    pub stats: BotStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<TickReport>,
}

impl ReplaySummary {
    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Replay {} → {}\n\
             Cash:        {} → {}\n\
             Wealth:      {} (PnL {})\n\
             Ticks:       {} ({} aborted)\n\
             Orders:      {} rebalance, {} market-make, {} rejected\n\
             Fills:       {}   Cancels: {}\n",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%H:%M:%S"),
            self.initial_cash,
            self.final_cash.round_dp(2),
            self.final_wealth.round_dp(2),
            self.pnl.round_dp(2),
            self.stats.ticks,
            self.stats.aborted_ticks,
            self.stats.rebalance_orders,
            self.stats.market_make_orders,
            self.stats.rejected_orders,
            self.stats.fills,
            self.stats.cancels,
        );
        for (id, qty) in self.final_holdings.iter() {
            if !qty.is_zero() {
                out.push_str(&format!("  {:<12} {}\n", id.to_string(), qty));
            }
        }
        out
    }
}

/// Replays recorded quotes through the bot.
pub struct ReplayRunner {
    loader: CsvQuoteLoader,
    config: Config,
    replay: ReplayConfig,
}

impl ReplayRunner {
    pub fn new(loader: CsvQuoteLoader, config: Config, replay: ReplayConfig) -> Self {
        Self {
            loader,
            config,
            replay,
        }
    }

    pub async fn run(&self) -> Result<ReplaySummary> {
        let snapshots = self.loader.snapshots();
        let first = snapshots.first().context("No quotes to replay")?;
        anyhow::ensure!(self.replay.tick_secs > 0, "tick_secs must be positive");

        let start = first.timestamp;
        let end = start + Duration::minutes(self.replay.session_minutes);
        let step = Duration::seconds(self.replay.tick_secs);

        let listings = first
            .quotes
            .iter()
            .map(|(id, quote)| (id.clone(), classify(id), *quote))
            .collect();
        let (venue, events) = PaperVenue::new(self.replay.initial_cash, listings, start);
        let venue = Arc::new(venue);
        venue.open_session(end).await;

        let mut bot = CapmBot::new(venue.clone(), events, self.config.clone());
        let mut reports = Vec::new();
        let mut next = 1;
        let mut now = start;

        info!(
            start = %start,
            end = %end,
            snapshots = snapshots.len(),
            cash = %self.replay.initial_cash,
            "Starting replay"
        );

        while now <= end {
            while next < snapshots.len() && snapshots[next].timestamp <= now {
                venue.update_market(snapshots[next].quotes.clone()).await;
                next += 1;
            }
            venue.set_time(now).await;

            let report = bot.on_tick(now).await;
            if self.replay.keep_reports {
                reports.push(report);
            }
            now += step;
        }

        let state = venue.get_state().await;
        let prices: BTreeMap<SecurityId, Decimal> = state
            .securities
            .iter()
            .map(|(id, security)| (id.clone(), security.quote.mid()))
            .collect();
        let final_wealth = state.cash + state.holdings.value_at(&prices);

        info!(
            final_cash = %state.cash,
            final_wealth = %final_wealth,
            fills = state.fill_count,
            "Replay finished"
        );

        Ok(ReplaySummary {
            start,
            end,
            initial_cash: self.replay.initial_cash,
            final_cash: state.cash,
            final_holdings: state.holdings,
            final_wealth,
            pnl: final_wealth - self.replay.initial_cash,
            stats: bot.stats().clone(),
            reports,
        })
    }
}

/// ETFs are recognised by name, everything else trades as a stock.
fn classify(id: &SecurityId) -> SecurityClass {
    if id.as_str().to_ascii_uppercase().contains("ETF") {
        SecurityClass::Etf
    } else {
        SecurityClass::Stock
    }
}
