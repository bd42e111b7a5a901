//! Offline replay of recorded quotes.
//!
//! - CSV quote loading
//! - A runner driving the bot tick by tick against the paper venue

mod data;
mod runner;

pub use data::{CsvQuoteLoader, QuoteSnapshot};
pub use runner::{ReplayConfig, ReplayRunner, ReplaySummary};
