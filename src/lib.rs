//! # CAPM Bot
//!
//! Computes a CAPM-optimal portfolio each tick, rebalances toward it with
//! reactive orders, and makes markets around fair value in the last minutes
//! of a trading session.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `venue`: Execution venue trait, shared types and an in-memory paper venue
//! - `portfolio`: Price history, risk estimate and CAPM optimizer
//! - `risk`: Position tracking and pre-trade order validation
//! - `strategy`: Rebalancing, quoting and the per-tick decision engine
//! - `bot`: Tick driver connecting the venue to the decision core
//! - `replay`: CSV quote replay against the paper venue
//! - `utils`: Shared utilities and decimal arithmetic

pub mod bot;
pub mod config;
pub mod portfolio;
pub mod replay;
pub mod risk;
pub mod strategy;
pub mod utils;
pub mod venue;

pub use bot::CapmBot;
pub use config::Config;
