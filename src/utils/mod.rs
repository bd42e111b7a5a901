//! Shared utilities.

pub mod decimal;

pub use decimal::{
    from_f64, is_multiple_of, round_down_to_lot, round_down_to_tick, round_to_tick,
    round_up_to_tick, to_f64,
};
