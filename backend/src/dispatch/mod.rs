//! Dispatch domain module
//!
//! Matching engine: geo-indexed candidate search, scored ranking, offer
//! fan-out, and race-free acceptance resolution.

mod model;
mod service;
mod sweeper;

pub use model::*;
pub use service::{DispatchConfig, DispatchService};
pub use sweeper::{run_offer_sweeper, sweep_once};
