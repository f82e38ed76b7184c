//! Payment domain module
//!
//! Idempotent payment pipeline over the mock PSP.

mod model;
mod psp;
mod service;

pub use model::*;
pub use psp::{MockPsp, PspOutcome};
pub use service::PaymentService;
