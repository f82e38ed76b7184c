//! Rider domain module

mod service;

pub use service::RiderService;
