//! AquaMon: pool water-quality monitoring.
//!
//! Readings (pH, free chlorine, temperature) are classified against each
//! pool's configured bands; out-of-band readings mail the pool owner, subject
//! to a per-subscriber notification throttle.

pub mod alert;
pub mod audit;
pub mod config;
pub mod identity;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod pools;
pub mod store;
