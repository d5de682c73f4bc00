//! quantd: strategy execution engine for OKX
//!
//! A supervisor daemon reconciles persisted desired state against
//! per-strategy OS processes; each process hosts one strategy runtime bound
//! to a live broker. The same runtime replays deterministically against a
//! simulated broker for backtests.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
