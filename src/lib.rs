//! Market Map Updater Library
//!
//! Generates an oracle market map from provider quote data, merges it into
//! the on-chain map and computes the upserts needed to get there.

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod marketmap;
pub mod merge;
pub mod persistence;
pub mod retry;
pub mod sniff;
pub mod store;
pub mod types;
pub mod upsert;
