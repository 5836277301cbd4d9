//! AIR: nuclear-material accountancy ledger engine.
//!
//! This crate provides:
//! - Typed ledger, MBR, LII, NLI and receipt records built from loose field maps
//! - SHA-256 tamper-evident signatures over canonical record strings
//! - A SQLite ledger store with transactional receipt registration
//! - Running material balances and MUF against the physical inventory
//! - Read-time integrity verification (clean / unsigned / tampered)
//! - Operational vs training database contexts with snapshot backup/restore
//! - A user/role registry and JSON + CSV ledger export
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod balance;
pub mod context;
pub mod records;
pub mod report;
pub mod scenarios;
pub mod signing;
pub mod store;
pub mod users;
pub mod util;
pub mod verify;
