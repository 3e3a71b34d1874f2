//! Billing ledger & referential-integrity engine for a small law practice.
//!
//! The crate exposes an in-process API: the presentation layer constructs a
//! [`config::Config`] once at startup, opens a backend through
//! [`db::connect_from_config`], and calls the operations in [`ledger`]. All
//! business failures come back as typed [`error::LedgerError`] values.

pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod ledger;
