//! Delivery ledger.
//!
//! Records, per sink, which image fingerprints have been delivered so a
//! restart never re-sends an image. Also keeps a short journal of sync runs
//! for the `status` command.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{DeliveryLedger, RunJournal, SqliteLedger};
pub use error::LedgerError;
pub use types::RunStats;
