// src/retry/mod.rs

//! Memory-scaling retries.
//!
//! A node whose current attempt looks memory-exhausted is resubmitted with
//! its memory request multiplied by `memory_multiplier`, until either
//! `number_of_retries` resubmissions were spent or the request reached
//! `memory_limit`.

pub mod controller;
pub mod ledger;

pub use controller::{next_memory_request, RetryAction, RetryController};
pub use ledger::{LedgerEntry, RetryLedger};
