// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trial quota and cost estimation for Nanolab.
//!
//! This crate provides:
//! - **Quota table**: billing buckets, manual/auto limits, the trial gate
//! - **Quota ledger**: daily usage over a blob store with UTC rollover,
//!   cooldown, reservation and refund
//! - **Quota service**: a single-writer task serializing ledger access
//! - **Pricing**: per-resolution cost estimates

pub mod ledger;
pub mod pricing;
pub mod quota;
pub mod service;

pub use ledger::{
    ModeStatus, QuotaDecision, QuotaDenial, QuotaEntry, QuotaLedger, QuotaStatus, QuotaUsage,
};
pub use pricing::{estimate_cost, format_cost, pricing_table, CostEstimate};
pub use quota::{is_trial_mode, mode_key, ModeLimit, QuotaTable};
pub use service::{QuotaHandle, QuotaService};
