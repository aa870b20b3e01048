#![doc = "wikidraft-core: core logic library for wikidraft."]

//! This crate contains the data model and pipeline for drafting wiki entries
//! from GitHub activity: repository scanning, change detection, the
//! processing ledger, LLM provider clients with retry and fallback, and the
//! writers for reviewed entries.
//!
//! # Usage
//! The `wikidraft` binary crate wires concrete clients into [`pipeline::Pipeline`].
//! Tests substitute the mockable traits in [`contract`], [`provider`] and [`generate`].

pub mod contract;
pub mod detect;
pub mod error;
pub mod generate;
pub mod literal;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod scan;
pub mod state;
