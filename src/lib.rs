//! ringrelay - recipe orchestration and ring-based catalog promotion
//!
//! Runs package build recipes in dependency order, imports each new package
//! version exactly once, and moves versions through an ordered sequence of
//! deployment rings under per-ring policy.
//!
//! ```text
//! recipes ─► resolver ─► executor ─► dedup ─► promotion ─► catalog store
//!                           │           │          │
//!                    ProcessorChain  PackageRepository  ValidationHook
//! ```

pub mod clients;
pub mod config;
pub mod dedup;
pub mod executor;
pub mod interfaces;
pub mod model;
pub mod orchestration;
pub mod promotion;
pub mod repository;
pub mod resolver;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod utils;

pub use runtime::Runtime;
