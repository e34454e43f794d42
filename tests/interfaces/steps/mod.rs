//! Cucumber step definitions for interface tests.

pub mod catalog_store;
