//! Interface tests for catalog store backends using Cucumber.
//!
//! Every backend must satisfy the same contract. Select one via environment
//! variable:
//!
//! ```bash
//! # In-memory (default)
//! cargo test --test interfaces
//!
//! # SQLite
//! CATALOG_BACKEND=sqlite cargo test --test interfaces --features sqlite
//! ```

mod backend;
mod steps;

use cucumber::World;
use steps::catalog_store::CatalogStoreWorld;

#[tokio::main]
async fn main() {
    println!("\n=== Running CatalogStore Interface Tests ===\n");
    CatalogStoreWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/catalog_store.feature")
        .await;
}
