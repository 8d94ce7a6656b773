// feedforward-store-sqlite/src/lib.rs
// ============================================================================
// Module: FeedForward SQLite Store
// Description: Durable RunStore backend using SQLite WAL.
// Purpose: Persist every run-scoped and cross-run table behind one
//          connection, selecting strictly by run_id.
// Dependencies: feedforward-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides [`store::SqliteRunStore`], the one concrete
//! implementation of `feedforward_core::interfaces::RunStore` this
//! pipeline uses. Schema is created and migrated on open; every write goes
//! through a mutex-guarded connection driven off the blocking thread pool.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteRunStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;

#[cfg(test)]
mod tests {
    //! Test-only lint relaxations for panic-based assertions and debug output.
    #![allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )]
}
