//! # hashkv
//!
//! An embedded, file-backed key-value store with:
//! - A persistent on-disk hash table with chained index records
//! - Reuse of deleted key and payload slots through a free list
//! - Multi-process (and multi-handle) safety through advisory byte-range locks
//! - Sequential iteration in physical file order
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Database                               │
//! │        (fetch / store / delete / rewind / next)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Chain    │─────────▶│  Free List  │
//!   │  Resolver   │          │  Allocator  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────────────────────────────┐      ┌─────────────┐
//!   │   Index File  (header, hash table,  │      │  Data File  │
//!   │   free list, index records)         │      │   (heap)    │
//!   └─────────────────┬───────────────────┘      └─────────────┘
//!                     │
//!                     ▼
//!              ┌─────────────┐
//!              │ Range Locks │
//!              │  (fcntl)    │
//!              └─────────────┘
//! ```

#[cfg(not(unix))]
compile_error!("hashkv needs fcntl(2) byte-range locks and only builds on Unix targets");

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod lock;
pub mod index;
pub mod data;
pub mod engine;

mod fileio;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{HashKvError, Result};
pub use config::Config;
pub use engine::{drop_database, Database, Records, Stats, StoreMode};
pub use index::{DATA_MAX, KEY_MAX};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of hashkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
