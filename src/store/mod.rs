//! Durable record of services and probe outcomes.
//!
//! The store is behind the [`Repository`] trait so the pipeline can run
//! against Postgres in production and an in-memory implementation in tests.
//! The pivotal operation is [`Repository::claim_due_services`]: a single
//! transaction that selects due rows with skip-locked semantics and advances
//! their `next_run_at`, which is what lets several schedulers run
//! concurrently without duplicate claims.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;
pub use repository::Repository;
