//! Read access to the precomputed synaptic link table.
//!
//! `LinkStore` is the only way the rest of the workspace sees raw links.
//! `PgLinkStore` reads Postgres; `MemoryLinkStore` serves tests and offline use.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryLinkStore;
pub use postgres::PgLinkStore;
pub use store::{cluster_offsets, LinkStore};
