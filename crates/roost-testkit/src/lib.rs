//! Test support for roost stores.
//!
//! - [`generators`]: seeded vectors, record fields and proptest strategies
//! - [`fault_injection`]: damage index files the way crashes and bad disks do
//! - [`fixtures`]: build session / aggregate directory trees
//!
//! # Usage
//!
//! ```ignore
//! use roost_testkit::{fixtures::TreeBuilder, generators::random_vectors};
//!
//! let tmp = tempfile::TempDir::new()?;
//! let tree = TreeBuilder::new(tmp.path())
//!     .session("site1", &random_vectors(10, 8, 1))
//!     .aggregate("")
//!     .build()?;
//! ```

pub mod fault_injection;
pub mod fixtures;
pub mod generators;

pub use fault_injection::IndexFault;
pub use fixtures::{BuiltTree, TreeBuilder};
pub use generators::{record_fields, random_vectors, unit_metadata, vector_strategy};
