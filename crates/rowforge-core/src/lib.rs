//! Core data model shared by the rowforge crates.
//!
//! Rows, field values, row references and the cross-table dependency graph
//! live here so the recipe runtime and its output collaborators agree on a
//! single representation.

pub mod dependency;
pub mod error;
pub mod graph;
pub mod row;
pub mod value;

pub use dependency::Dependency;
pub use error::{Error, Result};
pub use graph::{LoadOrderReport, LoadOrderSummary, build_load_order_report};
pub use row::{Row, RowId};
pub use value::{FieldValue, RowPointer, RowRef};
