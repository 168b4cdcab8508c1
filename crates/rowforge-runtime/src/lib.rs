//! Recipe execution runtime for rowforge.
//!
//! Runs a compiled recipe pass after pass until a stopping criterion is met,
//! issuing per-table identifiers, resolving forward and random references and
//! streaming rows to an [`output::OutputStream`]. Run-chain state can be saved
//! as a continuation and resumed by a later run.

pub mod context;
pub mod continuation;
pub mod engine;
pub mod errors;
pub mod finished;
pub mod globals;
pub mod history;
pub mod ids;
pub mod interpreter;
pub mod model;
pub mod output;
pub mod providers;
pub mod slots;
pub mod transients;
pub mod unique;

pub use continuation::ContinuationSnapshot;
pub use engine::GenerationEngine;
pub use errors::{Result, RuntimeError};
pub use globals::Globals;
pub use history::{ReferenceScope, RowHistory};
pub use ids::IdManager;
pub use model::{ExecutionSummary, GenerateOptions, GenerationReport, TableReport};
pub use output::{
    CsvOutputStream, DebugOutputStream, JsonLinesOutputStream, MemoryOutputStream, OutputError,
    OutputStream,
};
pub use providers::{ProviderContext, ProviderRegistry, ValueProvider};
