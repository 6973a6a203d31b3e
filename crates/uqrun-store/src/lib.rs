//! Append-only result tables and their persisted stores.

mod row;
mod store;
mod table;

pub use row::{FailureKind, ResultRow, RowStatus};
pub use store::{load_table, ResultStore, StoreFormat};
pub use table::{ResultTable, Tally, TrainingData};
