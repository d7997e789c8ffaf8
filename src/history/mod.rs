// src/history/mod.rs

pub mod loads;
pub mod table_history;

pub use loads::{load_key, LoadRow};
pub use table_history::{HistoryRow, TableHistory};
