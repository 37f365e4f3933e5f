/// Persistence module
///
/// This module handles everything that outlives a single processing pass:
/// - The SQLite spot store, schema and write modes (store.rs)
/// - Row structures shared between segmentation and the database (data.rs)

pub mod data;
pub mod store;

pub use data::SpotRecord;
pub use store::SpotStore;
