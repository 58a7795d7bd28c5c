/// Shared atomic key/value store holding live question state.
pub mod atomic;
/// Database model definitions.
pub mod models;
/// Durable question definitions and final results.
pub mod poll_store;
/// Storage abstraction layer for database operations.
pub mod storage;
