//! ClickHouse-backed search index over email records.

#![warn(clippy::unwrap_used)]

pub mod index;
pub mod logger;
pub mod row;

pub use index::ClickHouseEmailIndex;
pub use logger::IndexWriter;
