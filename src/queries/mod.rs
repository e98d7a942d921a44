//! SQL text builders, one module per table. Values are inlined and escaped by sea-query.

pub mod app_state;
pub mod categories;
pub mod collections;
pub mod crawl_log;
pub mod ddl;
pub mod history;
pub mod tracks;
