//! Theme-filtered sync of CSV distributions from a dataset catalog manifest.
//!
//! Records whose theme matches are downloaded only when their `modified` stamp
//! is newer than the one recorded in the download ledger. Each download gets its
//! header row normalized and lands in `<data>/<id>/<id>_<timestamp>.csv`.

pub mod app;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod normalize;
pub mod output;
pub mod store;
