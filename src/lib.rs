pub mod boundary;
pub mod cache;
pub mod compute;
pub mod config;
pub mod convert;
pub mod error;
pub mod graph;
pub mod model;
