pub mod app;
pub mod assemble;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod features;
pub mod flags;
pub mod genbank;
pub mod llr;
pub mod ncbi;
pub mod normalize;
pub mod output;
pub mod resolve;
pub mod sheet;
pub mod store;
pub mod tools;
