pub mod app;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod output;
pub mod paths;
pub mod recorder;

pub use error::PdcError;
