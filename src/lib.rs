#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod crawl;
pub mod document;
pub mod error;
pub mod extract;
pub mod formats;
pub mod logging;
pub mod normalize;
pub mod sink;
pub mod transport;
