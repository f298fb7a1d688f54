pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod output;
pub mod parsers;
pub mod plan;
pub mod upload;
