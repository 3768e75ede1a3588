pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod session;
