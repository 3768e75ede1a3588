mod database;
mod ledger_repo;
mod settings;

#[cfg(test)]
mod tests;

pub use database::Database;
pub use ledger_repo::LedgerRepo;
pub use settings::{Settings, SettingsStore};
