//! Transactions and their manager

pub mod manager;
pub mod transaction;

pub use manager::TransactionManager;
pub use transaction::{Transaction, TxnState, WriteOrigin};
