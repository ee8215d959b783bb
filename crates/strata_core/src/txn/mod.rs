//! Transactions: staged state and the serializable commit protocol.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{StagedWrite, Transaction, TransactionState};
