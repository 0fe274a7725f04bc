use log::{debug, warn};
use parking_lot::Mutex;

use std::sync::Arc;

use super::chain::Blockchain;
use super::transaction::{Transaction, TransactionError};

/// Pending transactions waiting to be mined
#[derive(Debug, Clone)]
pub struct TransactionPool {
    /// Source of confirmed balances
    blockchain: Blockchain,

    /// Admitted transactions, in submission order
    transactions: Arc<Mutex<Vec<Transaction>>>,
}

impl TransactionPool {
    /// Creates an empty pool validating against `blockchain`
    pub fn new(blockchain: Blockchain) -> Self {
        TransactionPool {
            blockchain,
            transactions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Adds a transaction to the pool
    ///
    /// The sender must cover amount plus fee out of their confirmed balance
    /// minus whatever they already have pending here. A transaction already
    /// pending or already mined is rejected as a duplicate.
    ///
    /// # Returns
    ///
    /// Result indicating success or why the transaction was rejected.
    /// Rejected transactions leave the pool untouched.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<(), TransactionError> {
        let result = self.admit(transaction);
        if let Err(err) = &result {
            warn!("Rejected transaction: {}", err);
        }
        result
    }

    fn admit(&self, transaction: Transaction) -> Result<(), TransactionError> {
        let transfer = match &transaction {
            Transaction::Transfer(transfer) => transfer,
            Transaction::Reward(_) => return Err(TransactionError::RewardNotAllowed),
        };

        transfer.validate()?;
        let id = transaction.id();

        // Held across the balance check so concurrent submissions see each other
        let mut pending = self.transactions.lock();

        let already_pending = pending.iter().any(|queued| queued.id() == id);
        if already_pending || self.blockchain.contains_transaction(&id) {
            return Err(TransactionError::Duplicate(id));
        }

        let pending_debits: f64 = pending
            .iter()
            .filter_map(|queued| match queued {
                Transaction::Transfer(queued) if queued.sender() == transfer.sender() => {
                    Some(queued.total_debit())
                }
                _ => None,
            })
            .sum();

        let available = self.blockchain.get_balance(transfer.sender()) - pending_debits;
        let required = transfer.total_debit();
        if required > available {
            return Err(TransactionError::InsufficientFunds {
                required,
                available,
            });
        }

        debug!(
            "Admitted transaction {} from {} ({} pending)",
            id,
            transfer.sender(),
            pending.len() + 1
        );
        pending.push(transaction);

        Ok(())
    }

    /// Gets a snapshot of the pending transactions
    pub fn get_transactions(&self) -> Vec<Transaction> {
        self.transactions.lock().clone()
    }

    /// Removes every pending transaction
    pub fn clear_transactions(&self) {
        self.transactions.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.transactions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.lock().is_empty()
    }
}
