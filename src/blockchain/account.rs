use std::collections::HashMap;

use super::block::Block;
use super::crypto::PublicKey;
use super::transaction::{Transaction, TransactionError};

/// Account balances derived by replaying transactions in order.
///
/// Nothing here is cached across calls; every view starts from zero and
/// replays the blocks it is given.
#[derive(Debug, Clone, Default)]
pub struct Balances {
    balances: HashMap<PublicKey, f64>,
}

impl Balances {
    /// Creates an empty ledger where every account holds zero
    pub fn new() -> Self {
        Balances::default()
    }

    /// Replays every transaction of every block, in block order
    pub fn replay<'a, I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = &'a Block>,
    {
        let mut balances = Balances::new();
        for block in blocks {
            for transaction in block.transactions() {
                balances.apply(transaction);
            }
        }
        balances
    }

    /// Gets the balance of an account, zero if it never transacted
    pub fn balance_of(&self, public_key: &PublicKey) -> f64 {
        self.balances.get(public_key).copied().unwrap_or(0.0)
    }

    /// Applies a transaction without checking funds
    pub fn apply(&mut self, transaction: &Transaction) {
        match transaction {
            Transaction::Transfer(transfer) => {
                self.debit(transfer.sender(), transfer.total_debit());
                self.credit(transfer.recipient(), transfer.amount());
            }
            Transaction::Reward(reward) => {
                self.credit(reward.recipient(), reward.amount());
            }
        }
    }

    /// Applies a transaction only if the sender can cover amount plus fee
    pub fn try_apply(&mut self, transaction: &Transaction) -> Result<(), TransactionError> {
        if let Transaction::Transfer(transfer) = transaction {
            let available = self.balance_of(transfer.sender());
            let required = transfer.total_debit();
            if required > available {
                return Err(TransactionError::InsufficientFunds {
                    required,
                    available,
                });
            }
        }

        self.apply(transaction);
        Ok(())
    }

    fn credit(&mut self, public_key: &PublicKey, amount: f64) {
        *self.balances.entry(*public_key).or_insert(0.0) += amount;
    }

    fn debit(&mut self, public_key: &PublicKey, amount: f64) {
        *self.balances.entry(*public_key).or_insert(0.0) -= amount;
    }
}
