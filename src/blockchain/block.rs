use chrono::{DateTime, SubsecRound, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::crypto::Sha256Hash;
use super::transaction::Transaction;

/// A block that has been assembled but not yet mined.
///
/// The only way to obtain a [`Block`] from it is [`UnminedBlock::mine`].
#[derive(Debug, Clone)]
pub struct UnminedBlock {
    index: u64,
    timestamp: DateTime<Utc>,
    transactions: Vec<Transaction>,
    previous_hash: Sha256Hash,
    nonce: u64,
}

impl UnminedBlock {
    /// Creates a new unmined block
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The transactions, in replay order
    /// * `previous_hash` - The hash of the previous block
    ///
    /// # Returns
    ///
    /// An UnminedBlock with nonce 0, stamped with the current time
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: Sha256Hash) -> Self {
        UnminedBlock {
            index,
            // Millisecond precision so the hashed timestamp is exactly what is stored
            timestamp: Utc::now().trunc_subsecs(3),
            transactions,
            previous_hash,
            nonce: 0,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Calculates the hash at the current nonce
    pub fn compute_hash(&self) -> Sha256Hash {
        let prefix = header_hasher(self.index, &self.timestamp, &self.transactions, &self.previous_hash);
        finish_hash(&prefix, self.nonce)
    }

    /// Performs proof of work: increments the nonce until the hash has
    /// `difficulty` leading zero hex digits
    ///
    /// # Returns
    ///
    /// The mined, immutable block
    pub fn mine(self, difficulty: u8) -> Block {
        let prefix = header_hasher(self.index, &self.timestamp, &self.transactions, &self.previous_hash);
        let mut nonce = self.nonce;

        let hash = loop {
            let hash = finish_hash(&prefix, nonce);
            if hash.has_leading_zero_nibbles(difficulty) {
                break hash;
            }
            nonce += 1;
        };

        debug!(
            "Mined block {} with nonce {} at difficulty {}",
            self.index, nonce, difficulty
        );

        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions,
            previous_hash: self.previous_hash,
            nonce,
            hash,
        }
    }
}

/// Represents a mined block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Index of the block in the chain
    pub(crate) index: u64,

    /// Timestamp when the block was assembled
    pub(crate) timestamp: DateTime<Utc>,

    /// Transactions included in this block, in replay order
    pub(crate) transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub(crate) previous_hash: Sha256Hash,

    /// Proof of work (nonce)
    pub(crate) nonce: u64,

    /// Hash of the block as found by mining
    pub(crate) hash: Sha256Hash,
}

impl Block {
    /// Creates and mines the genesis block
    pub fn genesis(difficulty: u8) -> Self {
        UnminedBlock::new(0, Vec::new(), Sha256Hash::ZERO).mine(difficulty)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &Sha256Hash {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The hash stored when the block was mined
    pub fn hash(&self) -> &Sha256Hash {
        &self.hash
    }

    /// Recalculates the hash from the block's current contents
    pub fn compute_hash(&self) -> Sha256Hash {
        let prefix = header_hasher(self.index, &self.timestamp, &self.transactions, &self.previous_hash);
        finish_hash(&prefix, self.nonce)
    }

    /// Checks that the stored hash matches the contents and meets `difficulty`
    pub fn is_valid_proof(&self, difficulty: u8) -> bool {
        let hash = self.compute_hash();
        hash == self.hash && hash.has_leading_zero_nibbles(difficulty)
    }
}

/// Hashes everything except the nonce: index, timestamp, transactions, previous hash.
///
/// Integers are fixed-width little-endian and the transaction list is length-prefixed.
fn header_hasher(
    index: u64,
    timestamp: &DateTime<Utc>,
    transactions: &[Transaction],
    previous_hash: &Sha256Hash,
) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(index.to_le_bytes());
    hasher.update(timestamp.timestamp_millis().to_le_bytes());
    hasher.update((transactions.len() as u64).to_le_bytes());
    for transaction in transactions {
        transaction.digest_into(&mut hasher);
    }
    hasher.update(previous_hash.as_bytes());
    hasher
}

fn finish_hash(prefix: &Sha256, nonce: u64) -> Sha256Hash {
    let digest = prefix.clone().chain_update(nonce.to_le_bytes()).finalize();
    Sha256Hash(digest.into())
}
