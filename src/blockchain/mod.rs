// Blockchain module
//
// This module contains the ledger core:
// - Wallets and fixed-length key, signature and hash types
// - Transfer and reward transactions
// - Balance replay
// - Block construction and proof of work
// - The chain itself and its validation
// - The pending transaction pool

pub mod account;
pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod pool;
pub mod transaction;

// Re-export main components for easier access
pub use account::Balances;
pub use block::{Block, UnminedBlock};
pub use chain::{Blockchain, BlockchainError, ChainIntegrityError};
pub use config::{ChainConfig, ConfigError};
pub use crypto::{CryptoError, PublicKey, Sha256Hash, TransactionSignature, Wallet};
pub use pool::TransactionPool;
pub use transaction::{Transaction, TransactionError};
