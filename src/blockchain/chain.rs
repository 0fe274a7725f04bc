use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use std::collections::HashSet;
use std::sync::Arc;

use super::account::Balances;
use super::block::{Block, UnminedBlock};
use super::config::{ChainConfig, ConfigError};
use super::crypto::{PublicKey, Sha256Hash};
use super::transaction::{Transaction, TransactionError};

/// Relative slack allowed when summing reward shares back to the block total
const REWARD_TOLERANCE: f64 = 1e-9;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("At least one miner is required to receive the block reward")]
    NoMiners,

    #[error("Reward transactions are issued by the chain, not submitted")]
    UnexpectedReward,

    #[error("Chain integrity error: {0}")]
    Integrity(#[from] ChainIntegrityError),

    #[error("Mining worker failed: {0}")]
    Worker(String),
}

/// The first integrity violation found while validating the chain
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainIntegrityError {
    #[error("Chain has no genesis block")]
    Empty,

    #[error("Invalid genesis block: {0}")]
    InvalidGenesis(String),

    #[error("Block at position {position} has index {index}")]
    IndexMismatch { position: usize, index: u64 },

    #[error("Block {index} does not reference the previous block's hash")]
    BrokenLink { index: u64 },

    #[error("Block {index} hash does not match its contents")]
    HashMismatch { index: u64 },

    #[error("Block {index} hash does not satisfy difficulty {difficulty}")]
    InvalidProof { index: u64, difficulty: u8 },

    #[error("Block {index} contains transaction {transaction} with an invalid signature")]
    InvalidSignature { index: u64, transaction: Sha256Hash },

    #[error("Block {index} contains invalid transaction {transaction}: {reason}")]
    InvalidTransaction {
        index: u64,
        transaction: Sha256Hash,
        reason: String,
    },

    #[error("Block {index} repeats transaction {transaction}")]
    DuplicateTransaction { index: u64, transaction: Sha256Hash },

    #[error("Block {index} transaction {transaction} spends more than the sender holds")]
    InsufficientFunds { index: u64, transaction: Sha256Hash },

    #[error("Block {index} has no reward transaction")]
    MissingReward { index: u64 },

    #[error("Block {index} has a reward before a transfer")]
    MisplacedReward { index: u64 },

    #[error("Block {index} pays {actual} in rewards, expected {expected}")]
    InvalidReward { index: u64, expected: f64, actual: f64 },
}

/// Represents the blockchain
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks
    chain: Arc<RwLock<Vec<Block>>>,

    /// Held for the whole of `add_block` so only one append is in flight
    append_lock: Arc<Mutex<()>>,

    /// Mining difficulty and reward policy
    config: ChainConfig,
}

impl Blockchain {
    /// Creates a new blockchain with a genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Difficulty and reward amount for the chain's lifetime
    ///
    /// # Returns
    ///
    /// A new Blockchain instance, or a config error
    pub fn new(config: ChainConfig) -> Result<Self, BlockchainError> {
        config.validate()?;

        let blockchain = Blockchain {
            chain: Arc::new(RwLock::new(Vec::new())),
            append_lock: Arc::new(Mutex::new(())),
            config,
        };

        blockchain.create_genesis_block();

        Ok(blockchain)
    }

    /// Creates the genesis block (first block in the chain)
    fn create_genesis_block(&self) {
        let genesis_block = Block::genesis(self.config.difficulty);
        info!("Created genesis block {}", genesis_block.hash());

        self.chain.write().push(genesis_block);
    }

    pub fn difficulty(&self) -> u8 {
        self.config.difficulty
    }

    pub fn reward_amount(&self) -> f64 {
        self.config.reward_amount
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Option<Block> {
        self.chain.read().last().cloned()
    }

    /// Gets a snapshot of every block in the chain
    pub fn blocks(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Mines a block with the given transactions and appends it to the chain
    ///
    /// # Arguments
    ///
    /// * `transactions` - Transfers to include, in replay order
    /// * `miners` - Accounts sharing the block reward and fees equally
    ///
    /// # Returns
    ///
    /// Result with the newly mined block. On error the chain is unchanged.
    pub fn add_block(
        &self,
        transactions: Vec<Transaction>,
        miners: &[PublicKey],
    ) -> Result<Block, BlockchainError> {
        if miners.is_empty() {
            return Err(BlockchainError::NoMiners);
        }

        let _append = self.append_lock.lock();

        let (index, previous_hash, mut balances, mut seen) = {
            let chain = self.chain.read();
            let last_block = chain.last().ok_or(ChainIntegrityError::Empty)?;
            (
                last_block.index() + 1,
                *last_block.hash(),
                Balances::replay(chain.iter()),
                transfer_ids(&chain),
            )
        };

        // Check transfers in order against the running replay
        let mut total_fees = 0.0;
        for transaction in &transactions {
            let transfer = match transaction {
                Transaction::Transfer(transfer) => transfer,
                Transaction::Reward(_) => return Err(BlockchainError::UnexpectedReward),
            };
            let id = transaction.id();

            let checked = transfer.validate().and_then(|()| {
                if seen.insert(id) {
                    balances.try_apply(transaction)
                } else {
                    Err(TransactionError::Duplicate(id))
                }
            });
            if let Err(err) = checked {
                warn!("Rejecting block {}: transaction {}: {}", index, id, err);
                return Err(err.into());
            }

            total_fees += transfer.fee();
        }

        // Reward and collected fees are split equally between the miners
        let share = (self.config.reward_amount + total_fees) / miners.len() as f64;
        let mut block_transactions = transactions;
        block_transactions.extend(miners.iter().map(|miner| Transaction::reward(*miner, share)));

        debug!(
            "Mining block {} with {} transactions at difficulty {}",
            index,
            block_transactions.len(),
            self.config.difficulty
        );

        // Mine without holding the chain lock so readers are not blocked
        let new_block = UnminedBlock::new(index, block_transactions, previous_hash)
            .mine(self.config.difficulty);

        self.chain.write().push(new_block.clone());
        info!("Appended block {} with hash {}", new_block.index(), new_block.hash());

        Ok(new_block)
    }

    /// Runs [`Blockchain::add_block`] on a blocking worker thread.
    ///
    /// The returned future resolves only after the block is mined and appended.
    pub async fn add_block_async(
        &self,
        transactions: Vec<Transaction>,
        miners: Vec<PublicKey>,
    ) -> Result<Block, BlockchainError> {
        let blockchain = self.clone();
        tokio::task::spawn_blocking(move || blockchain.add_block(transactions, &miners))
            .await
            .map_err(|e| BlockchainError::Worker(e.to_string()))?
    }

    /// Whether a transfer with this id is already on the chain
    pub fn contains_transaction(&self, id: &Sha256Hash) -> bool {
        self.chain
            .read()
            .iter()
            .flat_map(|block| block.transactions())
            .any(|transaction| !transaction.is_reward() && &transaction.id() == id)
    }

    /// Replays every transaction in the chain into a balance sheet
    pub fn balances(&self) -> Balances {
        Balances::replay(self.chain.read().iter())
    }

    /// Gets the confirmed balance of an account by replaying the whole chain
    pub fn get_balance(&self, public_key: &PublicKey) -> f64 {
        self.balances().balance_of(public_key)
    }

    /// Validates the blockchain
    ///
    /// # Returns
    ///
    /// true if the blockchain is valid, false otherwise
    pub fn is_chain_valid(&self) -> bool {
        match self.validate_chain() {
            Ok(()) => true,
            Err(err) => {
                warn!("Chain validation failed: {}", err);
                false
            }
        }
    }

    /// Validates linkage, hashes, proof of work, transactions and rewards of every block
    ///
    /// # Returns
    ///
    /// The first violation found, if any
    pub fn validate_chain(&self) -> Result<(), ChainIntegrityError> {
        let chain = self.chain.read();
        let difficulty = self.config.difficulty;

        let genesis = chain.first().ok_or(ChainIntegrityError::Empty)?;
        validate_genesis(genesis, difficulty)?;

        let mut balances = Balances::new();
        let mut seen = HashSet::new();

        for (position, pair) in chain.windows(2).enumerate() {
            let (previous_block, current_block) = (&pair[0], &pair[1]);
            let index = current_block.index();

            if index != position as u64 + 1 {
                return Err(ChainIntegrityError::IndexMismatch {
                    position: position + 1,
                    index,
                });
            }

            if current_block.previous_hash() != previous_block.hash() {
                return Err(ChainIntegrityError::BrokenLink { index });
            }

            validate_proof(current_block, difficulty)?;
            self.validate_transactions(current_block, &mut balances, &mut seen)?;
        }

        Ok(())
    }

    /// Replays one block's transfers and checks its rewards against the policy.
    ///
    /// Transfers come first, then one or more rewards paying out exactly the
    /// block reward plus the fees collected.
    fn validate_transactions(
        &self,
        block: &Block,
        balances: &mut Balances,
        seen: &mut HashSet<Sha256Hash>,
    ) -> Result<(), ChainIntegrityError> {
        let index = block.index();
        let transactions = block.transactions();

        let split = transactions
            .iter()
            .position(Transaction::is_reward)
            .ok_or(ChainIntegrityError::MissingReward { index })?;

        let mut total_fees = 0.0;
        for transaction in &transactions[..split] {
            let Transaction::Transfer(transfer) = transaction else {
                continue;
            };
            let id = transaction.id();

            match transfer.validate() {
                Ok(()) => {}
                Err(TransactionError::InvalidSignature) => {
                    return Err(ChainIntegrityError::InvalidSignature { index, transaction: id });
                }
                Err(err) => {
                    return Err(ChainIntegrityError::InvalidTransaction {
                        index,
                        transaction: id,
                        reason: err.to_string(),
                    });
                }
            }

            if !seen.insert(id) {
                return Err(ChainIntegrityError::DuplicateTransaction { index, transaction: id });
            }

            if balances.try_apply(transaction).is_err() {
                return Err(ChainIntegrityError::InsufficientFunds { index, transaction: id });
            }

            total_fees += transfer.fee();
        }

        let expected = self.config.reward_amount + total_fees;
        let mut actual = 0.0;
        for transaction in &transactions[split..] {
            let Transaction::Reward(reward) = transaction else {
                return Err(ChainIntegrityError::MisplacedReward { index });
            };

            if !reward.amount().is_finite() || reward.amount() < 0.0 {
                return Err(ChainIntegrityError::InvalidReward {
                    index,
                    expected,
                    actual: reward.amount(),
                });
            }

            actual += reward.amount();
            balances.apply(transaction);
        }

        if (actual - expected).abs() > REWARD_TOLERANCE * expected.abs().max(1.0) {
            return Err(ChainIntegrityError::InvalidReward {
                index,
                expected,
                actual,
            });
        }

        Ok(())
    }
}

fn validate_genesis(genesis: &Block, difficulty: u8) -> Result<(), ChainIntegrityError> {
    if genesis.index() != 0 {
        return Err(ChainIntegrityError::InvalidGenesis(format!(
            "index is {}",
            genesis.index()
        )));
    }

    if genesis.previous_hash() != &Sha256Hash::ZERO {
        return Err(ChainIntegrityError::InvalidGenesis(
            "previous hash is not the zero sentinel".to_string(),
        ));
    }

    if !genesis.transactions().is_empty() {
        return Err(ChainIntegrityError::InvalidGenesis(
            "genesis carries transactions".to_string(),
        ));
    }

    validate_proof(genesis, difficulty)
}

/// Ids of every transfer in `blocks`; reward ids may legitimately repeat
fn transfer_ids(blocks: &[Block]) -> HashSet<Sha256Hash> {
    blocks
        .iter()
        .flat_map(|block| block.transactions())
        .filter(|transaction| !transaction.is_reward())
        .map(Transaction::id)
        .collect()
}

fn validate_proof(block: &Block, difficulty: u8) -> Result<(), ChainIntegrityError> {
    let index = block.index();

    let hash = block.compute_hash();
    if &hash != block.hash() {
        return Err(ChainIntegrityError::HashMismatch { index });
    }

    if !hash.has_leading_zero_nibbles(difficulty) {
        return Err(ChainIntegrityError::InvalidProof { index, difficulty });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::TransferTransaction;

    fn test_chain() -> Blockchain {
        Blockchain::new(ChainConfig::new(2, 10.0)).unwrap()
    }

    fn transfer_mut(transaction: &mut Transaction) -> &mut TransferTransaction {
        match transaction {
            Transaction::Transfer(transfer) => transfer,
            Transaction::Reward(_) => panic!("expected a transfer"),
        }
    }

    /// Genesis, five reward blocks for Alice, then a block carrying Alice -> Bob
    fn funded_chain(alice: &Wallet, bob: &Wallet, miner: &Wallet) -> Blockchain {
        let blockchain = test_chain();
        for _ in 0..5 {
            blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();
        }

        let transaction = Transaction::create(alice, *bob.public_key(), 20.0, 1.0).unwrap();
        blockchain.add_block(vec![transaction], &[*miner.public_key()]).unwrap();
        blockchain
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = test_chain();
        let chain = blockchain.blocks();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].index(), 0);
        assert_eq!(chain[0].previous_hash(), &Sha256Hash::ZERO);
        assert!(chain[0].hash().to_string().starts_with("00"));
        assert!(blockchain.is_chain_valid());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Blockchain::new(ChainConfig::new(65, 10.0));
        assert!(matches!(result, Err(BlockchainError::Config(_))));
    }

    #[test]
    fn test_mining_rewards_and_fee_routing() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let miner = Wallet::new("Miner").unwrap();

        let blockchain = test_chain();
        for _ in 0..5 {
            blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();
        }
        assert_eq!(blockchain.get_balance(alice.public_key()), 50.0);

        let transaction = Transaction::create(&alice, *bob.public_key(), 20.0, 1.0).unwrap();
        let block = blockchain
            .add_block(vec![transaction], &[*miner.public_key()])
            .unwrap();

        assert_eq!(block.index(), 6);
        assert_eq!(block.transactions().len(), 2); // transfer + mining reward
        assert!(block.transactions()[1].is_reward());

        assert_eq!(blockchain.get_balance(alice.public_key()), 29.0);
        assert_eq!(blockchain.get_balance(bob.public_key()), 20.0);
        // Fees go to the miner along with the reward
        assert_eq!(blockchain.get_balance(miner.public_key()), 11.0);
        assert!(blockchain.is_chain_valid());
    }

    #[test]
    fn test_reward_split_between_miners() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let blockchain = test_chain();

        let block = blockchain
            .add_block(Vec::new(), &[*alice.public_key(), *bob.public_key()])
            .unwrap();

        assert_eq!(block.transactions().len(), 2);
        assert_eq!(blockchain.get_balance(alice.public_key()), 5.0);
        assert_eq!(blockchain.get_balance(bob.public_key()), 5.0);
    }

    #[test]
    fn test_add_block_requires_miner() {
        let blockchain = test_chain();
        let result = blockchain.add_block(Vec::new(), &[]);

        assert!(matches!(result, Err(BlockchainError::NoMiners)));
        assert_eq!(blockchain.len(), 1);
    }

    #[test]
    fn test_add_block_rejects_submitted_reward() {
        let alice = Wallet::new("Alice").unwrap();
        let blockchain = test_chain();

        let forged = Transaction::reward(*alice.public_key(), 1_000.0);
        let result = blockchain.add_block(vec![forged], &[*alice.public_key()]);

        assert!(matches!(result, Err(BlockchainError::UnexpectedReward)));
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.get_balance(alice.public_key()), 0.0);
    }

    #[test]
    fn test_add_block_rejects_overdraft_batch() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let blockchain = test_chain();
        blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();

        // Each fits the confirmed balance alone but not together
        let first = Transaction::create(&alice, *bob.public_key(), 6.0, 0.0).unwrap();
        let second = Transaction::create(&alice, *bob.public_key(), 6.0, 0.0).unwrap();
        let result = blockchain.add_block(vec![first, second], &[*bob.public_key()]);

        assert!(matches!(
            result,
            Err(BlockchainError::Transaction(TransactionError::InsufficientFunds { .. }))
        ));
        assert_eq!(blockchain.len(), 2);
    }

    #[test]
    fn test_add_block_rejects_forged_signature() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let blockchain = test_chain();
        blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();

        let mut transaction = Transaction::create(&alice, *bob.public_key(), 5.0, 0.0).unwrap();
        transfer_mut(&mut transaction).amount = 9.0;

        let result = blockchain.add_block(vec![transaction], &[*bob.public_key()]);
        assert!(matches!(
            result,
            Err(BlockchainError::Transaction(TransactionError::InvalidSignature))
        ));
        assert_eq!(blockchain.len(), 2);
    }

    #[test]
    fn test_get_balance_is_idempotent() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let miner = Wallet::new("Miner").unwrap();
        let blockchain = funded_chain(&alice, &bob, &miner);

        let first = blockchain.get_balance(alice.public_key());
        let second = blockchain.get_balance(alice.public_key());
        assert_eq!(first, second);
        assert_eq!(first, 29.0);
    }

    #[test]
    fn test_tampered_amount_invalidates_chain() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let miner = Wallet::new("Miner").unwrap();
        let blockchain = funded_chain(&alice, &bob, &miner);
        assert!(blockchain.is_chain_valid());

        {
            let mut chain = blockchain.chain.write();
            let transfer = transfer_mut(&mut chain[6].transactions[0]);
            transfer.amount = f64::from_bits(transfer.amount.to_bits() ^ 1);
        }

        assert!(!blockchain.is_chain_valid());
        assert_eq!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::HashMismatch { index: 6 })
        );
    }

    #[test]
    fn test_tampered_reward_invalidates_chain() {
        let alice = Wallet::new("Alice").unwrap();
        let blockchain = test_chain();
        blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();
        blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();

        {
            let mut chain = blockchain.chain.write();
            if let Transaction::Reward(reward) = &mut chain[1].transactions[0] {
                reward.amount = 1_000.0;
            }
        }

        assert_eq!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::HashMismatch { index: 1 })
        );
    }

    #[test]
    fn test_tampered_previous_hash_invalidates_chain() {
        let alice = Wallet::new("Alice").unwrap();
        let blockchain = test_chain();
        for _ in 0..3 {
            blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();
        }
        assert!(blockchain.is_chain_valid());

        blockchain.chain.write()[2].previous_hash.0[31] ^= 0x01;

        assert!(!blockchain.is_chain_valid());
        assert_eq!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::BrokenLink { index: 2 })
        );
    }

    #[test]
    fn test_tampered_genesis_invalidates_chain() {
        let blockchain = test_chain();
        blockchain.chain.write()[0].previous_hash.0[0] = 0x01;

        assert!(matches!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::InvalidGenesis(_))
        ));
    }

    #[test]
    fn test_remined_forgery_fails_signature_check() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let miner = Wallet::new("Miner").unwrap();
        let blockchain = funded_chain(&alice, &bob, &miner);

        // Rewrite the tip's transfer and redo the proof of work so hashes line up
        {
            let mut chain = blockchain.chain.write();
            let tip = chain.pop().unwrap();
            let mut transactions = tip.transactions().to_vec();
            transfer_mut(&mut transactions[0]).amount = 45.0;

            let forged = UnminedBlock::new(tip.index(), transactions, *tip.previous_hash())
                .mine(blockchain.difficulty());
            chain.push(forged);
        }

        assert!(matches!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::InvalidSignature { index: 6, .. })
        ));
    }

    #[test]
    fn test_add_block_rejects_self_transfer() {
        let alice = Wallet::new("Alice").unwrap();
        let blockchain = test_chain();
        blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();

        let transaction = Transaction::create(&alice, *alice.public_key(), 2.0, 0.0).unwrap();
        let result = blockchain.add_block(vec![transaction], &[*alice.public_key()]);

        assert!(matches!(
            result,
            Err(BlockchainError::Transaction(TransactionError::SelfTransfer))
        ));
        assert_eq!(blockchain.len(), 2);
    }

    #[test]
    fn test_replayed_transfer_is_rejected() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let miner = Wallet::new("Miner").unwrap();
        let blockchain = funded_chain(&alice, &bob, &miner);

        let mined = blockchain.blocks()[6].transactions()[0].clone();
        assert!(blockchain.contains_transaction(&mined.id()));

        let result = blockchain.add_block(vec![mined.clone()], &[*miner.public_key()]);
        assert!(matches!(
            result,
            Err(BlockchainError::Transaction(TransactionError::Duplicate(id))) if id == mined.id()
        ));
        assert_eq!(blockchain.len(), 7);
        assert_eq!(blockchain.get_balance(alice.public_key()), 29.0);
        assert_eq!(blockchain.get_balance(bob.public_key()), 20.0);
    }

    #[test]
    fn test_duplicate_within_batch_is_rejected() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let blockchain = test_chain();
        blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();

        let transaction = Transaction::create(&alice, *bob.public_key(), 2.0, 0.0).unwrap();
        let result = blockchain.add_block(
            vec![transaction.clone(), transaction],
            &[*bob.public_key()],
        );

        assert!(matches!(
            result,
            Err(BlockchainError::Transaction(TransactionError::Duplicate(_)))
        ));
        assert_eq!(blockchain.len(), 2);
        assert_eq!(blockchain.get_balance(bob.public_key()), 0.0);
    }

    #[test]
    fn test_mined_replay_invalidates_chain() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let miner = Wallet::new("Miner").unwrap();
        let blockchain = funded_chain(&alice, &bob, &miner);

        // Append a properly mined block that pays the same transfer again
        {
            let mut chain = blockchain.chain.write();
            let tip = chain.last().unwrap();
            let replayed = tip.transactions()[0].clone();
            let transactions = vec![replayed, Transaction::reward(*miner.public_key(), 11.0)];

            let block = UnminedBlock::new(tip.index() + 1, transactions, *tip.hash())
                .mine(blockchain.difficulty());
            chain.push(block);
        }

        assert!(matches!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::DuplicateTransaction { index: 7, .. })
        ));
    }

    #[test]
    fn test_inflated_reward_invalidates_chain() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let blockchain = test_chain();
        blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();

        // Rewrite the reward, add a second one, and redo the proof of work
        {
            let mut chain = blockchain.chain.write();
            let tip = chain.pop().unwrap();
            let transactions = vec![
                Transaction::reward(*alice.public_key(), 1_000.0),
                Transaction::reward(*bob.public_key(), 5.0),
            ];

            let forged = UnminedBlock::new(tip.index(), transactions, *tip.previous_hash())
                .mine(blockchain.difficulty());
            chain.push(forged);
        }

        assert!(!blockchain.is_chain_valid());
        match blockchain.validate_chain() {
            Err(ChainIntegrityError::InvalidReward { index, expected, actual }) => {
                assert_eq!(index, 1);
                assert_eq!(expected, 10.0);
                assert_eq!(actual, 1_005.0);
            }
            other => panic!("unexpected validation result: {:?}", other),
        }
    }

    #[test]
    fn test_reward_layout_is_enforced() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let miner = Wallet::new("Miner").unwrap();

        // Reward ahead of the transfer
        let blockchain = funded_chain(&alice, &bob, &miner);
        {
            let mut chain = blockchain.chain.write();
            let tip = chain.pop().unwrap();
            let mut transactions = tip.transactions().to_vec();
            transactions.reverse();

            let forged = UnminedBlock::new(tip.index(), transactions, *tip.previous_hash())
                .mine(blockchain.difficulty());
            chain.push(forged);
        }
        assert_eq!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::MisplacedReward { index: 6 })
        );

        // No reward at all
        let blockchain = test_chain();
        {
            let mut chain = blockchain.chain.write();
            let genesis_hash = *chain[0].hash();
            let block = UnminedBlock::new(1, Vec::new(), genesis_hash).mine(blockchain.difficulty());
            chain.push(block);
        }
        assert_eq!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::MissingReward { index: 1 })
        );
    }

    #[test]
    fn test_mined_overdraft_invalidates_chain() {
        let alice = Wallet::new("Alice").unwrap();
        let bob = Wallet::new("Bob").unwrap();
        let blockchain = test_chain();

        // Signed by Alice, but she holds nothing yet
        {
            let mut chain = blockchain.chain.write();
            let genesis_hash = *chain[0].hash();
            let transactions = vec![
                Transaction::create(&alice, *bob.public_key(), 5.0, 0.0).unwrap(),
                Transaction::reward(*bob.public_key(), 10.0),
            ];
            let block = UnminedBlock::new(1, transactions, genesis_hash).mine(blockchain.difficulty());
            chain.push(block);
        }

        assert!(matches!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::InsufficientFunds { index: 1, .. })
        ));
    }

    #[test]
    fn test_weak_proof_invalidates_chain() {
        let blockchain = Blockchain::new(ChainConfig::new(3, 10.0)).unwrap();
        let alice = Wallet::new("Alice").unwrap();
        blockchain.add_block(Vec::new(), &[*alice.public_key()]).unwrap();

        // Move the tip to a nonce whose hash is consistent but too weak
        {
            let mut chain = blockchain.chain.write();
            let tip = chain.last_mut().unwrap();
            loop {
                tip.nonce += 1;
                tip.hash = tip.compute_hash();
                if !tip.hash.has_leading_zero_nibbles(3) {
                    break;
                }
            }
        }

        assert!(matches!(
            blockchain.validate_chain(),
            Err(ChainIntegrityError::InvalidProof { index: 1, difficulty: 3 })
        ));
    }

    #[test]
    fn test_concurrent_appends_keep_linkage() {
        let blockchain = test_chain();
        let miners: Vec<Wallet> = (0..4)
            .map(|i| Wallet::new(format!("Miner {}", i)).unwrap())
            .collect();

        std::thread::scope(|scope| {
            for miner in &miners {
                let blockchain = blockchain.clone();
                scope.spawn(move || {
                    for _ in 0..3 {
                        blockchain.add_block(Vec::new(), &[*miner.public_key()]).unwrap();
                    }
                });
            }
        });

        assert_eq!(blockchain.len(), 13);
        assert!(blockchain.is_chain_valid());
        for miner in &miners {
            assert_eq!(blockchain.get_balance(miner.public_key()), 30.0);
        }
    }

    #[tokio::test]
    async fn test_add_block_async() {
        let alice = Wallet::new("Alice").unwrap();
        let blockchain = test_chain();

        let block = blockchain
            .add_block_async(Vec::new(), vec![*alice.public_key()])
            .await
            .unwrap();

        assert_eq!(block.index(), 1);
        assert_eq!(blockchain.last_block().unwrap().hash(), block.hash());
        assert_eq!(blockchain.get_balance(alice.public_key()), 10.0);
        assert!(blockchain.is_chain_valid());
    }
}
