use anyhow::Result;
use log::{info, warn};

use minichain::blockchain::{Blockchain, ChainConfig, Transaction, TransactionPool, Wallet};

// Load the chain config from the path in the first argument, if any
fn load_config() -> Result<ChainConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let config = ChainConfig::from_file(&path)?;
            info!("Loaded config from {}", path);
            Ok(config)
        }
        None => Ok(ChainConfig::default()),
    }
}

fn log_balances(blockchain: &Blockchain, wallets: &[&Wallet]) {
    for wallet in wallets {
        info!("{}: {}", wallet.name(), blockchain.get_balance(wallet.public_key()));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = load_config()?;
    info!(
        "Starting chain with difficulty {} and reward {}",
        config.difficulty, config.reward_amount
    );

    let alice = Wallet::new("Alice")?;
    let bob = Wallet::new("Bob")?;
    let charlie = Wallet::new("Charlie")?;
    let wallets = [&alice, &bob, &charlie];

    for wallet in &wallets {
        info!("{}'s address: {}", wallet.name(), wallet.public_key());
    }

    let blockchain = Blockchain::new(config)?;
    let pool = TransactionPool::new(blockchain.clone());

    // Mine the first block to reward a miner
    blockchain
        .add_block_async(pool.get_transactions(), vec![*alice.public_key()])
        .await?;
    pool.clear_transactions();

    info!("Balances after first mining:");
    log_balances(&blockchain, &wallets);

    let transaction = Transaction::create(&alice, *bob.public_key(), 10.0, 0.5)?;
    pool.add_transaction(transaction)?;
    info!("Transaction added to pool ({} pending)", pool.len());

    let overdraft = Transaction::create(&bob, *charlie.public_key(), 1_000.0, 0.0)?;
    if let Err(err) = pool.add_transaction(overdraft) {
        warn!("Bob's transfer was not admitted: {}", err);
    }

    blockchain
        .add_block_async(pool.get_transactions(), vec![*charlie.public_key()])
        .await?;
    pool.clear_transactions();

    info!("Balances after second block:");
    log_balances(&blockchain, &wallets);

    info!("Blockchain valid: {}", blockchain.is_chain_valid());
    for block in blockchain.blocks() {
        info!(
            "Block {}: {} transactions, nonce {}, previous {}, hash {}",
            block.index(),
            block.transactions().len(),
            block.nonce(),
            block.previous_hash(),
            block.hash()
        );
    }

    Ok(())
}
