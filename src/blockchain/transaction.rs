use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::crypto::{
    verify_signature, CryptoError, PublicKey, Sha256Hash, TransactionSignature, Wallet,
    PUBLIC_KEY_LENGTH,
};

/// Domain tag prefixed to transfer signing payloads and canonical encodings
const TRANSFER_TAG: u8 = 0x01;

/// Domain tag prefixed to the canonical encoding of reward transactions
const REWARD_TAG: u8 = 0x02;

/// Size of the fixed-width payload a transfer signature covers:
/// tag, sender, recipient, amount bits, fee bits, nonce
pub const SIGNING_PAYLOAD_LENGTH: usize = 1 + PUBLIC_KEY_LENGTH * 2 + 8 + 8 + 8;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Reward transactions cannot be submitted by users")]
    RewardNotAllowed,

    #[error("Sender and recipient are the same account")]
    SelfTransfer,

    #[error("Transaction {0} was already submitted")]
    Duplicate(Sha256Hash),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// A signed value transfer between two wallets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTransaction {
    pub(crate) sender: PublicKey,
    pub(crate) recipient: PublicKey,
    pub(crate) amount: f64,
    pub(crate) fee: f64,
    /// Random value drawn at creation so equal transfers sign differently
    pub(crate) nonce: u64,
    pub(crate) signature: TransactionSignature,
}

impl TransferTransaction {
    pub fn sender(&self) -> &PublicKey {
        &self.sender
    }

    pub fn recipient(&self) -> &PublicKey {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn signature(&self) -> &TransactionSignature {
        &self.signature
    }

    /// Amount plus fee, the total debited from the sender
    pub fn total_debit(&self) -> f64 {
        self.amount + self.fee
    }

    /// Checks the signature against the sender over the current field values
    pub fn verify_signature(&self) -> bool {
        let payload = signing_payload(&self.sender, &self.recipient, self.amount, self.fee, self.nonce);
        verify_signature(&payload, &self.signature, &self.sender)
    }

    /// Checks the rules every transfer must meet wherever it is accepted:
    /// well-formed amounts, a valid signature and distinct accounts
    pub fn validate(&self) -> Result<(), TransactionError> {
        validate_amount("amount", self.amount)?;
        validate_amount("fee", self.fee)?;

        if !self.verify_signature() {
            return Err(TransactionError::InvalidSignature);
        }

        if self.sender == self.recipient {
            return Err(TransactionError::SelfTransfer);
        }

        Ok(())
    }
}

/// A miner payout issued by the chain itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardTransaction {
    pub(crate) recipient: PublicKey,
    pub(crate) amount: f64,
}

impl RewardTransaction {
    pub fn recipient(&self) -> &PublicKey {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }
}

/// A transaction recorded in a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transaction {
    Transfer(TransferTransaction),
    Reward(RewardTransaction),
}

impl Transaction {
    /// Creates a transfer and signs it with the sender's wallet
    ///
    /// # Arguments
    ///
    /// * `sender` - The wallet paying `amount + fee`
    /// * `recipient` - The public key receiving `amount`
    /// * `amount` - The amount to transfer
    /// * `fee` - The fee paid to the miner of the including block
    ///
    /// # Returns
    ///
    /// The signed transaction, or `InvalidAmount` for negative or non-finite values.
    /// A fresh random nonce is signed along with the fields, so two transfers with
    /// equal values are still distinct transactions.
    pub fn create(
        sender: &Wallet,
        recipient: PublicKey,
        amount: f64,
        fee: f64,
    ) -> Result<Self, TransactionError> {
        validate_amount("amount", amount)?;
        validate_amount("fee", fee)?;

        let mut nonce = [0u8; 8];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CryptoError::RandomnessUnavailable(e.to_string()))?;
        let nonce = u64::from_le_bytes(nonce);

        let sender_key = *sender.public_key();
        let payload = signing_payload(&sender_key, &recipient, amount, fee, nonce);
        let signature = sender.sign(&payload);

        Ok(Transaction::Transfer(TransferTransaction {
            sender: sender_key,
            recipient,
            amount,
            fee,
            nonce,
            signature,
        }))
    }

    /// Creates a mining reward crediting `recipient`
    pub fn reward(recipient: PublicKey, amount: f64) -> Self {
        Transaction::Reward(RewardTransaction { recipient, amount })
    }

    /// Verifies the transaction's signature. Rewards carry none and always pass.
    pub fn verify_signature(&self) -> bool {
        match self {
            Transaction::Transfer(transfer) => transfer.verify_signature(),
            Transaction::Reward(_) => true,
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self, Transaction::Reward(_))
    }

    /// The paying account, absent for rewards
    pub fn sender(&self) -> Option<&PublicKey> {
        match self {
            Transaction::Transfer(transfer) => Some(&transfer.sender),
            Transaction::Reward(_) => None,
        }
    }

    pub fn recipient(&self) -> &PublicKey {
        match self {
            Transaction::Transfer(transfer) => &transfer.recipient,
            Transaction::Reward(reward) => &reward.recipient,
        }
    }

    pub fn amount(&self) -> f64 {
        match self {
            Transaction::Transfer(transfer) => transfer.amount,
            Transaction::Reward(reward) => reward.amount,
        }
    }

    pub fn fee(&self) -> f64 {
        match self {
            Transaction::Transfer(transfer) => transfer.fee,
            Transaction::Reward(_) => 0.0,
        }
    }

    /// Feeds the canonical encoding into a hasher.
    ///
    /// Every variant is a tag byte followed by fixed-width fields, so distinct
    /// transactions never share an encoding.
    pub fn digest_into(&self, hasher: &mut Sha256) {
        match self {
            Transaction::Transfer(transfer) => {
                hasher.update([TRANSFER_TAG]);
                hasher.update(transfer.sender.as_bytes());
                hasher.update(transfer.recipient.as_bytes());
                hasher.update(transfer.amount.to_le_bytes());
                hasher.update(transfer.fee.to_le_bytes());
                hasher.update(transfer.nonce.to_le_bytes());
                hasher.update(transfer.signature.as_bytes());
            }
            Transaction::Reward(reward) => {
                hasher.update([REWARD_TAG]);
                hasher.update(reward.recipient.as_bytes());
                hasher.update(reward.amount.to_le_bytes());
            }
        }
    }

    /// SHA-256 of the canonical encoding
    pub fn id(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        self.digest_into(&mut hasher);
        Sha256Hash(hasher.finalize().into())
    }

    /// Serializes the transaction to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::serialize(self).map_err(|e| TransactionError::Encoding(e.to_string()))
    }

    /// Deserializes a transaction produced by [`Transaction::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        bincode::deserialize(bytes).map_err(|e| TransactionError::Encoding(e.to_string()))
    }
}

/// Builds the fixed-width payload a transfer signature covers
pub fn signing_payload(
    sender: &PublicKey,
    recipient: &PublicKey,
    amount: f64,
    fee: f64,
    nonce: u64,
) -> [u8; SIGNING_PAYLOAD_LENGTH] {
    let mut payload = [0u8; SIGNING_PAYLOAD_LENGTH];
    payload[0] = TRANSFER_TAG;

    let mut offset = 1;
    for field in [&sender.as_bytes()[..], &recipient.as_bytes()[..]] {
        payload[offset..offset + PUBLIC_KEY_LENGTH].copy_from_slice(field);
        offset += PUBLIC_KEY_LENGTH;
    }
    payload[offset..offset + 8].copy_from_slice(&amount.to_le_bytes());
    payload[offset + 8..offset + 16].copy_from_slice(&fee.to_le_bytes());
    payload[offset + 16..offset + 24].copy_from_slice(&nonce.to_le_bytes());

    payload
}

fn validate_amount(field: &str, value: f64) -> Result<(), TransactionError> {
    if !value.is_finite() || value < 0.0 {
        return Err(TransactionError::InvalidAmount(format!(
            "{} must be a non-negative number: {}",
            field, value
        )));
    }
    Ok(())
}
