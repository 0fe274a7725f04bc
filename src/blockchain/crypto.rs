use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Length of an Ed25519 public key in bytes
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an Ed25519 signature in bytes
pub const SIGNATURE_LENGTH: usize = 64;

/// Length of a SHA-256 digest in bytes
pub const HASH_LENGTH: usize = 32;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to generate keypair: {0}")]
    KeyGeneration(String),

    #[error("Randomness source unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// A wallet's public key, shared freely as the account identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Converts to a dalek verifying key, failing if the bytes are not a curve point
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.0).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl From<&VerifyingKey> for PublicKey {
    fn from(key: &VerifyingKey) -> Self {
        PublicKey(key.to_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key length".to_string())
        })?;

        Ok(PublicKey(bytes))
    }
}

/// A detached Ed25519 signature over a transaction payload
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TransactionSignature(pub [u8; SIGNATURE_LENGTH]);

impl TransactionSignature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl From<&Signature> for TransactionSignature {
    fn from(signature: &Signature) -> Self {
        TransactionSignature(signature.to_bytes())
    }
}

impl fmt::Debug for TransactionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionSignature({})", hex::encode(self.0))
    }
}

impl fmt::Display for TransactionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

// serde only derives arrays up to 32 elements
impl Serialize for TransactionSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for TransactionSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let len = bytes.len();
        let bytes: [u8; SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| <D::Error as de::Error>::invalid_length(len, &"64 signature bytes"))?;
        Ok(TransactionSignature(bytes))
    }
}

/// A SHA-256 digest, used for block hashes and transaction ids
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Sha256Hash(pub [u8; HASH_LENGTH]);

impl Sha256Hash {
    /// The all-zero hash, used as the genesis block's previous hash
    pub const ZERO: Sha256Hash = Sha256Hash([0u8; HASH_LENGTH]);

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Whether the first `nibbles` hex digits of the hash are all '0'
    pub fn has_leading_zero_nibbles(&self, nibbles: u8) -> bool {
        let nibbles = nibbles as usize;
        if nibbles > HASH_LENGTH * 2 {
            return false;
        }

        let full_bytes = nibbles / 2;
        if self.0[..full_bytes].iter().any(|b| *b != 0) {
            return false;
        }

        nibbles % 2 == 0 || self.0[full_bytes] >> 4 == 0
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Sha256Hash {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_LENGTH];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| CryptoError::DecodingError(e.to_string()))?;
        Ok(Sha256Hash(bytes))
    }
}

/// Represents a wallet with a keypair
pub struct Wallet {
    name: String,
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl Wallet {
    /// Creates a new wallet with a random keypair drawn from the OS
    pub fn new(name: impl Into<String>) -> Result<Self, CryptoError> {
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        let signing_key = SigningKey::from_bytes(&secret);
        let public_key = PublicKey::from(&signing_key.verifying_key());

        Ok(Wallet {
            name: name.into(),
            signing_key,
            public_key,
        })
    }

    /// The wallet's display label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the wallet's public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Signs a payload with the wallet's private key
    pub fn sign(&self, payload: &[u8]) -> TransactionSignature {
        TransactionSignature::from(&self.signing_key.sign(payload))
    }

    /// Checks `signature` over `payload` against `public_key`
    pub fn verify(public_key: &PublicKey, payload: &[u8], signature: &TransactionSignature) -> bool {
        verify_signature(payload, signature, public_key)
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("name", &self.name)
            .field("public_key", &self.public_key.to_string())
            .finish()
    }
}

/// Verifies a signature against a message and public key.
///
/// Malformed keys are reported as an invalid signature rather than an error.
pub fn verify_signature(
    message: &[u8],
    signature: &TransactionSignature,
    public_key: &PublicKey,
) -> bool {
    let verifying_key = match public_key.to_verifying_key() {
        Ok(key) => key,
        Err(_) => return false,
    };

    let signature = Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &signature).is_ok()
}
