//! A minimal in-memory ledger: signed transfers, proof-of-work blocks and
//! full-chain validation.

pub mod blockchain;
