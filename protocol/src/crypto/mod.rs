//! # Cryptographic Primitives
//!
//! Two things live here: Keccak-256 hashing, which feeds every digest the
//! operator publishes, and secp256k1 signature recovery, which decides
//! whether a light transaction was authorized by the accounts it touches.
//!
//! Both are thin wrappers over audited crates (`sha3`, `k256`). Nothing in
//! this module invents cryptography.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{hash_concat, hash_text, keccak256, keccak256_hex, strip_hex_prefix};
pub use keys::EthKeypair;
pub use signatures::{
    address_to_field, eth_signed_message_hash, eth_signed_message_hash_hex, recover_address,
    RecoverableSignature, SignatureError,
};
