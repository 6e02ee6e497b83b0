//! Identity: hardware-rooted Ethereum keypair derivation
//!
//! - **KeyTool**: report → private scalar (never exposed) → public key → address
//! - **Address**: public artifacts and their canonical encodings

pub mod address;
pub mod keytool;

pub use address::{
    address_from_public_key, format_address_hex, EthAddress, EthIdentity, PublicKey,
    ETH_ADDR_HEX_LEN, ETH_ADDR_LEN, ETH_PRIVKEY_LEN, ETH_PUBKEY_LEN,
};
pub use keytool::{KeyTool, KEY_DERIVATION_DOMAIN};
