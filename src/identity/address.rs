//! Public identity artifacts: secp256k1 public key and Ethereum address
//!
//! Nothing in this module is secret. Public keys are 64 bytes, big-endian X then
//! big-endian Y, no compression prefix. Addresses are the low 20 bytes of
//! Keccak-256 over the public key.

use crate::error::{Result, TeeError};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

pub const ETH_PRIVKEY_LEN: usize = 32;
pub const ETH_PUBKEY_LEN: usize = 64;
pub const ETH_ADDR_LEN: usize = 20;
pub const ETH_ADDR_HEX_LEN: usize = 42;

/// Uncompressed secp256k1 public key (X ‖ Y)
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "crate::serde_hex")] [u8; ETH_PUBKEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; ETH_PUBKEY_LEN] = bytes.try_into().map_err(|_| {
            TeeError::InvalidParam(format!(
                "public key must be {} bytes, got {}",
                ETH_PUBKEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    pub(crate) fn from_coordinates(x: &[u8], y: &[u8]) -> Result<Self> {
        if x.len() != 32 || y.len() != 32 {
            return Err(TeeError::Crypto("curve coordinates must be 32 bytes".into()));
        }
        let mut raw = [0u8; ETH_PUBKEY_LEN];
        raw[..32].copy_from_slice(x);
        raw[32..].copy_from_slice(y);
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; ETH_PUBKEY_LEN] {
        &self.0
    }

    pub fn x(&self) -> &[u8] {
        &self.0[..32]
    }

    pub fn y(&self) -> &[u8] {
        &self.0[32..]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Ethereum address of this key
    pub fn address(&self) -> EthAddress {
        address_from_public_key(self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", self.to_hex())
    }
}

/// 20-byte Ethereum address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EthAddress(#[serde(with = "crate::serde_hex")] [u8; ETH_ADDR_LEN]);

impl EthAddress {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; ETH_ADDR_LEN] = bytes.try_into().map_err(|_| {
            TeeError::InvalidParam(format!(
                "address must be {} bytes, got {}",
                ETH_ADDR_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; ETH_ADDR_LEN] {
        &self.0
    }

    /// Canonical `0x` + 40 lowercase hex digits
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EthAddress({})", self.to_hex())
    }
}

/// The public half of the enclave identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthIdentity {
    pub public_key: PublicKey,
    pub address: EthAddress,
    pub address_hex: String,
}

impl EthIdentity {
    pub fn from_public_key(public_key: PublicKey) -> Self {
        let address = address_from_public_key(&public_key);
        Self {
            public_key,
            address,
            address_hex: address.to_hex(),
        }
    }
}

/// Low 20 bytes of Keccak-256(X ‖ Y)
pub fn address_from_public_key(public_key: &PublicKey) -> EthAddress {
    let digest = Keccak256::digest(public_key.as_bytes());
    let mut raw = [0u8; ETH_ADDR_LEN];
    raw.copy_from_slice(&digest[32 - ETH_ADDR_LEN..]);
    EthAddress(raw)
}

/// Format 20 address bytes as a 42-character `0x`-prefixed lowercase hex string
pub fn format_address_hex(address: &[u8]) -> Result<String> {
    let address = EthAddress::from_bytes(address)?;
    let formatted = address.to_hex();
    debug_assert_eq!(formatted.len(), ETH_ADDR_HEX_LEN);
    Ok(formatted)
}
