//! Key derivation: a deterministic secp256k1 identity rooted in the TDX report
//!
//! The private scalar is `Keccak-256(KEY_DERIVATION_DOMAIN ‖ MRTD ‖ MRCONFIGID ‖
//! MROWNER ‖ MROWNERCONFIG)`, written straight into a [`SecureBuffer`]. It is used
//! once for the base-point multiplication and wiped before any result or error
//! leaves this module. Nothing is cached: every call re-acquires the report.

use super::address::{EthAddress, EthIdentity, PublicKey, ETH_PRIVKEY_LEN};
use crate::config::ToolConfig;
use crate::error::{Result, TeeError};
use crate::secure::SecureBuffer;
use crate::tee::{open_device, AttestationReport, TeeBackend, TeeDevice, REPORT_DATA_LEN};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{BigInt, BigInteger, PrimeField, Zero};
use ark_secp256k1::{Affine, Fr};
use sha3::digest::generic_array::GenericArray;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use zeroize::Zeroize;

/// Domain separator for the report → scalar derivation
pub const KEY_DERIVATION_DOMAIN: &[u8] = b"tdx-attest/eth-secp256k1/v1";

/// Derives the enclave's Ethereum identity from its attestation report
pub struct KeyTool {
    device: Arc<dyn TeeDevice>,
}

impl KeyTool {
    pub fn new(device: Arc<dyn TeeDevice>) -> Self {
        Self { device }
    }

    /// Open the configured backend and return a ready key tool
    pub fn open(config: &ToolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(open_device(config)?))
    }

    pub fn backend(&self) -> TeeBackend {
        self.device.backend()
    }

    /// Get public key and Ethereum address from a fresh TDX report
    pub fn derive_full_identity(&self) -> Result<EthIdentity> {
        let mut secret = SecureBuffer::<ETH_PRIVKEY_LEN>::new();
        let identity = self.derive_into(&mut secret)?;
        log::info!(
            "Derived enclave identity: backend={}, address={}",
            self.backend().name(),
            identity.address_hex
        );
        Ok(identity)
    }

    /// Public key only. Performs the full report round trip.
    pub fn public_key_only(&self) -> Result<PublicKey> {
        Ok(self.derive_full_identity()?.public_key)
    }

    /// Ethereum address only. Performs the full report round trip.
    pub fn address_only(&self) -> Result<EthAddress> {
        Ok(self.derive_full_identity()?.address)
    }

    pub fn format_address_hex(address: &[u8]) -> Result<String> {
        super::address::format_address_hex(address)
    }

    /// Derive using the caller's buffer; it is released on every path.
    pub(crate) fn derive_into(&self, secret: &mut SecureBuffer<ETH_PRIVKEY_LEN>) -> Result<EthIdentity> {
        release_after(secret, |secret| self.derive_with(secret))
    }

    fn derive_with(&self, secret: &mut SecureBuffer<ETH_PRIVKEY_LEN>) -> Result<EthIdentity> {
        let report = self.device.get_report(&[0u8; REPORT_DATA_LEN])?;
        extract_private_key(&report, secret)?;
        drop(report);

        let public_key = public_key_from_secret(secret)?;
        Ok(EthIdentity::from_public_key(public_key))
    }
}

/// Fill `secret` with the scalar bound to this report's TD identity
pub(crate) fn extract_private_key(
    report: &AttestationReport,
    secret: &mut SecureBuffer<ETH_PRIVKEY_LEN>,
) -> Result<()> {
    let fields = report.identity_fields();
    if fields.iter().all(|b| *b == 0) {
        return Err(TeeError::TdxReport("report carries no TD measurement".into()));
    }
    secret.with_bytes_mut(|out| {
        let mut h = Keccak256::new();
        h.update(KEY_DERIVATION_DOMAIN);
        h.update(fields);
        h.finalize_into(GenericArray::from_mut_slice(&mut out[..]));
    })
}

/// Multiply the base point by the secret scalar
/// Run `f` against `secret`, wiping it afterwards on every path
pub(crate) fn release_after<R>(
    secret: &mut SecureBuffer<ETH_PRIVKEY_LEN>,
    f: impl FnOnce(&mut SecureBuffer<ETH_PRIVKEY_LEN>) -> Result<R>,
) -> Result<R> {
    let result = f(secret);
    secret.release();
    result
}

pub(crate) fn public_key_from_secret(secret: &SecureBuffer<ETH_PRIVKEY_LEN>) -> Result<PublicKey> {
    let mut scalar = secret.with_bytes(scalar_from_be_bytes)??;
    let point = (Affine::generator() * &scalar).into_affine();
    scalar.zeroize();

    if point.infinity {
        return Err(TeeError::Crypto("public key is the point at infinity".into()));
    }
    let x = point.x.into_bigint().to_bytes_be();
    let y = point.y.into_bigint().to_bytes_be();
    PublicKey::from_coordinates(&x, &y)
}

/// Interpret 32 big-endian bytes as a scalar, rejecting 0 and values ≥ n
fn scalar_from_be_bytes(bytes: &[u8; ETH_PRIVKEY_LEN]) -> Result<Fr> {
    let mut limbs = [0u64; 4];
    let mut word = [0u8; 8];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.rchunks_exact(8)) {
        word.copy_from_slice(chunk);
        *limb = u64::from_be_bytes(word);
    }
    word.zeroize();

    let mut bigint = BigInt::new(limbs);
    limbs.zeroize();
    let scalar = Fr::from_bigint(bigint);
    bigint.zeroize();

    match scalar {
        None => Err(TeeError::KeyDerivation(
            "derived scalar is not below the secp256k1 order".into(),
        )),
        Some(s) if s.is_zero() => Err(TeeError::KeyDerivation("derived scalar is zero".into())),
        Some(s) => Ok(s),
    }
}
