//! Cryptographic helpers: secp256k1 signer recovery and digest signing.
//!
//! Signatures are 65 bytes `r || s || v`. `v` is accepted as {0,1,27,28};
//! high-S signatures are normalised (with the recovery parity flipped) before
//! recovery so that wallet output and contract `ecrecover` agree.

use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::TransferError;

pub const SIGNATURE_LEN: usize = 65;

/// Ethereum address of a public key: last 20 bytes of keccak(uncompressed point).
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

pub fn signer_address(key: &SigningKey) -> Address {
    address_of(key.verifying_key())
}

/// Recover the address that produced `signature` over `digest`.
pub fn recover_signer(digest: &B256, signature: &[u8]) -> Result<Address, TransferError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(TransferError::Validation(format!(
            "Signature must be {} bytes, got {}",
            SIGNATURE_LEN,
            signature.len()
        )));
    }

    let v = match signature[64] {
        0 | 1 => signature[64],
        27 | 28 => signature[64] - 27,
        other => {
            return Err(TransferError::Validation(format!(
                "Unsupported signature recovery byte: {}",
                other
            )))
        }
    };

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| TransferError::Validation(format!("Malformed signature: {}", e)))?;
    let mut recid = RecoveryId::from_byte(v)
        .ok_or_else(|| TransferError::Validation("Invalid recovery id".into()))?;

    let sig = match sig.normalize_s() {
        Some(normalized) => {
            recid = RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced());
            normalized
        }
        None => sig,
    };

    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recid)
        .map_err(|e| TransferError::Validation(format!("Signature recovery failed: {}", e)))?;

    Ok(address_of(&key))
}

/// Sign a 32-byte digest, returning `r || s || v` with `v` in {27, 28}.
pub fn sign_digest(key: &SigningKey, digest: &B256) -> Result<[u8; SIGNATURE_LEN], TransferError> {
    let (sig, recid) = key
        .sign_prehash_recoverable(digest.as_slice())
        .map_err(|e| TransferError::Validation(format!("Signing failed: {}", e)))?;

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recid.to_byte() + 27;
    Ok(out)
}
