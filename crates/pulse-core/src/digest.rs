//! ============================================================================
//! Digest Builder - EIP-712 hashing of transfer requests
//! ============================================================================
//! Reproduces, byte for byte, the digest the vault contract recomputes when
//! verifying `executeTransfer`:
//!
//! ```text
//! typeHash   = keccak256("TransferRequest(address recipient,uint256 amount,uint256 nonce,uint256 deadline)")
//! structHash = keccak256(abi.encode(typeHash, recipient, amount, nonce, deadline))
//! digest     = keccak256(0x19 || 0x01 || domainSeparator || structHash)
//! ```
//! ============================================================================

use alloy_primitives::{keccak256, Address, B256, U256};
use once_cell::sync::Lazy;

use crate::types::TransferRequest;

pub const TRANSFER_REQUEST_TYPE: &str =
    "TransferRequest(address recipient,uint256 amount,uint256 nonce,uint256 deadline)";

pub const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// Vault signing domain name
pub const VAULT_DOMAIN_NAME: &str = "PulseVault";
pub const VAULT_DOMAIN_VERSION: &str = "1";

static TRANSFER_TYPE_HASH: Lazy<B256> = Lazy::new(|| keccak256(TRANSFER_REQUEST_TYPE.as_bytes()));

pub fn transfer_type_hash() -> B256 {
    *TRANSFER_TYPE_HASH
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// `abi.encode(typeHash, recipient, amount, nonce, deadline)`: five 32-byte words.
pub fn encode_struct(request: &TransferRequest) -> [u8; 160] {
    let mut buf = [0u8; 160];
    buf[0..32].copy_from_slice(TRANSFER_TYPE_HASH.as_slice());
    buf[32..64].copy_from_slice(&address_word(&request.recipient));
    buf[64..96].copy_from_slice(&request.amount.to_be_bytes::<32>());
    buf[96..128].copy_from_slice(&request.nonce.to_be_bytes::<32>());
    buf[128..160].copy_from_slice(&request.deadline.to_be_bytes::<32>());
    buf
}

pub fn struct_hash(request: &TransferRequest) -> B256 {
    keccak256(encode_struct(request))
}

/// Final 32-byte digest the user signs.
pub fn typed_data_digest(request: &TransferRequest, domain_separator: &B256) -> B256 {
    let mut packed = [0u8; 66];
    packed[0] = 0x19;
    packed[1] = 0x01;
    packed[2..34].copy_from_slice(domain_separator.as_slice());
    packed[34..66].copy_from_slice(struct_hash(request).as_slice());
    keccak256(packed)
}

/// Local computation of the vault domain separator. The gateway reads the
/// authoritative value from the contract; this is for offline tooling.
pub fn domain_separator(name: &str, version: &str, chain_id: u64, verifying_contract: Address) -> B256 {
    let mut buf = [0u8; 160];
    buf[0..32].copy_from_slice(keccak256(EIP712_DOMAIN_TYPE.as_bytes()).as_slice());
    buf[32..64].copy_from_slice(keccak256(name.as_bytes()).as_slice());
    buf[64..96].copy_from_slice(keccak256(version.as_bytes()).as_slice());
    buf[96..128].copy_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    buf[128..160].copy_from_slice(&address_word(&verifying_contract));
    keccak256(buf)
}
