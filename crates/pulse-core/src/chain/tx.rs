//! Legacy (EIP-155) transaction encoding and signing for the agent account.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Encodable, Header};
use k256::ecdsa::SigningKey;

use crate::error::TransferError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub chain_id: u64,
}

fn wrap_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

impl LegacyTx {
    fn encode_body(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
    }

    /// RLP preimage `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_body(&mut payload);
        self.chain_id.encode(&mut payload);
        0u8.encode(&mut payload);
        0u8.encode(&mut payload);
        wrap_list(payload)
    }

    pub fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }

    /// Sign with `key` and return the raw transaction for `eth_sendRawTransaction`.
    pub fn sign(&self, key: &SigningKey) -> Result<Vec<u8>, TransferError> {
        let hash = self.signing_hash();
        let (sig, recid) = key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| TransferError::Submission(format!("Failed to sign transaction: {}", e)))?;

        let bytes = sig.to_bytes();
        let r = U256::from_be_slice(&bytes[..32]);
        let s = U256::from_be_slice(&bytes[32..]);
        let v = recid.to_byte() as u64 + 35 + 2 * self.chain_id;

        let mut payload = Vec::new();
        self.encode_body(&mut payload);
        v.encode(&mut payload);
        r.encode(&mut payload);
        s.encode(&mut payload);
        Ok(wrap_list(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    // EIP-155 reference transaction
    fn reference_tx() -> LegacyTx {
        LegacyTx {
            nonce: 9,
            gas_price: U256::from(20_000_000_000u64),
            gas_limit: 21000,
            to: Address::repeat_byte(0x35),
            value: U256::from(1_000_000_000_000_000_000u64),
            data: Bytes::new(),
            chain_id: 1,
        }
    }

    #[test]
    fn test_signing_payload_matches_eip155_vector() {
        assert_eq!(
            hex::encode(reference_tx().signing_payload()),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            reference_tx().signing_hash(),
            B256::from(hex!("daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"))
        );
    }

    #[test]
    fn test_signed_tx_matches_eip155_vector() {
        let key = SigningKey::from_slice(&[0x46; 32]).unwrap();
        let raw = reference_tx().sign(&key).unwrap();
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_chain_id_changes_signing_hash() {
        let mut celo = reference_tx();
        celo.chain_id = 42220;
        assert_ne!(celo.signing_hash(), reference_tx().signing_hash());
    }
}
