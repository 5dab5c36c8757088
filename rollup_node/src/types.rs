//! Data model of the rollup and its canonical wire encoding.
//!
//! Everything that crosses the settlement contract boundary is
//! recursive-length-prefix (RLP) encoded: big integers as minimal-length
//! big-endian byte strings (zero encodes as the empty string), addresses as
//! fixed 20-byte strings, state roots as raw 32-byte hashes.

use ethereum_types::{H160, H256, U256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::GatewayError;

/// A failed decode. The input is rejected as a whole; no partially
/// populated value is ever produced.
#[derive(Debug, Error, PartialEq)]
#[error("malformed rlp payload: {0}")]
pub struct CodecError(#[from] pub rlp::DecoderError);

/// An account in the rollup state.
///
/// An address missing from the trie is equivalent to the default account for
/// deposits and withdrawals, but transfers require the sender to exist.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, RlpDecodable, RlpEncodable, Deserialize, Serialize,
)]
pub struct Account {
    /// Funds held on the rollup. Never negative; the trie encoding has no
    /// representation for a negative balance.
    pub balance: U256,
    /// Number of transfers sent from this account.
    pub nonce: u64,
}

impl Account {
    /// The canonical trie-leaf encoding of the account.
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Decodes an account from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(rlp::decode(bytes)?)
    }
}

/// A value transfer between two rollup accounts.
///
/// `gas` is carried through for the settlement layer's fee accounting and
/// does not affect the state transition.
#[derive(Clone, Debug, Eq, PartialEq, RlpDecodable, RlpEncodable, Deserialize, Serialize)]
pub struct Transaction {
    /// Sender. Must already exist in the trie.
    pub from: H160,
    /// Recipient. Created on first credit.
    pub to: H160,
    /// Transferred amount.
    pub value: U256,
    /// Fee allowance, passed through opaquely.
    pub gas: U256,
    /// Sender nonce at submission time.
    pub nonce: u64,
}

/// An ordered run of transactions committed on-chain in one go.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Batch {
    /// State root the batch builds on. Must equal the on-chain root at
    /// submission time.
    pub prev_state_root: H256,
    /// State root claimed after applying `transactions`.
    pub state_root: H256,
    /// The batched transfers, in application order.
    pub transactions: Vec<Transaction>,
}

impl Encodable for Batch {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(3);
        stream.append(&self.prev_state_root);
        stream.append(&self.state_root);
        stream.append_list(&self.transactions);
    }
}

impl Decodable for Batch {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        Ok(Self {
            prev_state_root: rlp.val_at(0)?,
            state_root: rlp.val_at(1)?,
            transactions: rlp.list_at(2)?,
        })
    }
}

impl Batch {
    /// The exact byte string submitted to the settlement contract.
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Decodes a batch from its on-chain representation.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(rlp::decode(bytes)?)
    }
}

/// Funds moved onto the rollup through the contract's `deposit` entry point.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Deposit {
    /// The depositing account.
    pub from: H160,
    /// The attached value.
    pub value: U256,
}

/// Funds moved off the rollup through the contract's `withdraw` entry point.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Withdraw {
    /// The withdrawing account.
    pub from: H160,
    /// The withdrawn value (the account's proven balance).
    pub value: U256,
}

/// One item of the settlement contract's event history, in on-chain order.
#[derive(Clone, Debug)]
pub enum Event {
    /// A committed batch.
    Batch(Batch),
    /// A deposit, pending until the next batch boundary.
    Deposit(Deposit),
    /// A withdrawal, pending until the next batch boundary.
    Withdraw(Withdraw),
    /// The producer failed; consumers must abort.
    Fault(GatewayError),
}

/// Everything the settlement contract needs to adjudicate a disputed batch:
/// the offending account with its merkle proof against the state the batch
/// actually produces, and the batch itself.
#[derive(Clone, Debug)]
pub struct FraudEvidence {
    /// The account whose balance the batch drives negative.
    pub address: H160,
    /// Canonical encoding of that account in the replayed state.
    pub account: Vec<u8>,
    /// Merkle proof for `address` against `state_root`.
    pub proof: Vec<Vec<u8>>,
    /// Root of the replayed state at the point the violation surfaced.
    pub state_root: H256,
    /// The disputed batch.
    pub batch: Batch,
}

/// A withdrawal request routed through the gateway on a user's behalf.
#[derive(Clone, Debug)]
pub struct WithdrawRequest {
    /// The withdrawing account.
    pub address: H160,
    /// Canonical encoding of the account being exited.
    pub account: Vec<u8>,
    /// Merkle proof for `address` against `state_root`.
    pub proof: Vec<Vec<u8>>,
    /// A finalized state root covering the proven balance.
    pub state_root: H256,
}

#[cfg(test)]
mod tests {
    use ethereum_types::{H160, H256, U256};

    use super::{Account, Batch, Transaction};

    fn transaction(nonce: u64) -> Transaction {
        Transaction {
            from: H160::repeat_byte(0x11),
            to: H160::repeat_byte(0x22),
            value: U256::from(30),
            gas: U256::from(1_000_000_000u64),
            nonce,
        }
    }

    #[test]
    fn account_round_trips() {
        let account = Account {
            balance: U256::from(1_000_000_000_000u64),
            nonce: 42,
        };

        assert_eq!(Account::decode(&account.encode()), Ok(account));
    }

    #[test]
    fn zero_account_encodes_minimally() {
        // A two-item list of two empty strings: balance and nonce both elide
        // their leading zeroes down to nothing.
        assert_eq!(Account::default().encode(), vec![0xc2, 0x80, 0x80]);
    }

    #[test]
    fn account_decode_rejects_malformed_input() {
        // Too few fields.
        assert!(Account::decode(&[0xc1, 0x80]).is_err());
        // Not a list at all.
        assert!(Account::decode(&[0x80]).is_err());
        // Trailing bytes after a well-formed list.
        let mut bytes = Account::default().encode();
        bytes.push(0x00);
        assert!(Account::decode(&bytes).is_err());
    }

    #[test]
    fn transaction_round_trips() {
        let tx = transaction(7);

        assert_eq!(
            rlp::decode::<Transaction>(&rlp::encode(&tx)).as_ref(),
            Ok(&tx)
        );
    }

    #[test]
    fn batch_round_trips() {
        let batch = Batch {
            prev_state_root: H256::repeat_byte(0x01),
            state_root: H256::repeat_byte(0x02),
            transactions: (0..3).map(transaction).collect(),
        };

        assert_eq!(Batch::decode(&batch.encode()), Ok(batch));
    }

    #[test]
    fn empty_batch_wire_format_is_stable() {
        let batch = Batch {
            prev_state_root: H256::zero(),
            state_root: H256::zero(),
            transactions: Vec::new(),
        };

        // [32-byte root, 32-byte root, empty list] under a long-list header.
        let mut expected = vec![0xf8, 0x43, 0xa0];
        expected.extend_from_slice(&[0u8; 32]);
        expected.push(0xa0);
        expected.extend_from_slice(&[0u8; 32]);
        expected.push(0xc0);

        assert_eq!(batch.encode(), expected);
    }
}
