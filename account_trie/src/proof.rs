//! Merkle proof generation and verification.
//!
//! A proof is the ordered list of RLP-encoded nodes on a key's path, root
//! first. Nodes whose encoding is shorter than 32 bytes are embedded in
//! their parent and do not appear as separate items, matching what the
//! settlement contract (and every Ethereum trie implementation) expects.

use std::collections::HashMap;

use ethereum_types::{H160, H256};
use keccak_hash::keccak;
use rlp::Rlp;
use thiserror::Error;

use crate::{
    hashing::rlp_encode,
    nibbles::{FromHexPrefixError, Nibbles},
    trie::Node,
};

/// An error that occurs when checking a merkle proof.
#[derive(Debug, Error)]
pub enum ProofError {
    /// A proof node did not parse as RLP.
    #[error("malformed proof node: {0}")]
    Rlp(#[from] rlp::DecoderError),

    /// A leaf or extension path did not parse.
    #[error(transparent)]
    HexPrefix(#[from] FromHexPrefixError),

    /// A referenced node is not present in the proof.
    #[error("proof does not contain the node with hash {0:#x}")]
    MissingNode(H256),

    /// A node had a shape no trie node can have.
    #[error("proof node is neither a branch nor a leaf/extension (items: {0})")]
    UnexpectedNode(usize),

    /// A branch was deeper than the fixed key width allows.
    #[error("proof path is longer than the key")]
    PathExhausted,

    /// A child reference was neither empty, a hash, nor an embedded node.
    #[error("invalid child reference of {0} bytes")]
    InvalidChildReference(usize),
}

/// Walks `root` along `key` and returns the proof nodes.
pub(crate) fn collect_proof(root: &Node, mut key: Nibbles) -> Vec<Vec<u8>> {
    let mut path: Vec<&Node> = Vec::new();
    let mut node = root;

    loop {
        match node {
            Node::Empty => {
                // Only reachable as the root: branches never point at Empty
                // on a traversed path without the walk stopping there.
                if path.is_empty() {
                    path.push(node);
                }
                break;
            }
            Node::Branch { children, .. } => {
                path.push(node);
                let nib = key.pop_next_nibble_front();
                match children[nib as usize].as_ref() {
                    Node::Empty => break,
                    child => node = child,
                }
            }
            Node::Extension { nibbles, child } => {
                path.push(node);
                if !key.starts_with(nibbles) {
                    break;
                }
                key = key.truncate_n_nibbles_front(nibbles.count());
                node = child.as_ref();
            }
            Node::Leaf { .. } => {
                path.push(node);
                break;
            }
        }
    }

    path.iter()
        .enumerate()
        .filter_map(|(i, node)| {
            let encoded = rlp_encode(node);
            // Embedded nodes travel inside their parent; the root is always
            // its own proof item.
            (i == 0 || encoded.len() >= 32).then(|| encoded.to_vec())
        })
        .collect()
}

/// Where the verifier goes after consuming one node.
enum Step {
    /// The walk ended: `Some` value proves inclusion, `None` exclusion.
    Done(Option<Vec<u8>>),
    /// Follow a child reference.
    Descend(NodeRef),
}

enum NodeRef {
    Hash(H256),
    Inline(Vec<u8>),
}

/// Checks `proof` for `key` against `root_hash`.
///
/// Nodes are looked up by the keccak hash of their encoding, so proof item
/// order does not matter and unused items are ignored. Returns the proven
/// value for an included key, or `None` when the proof demonstrates the key
/// is absent from the trie with that root.
pub fn verify_proof(
    root_hash: H256,
    key: H160,
    proof: &[Vec<u8>],
) -> Result<Option<Vec<u8>>, ProofError> {
    let nodes: HashMap<H256, &Vec<u8>> = proof.iter().map(|item| (keccak(item), item)).collect();
    let lookup = |hash: H256| {
        nodes
            .get(&hash)
            .map(|item| item.to_vec())
            .ok_or(ProofError::MissingNode(hash))
    };

    let mut key = Nibbles::from(key);
    let mut current = lookup(root_hash)?;

    loop {
        let step = {
            let node = Rlp::new(&current);
            walk_node(&node, &mut key)?
        };

        current = match step {
            Step::Done(value) => return Ok(value),
            Step::Descend(NodeRef::Inline(raw)) => raw,
            Step::Descend(NodeRef::Hash(expected)) => lookup(expected)?,
        };
    }
}

fn walk_node(node: &Rlp, key: &mut Nibbles) -> Result<Step, ProofError> {
    // The empty trie proves every key absent.
    if node.is_data() && node.data()?.is_empty() {
        return Ok(Step::Done(None));
    }

    match node.item_count()? {
        17 => {
            if key.is_empty() {
                return Err(ProofError::PathExhausted);
            }
            let nib = key.pop_next_nibble_front();
            match child_ref(&node.at(nib as usize)?)? {
                Some(child) => Ok(Step::Descend(child)),
                None => Ok(Step::Done(None)),
            }
        }
        2 => {
            let (path, is_leaf) = Nibbles::from_hex_prefix_encoding(node.at(0)?.data()?)?;
            if is_leaf {
                match path == *key {
                    true => Ok(Step::Done(Some(node.at(1)?.data()?.to_vec()))),
                    false => Ok(Step::Done(None)),
                }
            } else {
                if !key.starts_with(&path) {
                    return Ok(Step::Done(None));
                }
                *key = key.truncate_n_nibbles_front(path.count());
                match child_ref(&node.at(1)?)? {
                    Some(child) => Ok(Step::Descend(child)),
                    None => Ok(Step::Done(None)),
                }
            }
        }
        count => Err(ProofError::UnexpectedNode(count)),
    }
}

fn child_ref(child: &Rlp) -> Result<Option<NodeRef>, ProofError> {
    if child.is_data() {
        let data = child.data()?;
        match data.len() {
            0 => Ok(None),
            32 => Ok(Some(NodeRef::Hash(H256::from_slice(data)))),
            len => Err(ProofError::InvalidChildReference(len)),
        }
    } else {
        Ok(Some(NodeRef::Inline(child.as_raw().to_vec())))
    }
}
