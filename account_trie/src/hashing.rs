//! RLP encoding of trie nodes and merkle hashing.

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::RlpStream;

use crate::trie::Node;

/// A node as it appears inside its parent's encoding.
#[derive(Clone, Debug)]
pub(crate) enum EncodedNode {
    /// Encoded to fewer than 32 bytes and therefore embedded verbatim.
    Raw(Bytes),
    /// Referenced by the keccak hash of its encoding.
    Hashed([u8; 32]),
}

/// The merkle hash of a (sub)trie rooted at `node`. The root reference is
/// always a hash, even when the encoding is shorter than 32 bytes.
pub(crate) fn node_hash(node: &Node) -> H256 {
    match encode_node(node) {
        EncodedNode::Raw(bytes) => keccak(&bytes),
        EncodedNode::Hashed(hash) => H256(hash),
    }
}

/// Encodes `node` the way its parent refers to it: raw if the encoding is
/// under 32 bytes, hashed otherwise.
pub(crate) fn encode_node(node: &Node) -> EncodedNode {
    match node {
        Node::Empty => EncodedNode::Raw(Bytes::from_static(&rlp::NULL_RLP)),
        _ => {
            let bytes = rlp_encode(node);
            match bytes.len() >= 32 {
                false => EncodedNode::Raw(bytes),
                true => EncodedNode::Hashed(keccak(&bytes).0),
            }
        }
    }
}

/// The full RLP encoding of a single node, child references included.
pub(crate) fn rlp_encode(node: &Node) -> Bytes {
    match node {
        Node::Empty => Bytes::from_static(&rlp::NULL_RLP),
        Node::Branch { children, value } => {
            let mut stream = RlpStream::new_list(17);

            for child in children.iter() {
                append_to_stream(&mut stream, encode_node(child));
            }

            match value.is_empty() {
                false => stream.append(value),
                true => stream.append_empty_data(),
            };

            stream.out().into()
        }
        Node::Extension { nibbles, child } => {
            let mut stream = RlpStream::new_list(2);

            stream.append(&nibbles.to_hex_prefix_encoding(false));
            append_to_stream(&mut stream, encode_node(child));

            stream.out().into()
        }
        Node::Leaf { nibbles, value } => {
            let mut stream = RlpStream::new_list(2);

            stream.append(&nibbles.to_hex_prefix_encoding(true));
            stream.append(value);

            stream.out().into()
        }
    }
}

fn append_to_stream(stream: &mut RlpStream, node: EncodedNode) {
    match node {
        EncodedNode::Raw(bytes) => stream.append_raw(&bytes, 1),
        EncodedNode::Hashed(hash) => stream.append(&hash.as_ref()),
    };
}
