//! The trie itself: node types, lookups, inserts and snapshots.

use std::sync::Arc;

use ethereum_types::{H160, H256};
use log::trace;

use crate::{
    hashing::node_hash,
    nibbles::{Nibble, Nibbles},
    proof::collect_proof,
};

/// A child pointer. Children are shared between snapshots, so mutating one
/// trie rebuilds the spine down to the touched leaf and leaves every other
/// node untouched.
pub(crate) type Child = Arc<Node>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) enum Node {
    #[default]
    Empty,
    Branch {
        children: [Child; 16],
        // Always empty with fixed-width keys, but kept so that the node
        // encodes as the 17-item list the settlement contract expects.
        value: Vec<u8>,
    },
    Extension {
        nibbles: Nibbles,
        child: Child,
    },
    Leaf {
        nibbles: Nibbles,
        value: Vec<u8>,
    },
}

fn new_branch_child_arr() -> [Child; 16] {
    std::array::from_fn(|_| Arc::new(Node::Empty))
}

/// A Merkle-Patricia trie keyed by 20-byte addresses.
///
/// `clone` is the snapshot operation: it is O(1), shares all nodes with the
/// parent, and writes to either side never show up in the other.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Trie {
    pub(crate) root: Node,
}

impl Trie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: H160) -> Option<&[u8]> {
        let mut key = Nibbles::from(key);
        let mut node = &self.root;

        loop {
            match node {
                Node::Empty => return None,
                Node::Branch { children, .. } => {
                    let nib = key.pop_next_nibble_front();
                    trace!("get traversed Branch (nibble: {:x})", nib);
                    node = children[nib as usize].as_ref();
                }
                Node::Extension { nibbles, child } => {
                    trace!("get traversed Extension (nibbles: {})", nibbles);
                    if !key.starts_with(nibbles) {
                        return None;
                    }
                    key = key.truncate_n_nibbles_front(nibbles.count());
                    node = child.as_ref();
                }
                Node::Leaf { nibbles, value } => {
                    trace!("get traversed Leaf (nibbles: {})", nibbles);
                    return (*nibbles == key).then_some(value.as_slice());
                }
            }
        }
    }

    /// Returns `true` if `key` has a value in the trie.
    pub fn contains(&self, key: H160) -> bool {
        self.get(key).is_some()
    }

    /// Inserts `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: H160, value: Vec<u8>) {
        let key = Nibbles::from(key);
        trace!("inserting value under {}", key);
        self.root = insert_rec(&self.root, key, value);
    }

    /// The merkle root summarizing the current contents.
    pub fn root_hash(&self) -> H256 {
        node_hash(&self.root)
    }

    /// Produces a merkle proof for `key` against the current root: the
    /// ordered RLP encodings of the nodes on the key's path. For an absent
    /// key the path ends at the diverging node and proves exclusion.
    pub fn prove(&self, key: H160) -> Vec<Vec<u8>> {
        collect_proof(&self.root, Nibbles::from(key))
    }
}

fn insert_rec(node: &Node, mut key: Nibbles, value: Vec<u8>) -> Node {
    match node {
        Node::Empty => Node::Leaf { nibbles: key, value },
        Node::Branch {
            children,
            value: branch_value,
        } => {
            let nib = key.pop_next_nibble_front();
            let updated = Arc::new(insert_rec(children[nib as usize].as_ref(), key, value));

            let mut children = children.clone();
            children[nib as usize] = updated;
            Node::Branch {
                children,
                value: branch_value.clone(),
            }
        }
        Node::Extension { nibbles, child } => {
            let common = key.common_prefix_count(nibbles);
            if common == nibbles.count() {
                let rest = key.truncate_n_nibbles_front(common);
                return Node::Extension {
                    nibbles: nibbles.clone(),
                    child: Arc::new(insert_rec(child.as_ref(), rest, value)),
                };
            }

            // The paths diverge inside the extension: split it around a new
            // branch. Whatever of the extension survives past the branch
            // nibble stays as a shorter extension in front of the old child.
            let existing_postfix = nibbles.truncate_n_nibbles_front(common);
            let surviving = existing_postfix.truncate_n_nibbles_front(1);
            let existing_node = match surviving.is_empty() {
                true => child.clone(),
                false => Arc::new(Node::Extension {
                    nibbles: surviving,
                    child: child.clone(),
                }),
            };

            split_into_branch(
                key.prefix(common),
                existing_postfix.first().expect("paths diverge inside the extension"),
                existing_node,
                key.truncate_n_nibbles_front(common),
                value,
            )
        }
        Node::Leaf {
            nibbles,
            value: existing_value,
        } => {
            if *nibbles == key {
                return Node::Leaf { nibbles: key, value };
            }

            let common = key.common_prefix_count(nibbles);
            let existing_node = Arc::new(Node::Leaf {
                nibbles: nibbles.truncate_n_nibbles_front(common + 1),
                value: existing_value.clone(),
            });

            split_into_branch(
                key.prefix(common),
                nibbles.truncate_n_nibbles_front(common).first().expect(
                    "fixed-width keys that differ must diverge before the leaf path ends",
                ),
                existing_node,
                key.truncate_n_nibbles_front(common),
                value,
            )
        }
    }
}

/// Places an existing node and a freshly inserted value side by side in a new
/// branch, prefixed by an extension when they share a path prefix.
fn split_into_branch(
    common_prefix: Nibbles,
    existing_nibble: Nibble,
    existing_node: Child,
    mut new_postfix: Nibbles,
    value: Vec<u8>,
) -> Node {
    let new_nibble = new_postfix.pop_next_nibble_front();
    debug_assert_ne!(existing_nibble, new_nibble);

    let mut children = new_branch_child_arr();
    children[existing_nibble as usize] = existing_node;
    children[new_nibble as usize] = Arc::new(Node::Leaf {
        nibbles: new_postfix,
        value,
    });

    let branch = Node::Branch {
        children,
        value: Vec::new(),
    };

    match common_prefix.is_empty() {
        true => branch,
        false => Node::Extension {
            nibbles: common_prefix,
            child: Arc::new(branch),
        },
    }
}

#[cfg(test)]
mod tests {
    use eth_trie::Trie as _;
    use ethereum_types::{H160, H256};
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    use super::Trie;
    use crate::testing_utils::{
        common_setup, generate_n_random_entries, reference_trie, trie_with,
    };

    /// Root of the empty trie: `keccak(rlp(""))`.
    const EMPTY_TRIE_ROOT: &str = "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421";

    fn addr(byte: u8) -> H160 {
        H160::repeat_byte(byte)
    }

    #[test]
    fn empty_trie_hashes_to_canonical_root() {
        common_setup();
        let expected = H256::from_slice(&hex::decode(EMPTY_TRIE_ROOT).unwrap());

        assert_eq!(Trie::new().root_hash(), expected);
    }

    #[test]
    fn inserted_values_are_retrievable() {
        common_setup();
        let entries = generate_n_random_entries(100, 0xdead);
        let trie = trie_with(&entries);

        for (key, value) in &entries {
            assert_eq!(trie.get(*key), Some(value.as_slice()));
        }
        assert!(!trie.contains(addr(0xfe)));
    }

    #[test]
    fn insert_replaces_existing_value() {
        common_setup();

        let mut trie = Trie::new();
        trie.insert(addr(0x11), vec![1]);
        trie.insert(addr(0x11), vec![2]);

        let mut direct = Trie::new();
        direct.insert(addr(0x11), vec![2]);

        assert_eq!(trie.get(addr(0x11)), Some([2].as_slice()));
        assert_eq!(trie.root_hash(), direct.root_hash());
    }

    #[test]
    fn root_is_insertion_order_independent() {
        common_setup();
        let entries = generate_n_random_entries(50, 0xbeef);

        let mut shuffled = entries.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(7));

        assert_eq!(trie_with(&entries).root_hash(), trie_with(&shuffled).root_hash());
    }

    #[test]
    fn roots_match_reference_implementation() {
        common_setup();
        let entries = generate_n_random_entries(200, 0xfeed);

        let trie = trie_with(&entries);
        let mut reference = reference_trie(&entries);

        assert_eq!(trie.root_hash(), reference.root_hash().unwrap());
    }

    #[test]
    fn snapshots_do_not_observe_each_others_writes() {
        common_setup();

        let mut parent = Trie::new();
        parent.insert(addr(0x01), vec![1]);
        parent.insert(addr(0x02), vec![2]);

        let mut snapshot = parent.clone();
        assert_eq!(parent.root_hash(), snapshot.root_hash());

        parent.insert(addr(0x03), vec![3]);
        snapshot.insert(addr(0x02), vec![0xff]);

        assert!(!snapshot.contains(addr(0x03)));
        assert_eq!(parent.get(addr(0x02)), Some([2].as_slice()));
        assert_eq!(snapshot.get(addr(0x02)), Some([0xff].as_slice()));
        assert_ne!(parent.root_hash(), snapshot.root_hash());
    }
}
