use std::sync::Arc;

use eth_trie::{EthTrie, MemoryDB, Trie as _};
use ethereum_types::H160;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::trie::Trie;

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

pub(crate) fn generate_n_random_entries(n: usize, seed: u64) -> Vec<(H160, Vec<u8>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let key = H160(rng.gen());
            // Mix values below and above the 32-byte node embedding threshold
            // so both raw and hashed child refs show up.
            let len = rng.gen_range(1..=64);
            let value = (0..len).map(|_| rng.gen()).collect();
            (key, value)
        })
        .collect()
}

pub(crate) fn trie_with(entries: &[(H160, Vec<u8>)]) -> Trie {
    let mut trie = Trie::new();
    for (key, value) in entries {
        trie.insert(*key, value.clone());
    }

    trie
}

/// The `eth_trie` crate acts as the ground-truth oracle for roots and proofs.
pub(crate) fn reference_trie(entries: &[(H160, Vec<u8>)]) -> EthTrie<MemoryDB> {
    let mut reference = EthTrie::new(Arc::new(MemoryDB::new(true)));
    for (key, value) in entries {
        reference.insert(key.as_bytes(), value).unwrap();
    }

    reference
}
