//! Bridging between alloy primitives (the RPC layer) and `ethereum-types`
//! (the trie and codec layers).

use ethereum_types::{H160, H256, U256};

/// Infallible conversion between the two primitive families.
pub trait Compat<Out> {
    /// Converts `self` into the sibling type.
    fn compat(self) -> Out;
}

impl Compat<H160> for alloy::primitives::Address {
    fn compat(self) -> H160 {
        let alloy::primitives::Address(alloy::primitives::FixedBytes(arr)) = self;
        H160(arr)
    }
}

impl Compat<alloy::primitives::Address> for H160 {
    fn compat(self) -> alloy::primitives::Address {
        let H160(arr) = self;
        alloy::primitives::Address(alloy::primitives::FixedBytes(arr))
    }
}

impl Compat<H256> for alloy::primitives::B256 {
    fn compat(self) -> H256 {
        let alloy::primitives::FixedBytes(arr) = self;
        H256(arr)
    }
}

impl Compat<alloy::primitives::B256> for H256 {
    fn compat(self) -> alloy::primitives::B256 {
        let H256(arr) = self;
        alloy::primitives::FixedBytes(arr)
    }
}

impl Compat<U256> for alloy::primitives::U256 {
    fn compat(self) -> U256 {
        U256(self.into_limbs())
    }
}

impl Compat<alloy::primitives::U256> for U256 {
    fn compat(self) -> alloy::primitives::U256 {
        let U256(limbs) = self;
        alloy::primitives::U256::from_limbs(limbs)
    }
}

#[cfg(test)]
mod tests {
    use ethereum_types::{H160, H256, U256};

    use super::Compat;

    #[test]
    fn round_trips_preserve_bytes() {
        let address = H160::repeat_byte(0x17);
        let hash = H256::repeat_byte(0x42);
        let value = U256::from(123_456_789_000u64);

        let address2: H160 = Compat::<alloy::primitives::Address>::compat(address).compat();
        let hash2: H256 = Compat::<alloy::primitives::B256>::compat(hash).compat();
        let value2: U256 = Compat::<alloy::primitives::U256>::compat(value).compat();

        assert_eq!(address, address2);
        assert_eq!(hash, hash2);
        assert_eq!(value, value2);
    }
}
