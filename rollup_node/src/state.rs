//! Account semantics on top of the raw trie: lookups, funding moves and the
//! canonical transfer primitive.

use account_trie::Trie;
use ethereum_types::{H160, H256, U256};
use thiserror::Error;
use tracing::trace;

use crate::types::{Account, CodecError, Transaction};

/// Result shorthand for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// An error that occurs when reading or mutating the account state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The address has no account in the trie.
    #[error("no account registered for address {0:?}")]
    AccountNotFound(H160),

    /// A debit would push the account's balance below zero. For the
    /// challenger this is the fraud signal, not a local fault.
    #[error("balance of {0:?} cannot cover the requested debit")]
    InvalidBalance(H160),

    /// A stored account failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The rollup account state: address-keyed merkle trie of [`Account`]s.
///
/// [`snapshot`][Self::snapshot] produces an isolated copy sharing all
/// unchanged nodes with its parent, which is what the speculative replay of
/// a disputed batch runs against.
#[derive(Clone, Debug, Default)]
pub struct OptimisticTrie {
    trie: Trie,
}

impl OptimisticTrie {
    /// Creates an empty account state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the account stored under `address`.
    pub fn account(&self, address: H160) -> StateResult<Account> {
        match self.trie.get(address) {
            None => Err(StateError::AccountNotFound(address)),
            Some(bytes) => Ok(Account::decode(bytes)?),
        }
    }

    /// Writes `account` under `address` and returns the new state root.
    ///
    /// Writing the default account is a real write: an explicit
    /// `{balance: 0, nonce: 0}` entry is distinguishable from an absent one.
    pub fn update_account(&mut self, address: H160, account: &Account) -> H256 {
        self.trie.insert(address, account.encode());

        self.state_root()
    }

    /// The merkle root summarizing the full account set.
    pub fn state_root(&self) -> H256 {
        self.trie.root_hash()
    }

    /// Merkle proof for `address` against the current root.
    pub fn prove(&self, address: H160) -> Vec<Vec<u8>> {
        self.trie.prove(address)
    }

    /// An isolated copy for speculative execution.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Credits `value` to `address`, creating the account if needed.
    pub fn add_funds(&mut self, address: H160, value: U256) -> StateResult<H256> {
        let account = match self.account(address) {
            Ok(mut account) => {
                account.balance += value;
                account
            }
            Err(StateError::AccountNotFound(_)) => Account {
                balance: value,
                nonce: 0,
            },
            Err(e) => return Err(e),
        };
        trace!(address = ?address, balance = %account.balance, "credited account");

        Ok(self.update_account(address, &account))
    }

    /// Debits `value` from `address`.
    ///
    /// A missing account is treated as the default account, so any non-zero
    /// debit from it reports [`StateError::InvalidBalance`] rather than
    /// conjuring funds.
    pub fn remove_funds(&mut self, address: H160, value: U256) -> StateResult<H256> {
        let mut account = match self.account(address) {
            Ok(account) => account,
            Err(StateError::AccountNotFound(_)) => Account::default(),
            Err(e) => return Err(e),
        };
        if account.balance < value {
            return Err(StateError::InvalidBalance(address));
        }
        account.balance -= value;
        trace!(address = ?address, balance = %account.balance, "debited account");

        Ok(self.update_account(address, &account))
    }

    /// Applies a transfer: debits the sender, credits the recipient
    /// (creating it on first touch) and bumps the sender's nonce.
    ///
    /// The sender must exist; an underfunded sender reports
    /// [`StateError::InvalidBalance`] and leaves the state untouched.
    pub fn process_tx(&mut self, tx: &Transaction) -> StateResult<H256> {
        let mut from = self.account(tx.from)?;
        if from.balance < tx.value {
            return Err(StateError::InvalidBalance(tx.from));
        }

        // Self-transfers move no funds but still consume the nonce.
        if tx.from == tx.to {
            from.nonce += 1;
            return Ok(self.update_account(tx.from, &from));
        }

        let mut to = match self.account(tx.to) {
            Ok(account) => account,
            Err(StateError::AccountNotFound(_)) => Account::default(),
            Err(e) => return Err(e),
        };

        from.balance -= tx.value;
        to.balance += tx.value;
        from.nonce += 1;

        self.update_account(tx.from, &from);
        Ok(self.update_account(tx.to, &to))
    }
}

#[cfg(test)]
mod tests {
    use ethereum_types::{H160, U256};

    use super::{OptimisticTrie, StateError};
    use crate::types::{Account, Transaction};

    const A: H160 = H160::repeat_byte(0xaa);
    const B: H160 = H160::repeat_byte(0xbb);

    fn transfer(from: H160, to: H160, value: u64, nonce: u64) -> Transaction {
        Transaction {
            from,
            to,
            value: U256::from(value),
            gas: U256::zero(),
            nonce,
        }
    }

    fn funded(address: H160, balance: u64) -> OptimisticTrie {
        let mut state = OptimisticTrie::new();
        state.add_funds(address, U256::from(balance)).unwrap();
        state
    }

    #[test]
    fn transfer_moves_funds_and_bumps_nonce() {
        let mut state = funded(A, 100);
        state.process_tx(&transfer(A, B, 30, 0)).unwrap();

        assert_eq!(
            state.account(A).unwrap(),
            Account { balance: U256::from(70), nonce: 1 }
        );
        assert_eq!(
            state.account(B).unwrap(),
            Account { balance: U256::from(30), nonce: 0 }
        );
    }

    #[test]
    fn underfunded_transfer_leaves_state_untouched() {
        let mut state = funded(A, 10);
        let root_before = state.state_root();

        let err = state.process_tx(&transfer(A, B, 50, 0)).unwrap_err();

        assert!(matches!(err, StateError::InvalidBalance(addr) if addr == A));
        assert_eq!(state.state_root(), root_before);
        assert!(state.account(B).is_err());
    }

    #[test]
    fn transfer_from_unknown_sender_is_rejected() {
        let mut state = OptimisticTrie::new();

        let err = state.process_tx(&transfer(A, B, 1, 0)).unwrap_err();

        assert!(matches!(err, StateError::AccountNotFound(addr) if addr == A));
    }

    #[test]
    fn self_transfer_only_consumes_the_nonce() {
        let mut state = funded(A, 100);
        state.process_tx(&transfer(A, A, 40, 0)).unwrap();

        assert_eq!(
            state.account(A).unwrap(),
            Account { balance: U256::from(100), nonce: 1 }
        );
    }

    #[test]
    fn zero_value_transfer_creates_recipient_and_bumps_nonce() {
        let mut state = funded(A, 100);
        state.process_tx(&transfer(A, B, 0, 0)).unwrap();

        assert_eq!(
            state.account(A).unwrap(),
            Account { balance: U256::from(100), nonce: 1 }
        );
        // The recipient exists explicitly, even as the default account.
        assert_eq!(state.account(B).unwrap(), Account::default());
    }

    #[test]
    fn add_funds_creates_or_credits() {
        let mut state = OptimisticTrie::new();
        state.add_funds(A, U256::from(5)).unwrap();
        state.add_funds(A, U256::from(7)).unwrap();

        assert_eq!(
            state.account(A).unwrap(),
            Account { balance: U256::from(12), nonce: 0 }
        );
    }

    #[test]
    fn remove_funds_from_missing_account_reports_invalid_balance() {
        let mut state = OptimisticTrie::new();

        let err = state.remove_funds(A, U256::from(1)).unwrap_err();

        assert!(matches!(err, StateError::InvalidBalance(addr) if addr == A));
    }

    #[test]
    fn remove_funds_debits_existing_accounts() {
        let mut state = funded(A, 9);
        state.remove_funds(A, U256::from(4)).unwrap();

        assert_eq!(
            state.account(A).unwrap(),
            Account { balance: U256::from(5), nonce: 0 }
        );
    }

    #[test]
    fn snapshot_diverges_only_through_subsequent_writes() {
        let mut state = funded(A, 100);
        let mut shadow = state.snapshot();
        assert_eq!(state.state_root(), shadow.state_root());

        shadow.process_tx(&transfer(A, B, 30, 0)).unwrap();

        assert_ne!(state.state_root(), shadow.state_root());
        assert_eq!(state.account(A).unwrap().balance, U256::from(100));
        assert!(state.account(B).is_err());
        assert_eq!(shadow.account(B).unwrap().balance, U256::from(30));
    }
}
