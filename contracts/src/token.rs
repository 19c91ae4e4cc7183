//! # Token Ledger
//!
//! Plain fungible-token bookkeeping: balances, total supply, transfer,
//! mint, burn. This is the collaborator boundary the accounting engine
//! locks, mints into and pays out of. It knows nothing about emission
//! rules. Minting authority is enforced by the
//! [`InflationSchedule`](crate::inflation::InflationSchedule), not here.
//!
//! ## Invariants
//!
//! - `total_supply == Σ balances` after every successful call.
//! - A failed call leaves the ledger untouched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use velock_protocol::{Address, Amount, FixedMath, MathError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during token ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The account does not hold enough tokens.
    #[error("insufficient balance: {account} has {balance}, needs {amount}")]
    InsufficientBalance {
        /// Account being debited.
        account: Address,
        /// Its current balance.
        balance: Amount,
        /// Amount requested.
        amount: Amount,
    },

    /// Tokens cannot be created at, or sent to, the zero address.
    #[error("zero address")]
    ZeroAddress,

    /// Supply arithmetic failed.
    #[error(transparent)]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// TokenLedger
// ---------------------------------------------------------------------------

/// In-memory balances for a single token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLedger {
    /// Ticker symbol, for logs.
    symbol: String,
    /// Sum of all balances.
    total_supply: Amount,
    /// Per-account balances. Absent means zero.
    balances: HashMap<Address, Amount>,
}

impl TokenLedger {
    /// Creates an empty ledger.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            total_supply: Amount::zero(),
            balances: HashMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Balance of `account`, zero if it never held any.
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or_default()
    }

    /// Creates `amount` new tokens at `to`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ZeroAddress`] for the zero address and
    /// [`TokenError::Math`] if the supply would overflow.
    pub fn mint(&mut self, to: Address, amount: Amount) -> Result<(), TokenError> {
        if to.is_zero() {
            return Err(TokenError::ZeroAddress);
        }
        let supply = self.total_supply.try_add(amount)?;
        let balance = self.balance_of(&to).try_add(amount)?;
        self.total_supply = supply;
        self.balances.insert(to, balance);
        Ok(())
    }

    /// Destroys `amount` tokens held by `from`.
    pub fn burn(&mut self, from: Address, amount: Amount) -> Result<(), TokenError> {
        let balance = self.debit_preview(from, amount)?;
        self.total_supply = self.total_supply.try_sub(amount)?;
        self.balances.insert(from, balance);
        Ok(())
    }

    /// Moves `amount` from `from` to `to`.
    pub fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), TokenError> {
        if to.is_zero() {
            return Err(TokenError::ZeroAddress);
        }
        if from == to {
            self.debit_preview(from, amount)?;
            return Ok(());
        }
        let from_balance = self.debit_preview(from, amount)?;
        let to_balance = self.balance_of(&to).try_add(amount)?;
        self.balances.insert(from, from_balance);
        self.balances.insert(to, to_balance);
        Ok(())
    }

    /// Balance `from` would have after paying `amount`, without touching state.
    fn debit_preview(&self, from: Address, amount: Amount) -> Result<Amount, TokenError> {
        let balance = self.balance_of(&from);
        balance
            .try_sub(amount)
            .map_err(|_| TokenError::InsufficientBalance {
                account: from,
                balance,
                amount,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::from_low_u64(0xA);
    const BOB: Address = Address::from_low_u64(0xB);

    fn amt(n: u64) -> Amount {
        Amount::from(n)
    }

    #[test]
    fn mint_increases_supply_and_balance() {
        let mut token = TokenLedger::new("VLK");
        token.mint(ALICE, amt(1_000)).unwrap();
        assert_eq!(token.total_supply(), amt(1_000));
        assert_eq!(token.balance_of(&ALICE), amt(1_000));
    }

    #[test]
    fn mint_to_zero_rejected() {
        let mut token = TokenLedger::new("VLK");
        assert_eq!(token.mint(Address::ZERO, amt(1)), Err(TokenError::ZeroAddress));
    }

    #[test]
    fn transfer_moves_balance() {
        let mut token = TokenLedger::new("VLK");
        token.mint(ALICE, amt(100)).unwrap();
        token.transfer(ALICE, BOB, amt(40)).unwrap();
        assert_eq!(token.balance_of(&ALICE), amt(60));
        assert_eq!(token.balance_of(&BOB), amt(40));
        assert_eq!(token.total_supply(), amt(100));
    }

    #[test]
    fn overdraft_rejected_without_side_effects() {
        let mut token = TokenLedger::new("VLK");
        token.mint(ALICE, amt(10)).unwrap();
        let err = token.transfer(ALICE, BOB, amt(11)).unwrap_err();
        assert!(matches!(err, TokenError::InsufficientBalance { .. }));
        assert_eq!(token.balance_of(&ALICE), amt(10));
        assert_eq!(token.balance_of(&BOB), amt(0));
    }

    #[test]
    fn burn_decreases_supply() {
        let mut token = TokenLedger::new("VLK");
        token.mint(ALICE, amt(100)).unwrap();
        token.burn(ALICE, amt(30)).unwrap();
        assert_eq!(token.total_supply(), amt(70));
        assert!(token.burn(BOB, amt(1)).is_err());
    }
}
