//! # Two-Phase Ownership
//!
//! Every admin-gated component carries an [`Ownership`]. Handing it to a new
//! admin takes two calls from the current admin: `commit` names the
//! successor, `apply` makes it so. A typo in `commit` costs one more
//! `commit`, not the keys to the treasury.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;

/// Admin-capability failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    /// The caller is not the current admin.
    #[error("admin only: {caller} is not the admin")]
    NotAdmin {
        /// Address that attempted the call.
        caller: Address,
    },

    /// `apply` was called with no committed successor.
    #[error("no future admin committed")]
    NoFutureAdmin,

    /// The zero address cannot be an admin.
    #[error("admin cannot be the zero address")]
    ZeroAddress,
}

/// Admin capability with a committed-but-not-applied successor slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    admin: Address,
    future_admin: Option<Address>,
}

impl Ownership {
    pub fn new(admin: Address) -> Result<Self, AdminError> {
        if admin.is_zero() {
            return Err(AdminError::ZeroAddress);
        }
        Ok(Self {
            admin,
            future_admin: None,
        })
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn future_admin(&self) -> Option<Address> {
        self.future_admin
    }

    /// Fails unless `caller` is the current admin.
    pub fn ensure_admin(&self, caller: Address) -> Result<(), AdminError> {
        if caller != self.admin {
            return Err(AdminError::NotAdmin { caller });
        }
        Ok(())
    }

    /// Phase one: record `future` as the successor.
    pub fn commit_transfer(&mut self, caller: Address, future: Address) -> Result<(), AdminError> {
        self.ensure_admin(caller)?;
        if future.is_zero() {
            return Err(AdminError::ZeroAddress);
        }
        self.future_admin = Some(future);
        tracing::info!(admin = %self.admin, future = %future, "ownership transfer committed");
        Ok(())
    }

    /// Phase two: promote the committed successor.
    pub fn apply_transfer(&mut self, caller: Address) -> Result<Address, AdminError> {
        self.ensure_admin(caller)?;
        let next = self.future_admin.take().ok_or(AdminError::NoFutureAdmin)?;
        tracing::info!(previous = %self.admin, admin = %next, "ownership transfer applied");
        self.admin = next;
        Ok(next)
    }
}
