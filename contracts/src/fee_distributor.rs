//! # Fee Distributor
//!
//! Collected fees are paid to lockers pro rata to their ve-balance at each
//! week boundary. Fee tokens land in the distributor's custody account;
//! `checkpoint_token` notices the balance growth and spreads it over the
//! weeks since the previous token checkpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use velock_protocol::config::TOKEN_CHECKPOINT_DEADLINE;
use velock_protocol::{
    Address, AdminError, Amount, CatchUpLimits, FixedMath, MathError, Ownership, Progress,
    Timestamp,
};

use crate::epoch_accountant::{AccountantError, EpochAccountant};
use crate::token::{TokenError, TokenLedger};
use crate::voting_escrow::VotingEscrow;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during fee distribution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    /// Fee deposits must be non-zero.
    #[error("fee amount must be greater than zero")]
    ZeroAmount,

    /// Token checkpoints are admin-only until opened to everyone.
    #[error("unauthorized token checkpoint by {caller}")]
    Unauthorized {
        /// Address that made the call.
        caller: Address,
    },

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Accountant(#[from] AccountantError),

    #[error(transparent)]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// FeeDistributor
// ---------------------------------------------------------------------------

/// Weekly fee buckets and per-user payouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeDistributor {
    ownership: Ownership,
    /// Fee-token account holding undistributed fees.
    custody: Address,
    accountant: EpochAccountant,
    /// Custody balance seen by the last token checkpoint, net of payouts.
    token_last_balance: Amount,
    can_checkpoint_token: bool,
    claimed: HashMap<Address, Amount>,
}

impl FeeDistributor {
    pub fn new(
        admin: Address,
        custody: Address,
        start_time: Timestamp,
        limits: CatchUpLimits,
    ) -> Result<Self, FeeError> {
        Ok(Self {
            ownership: Ownership::new(admin)?,
            custody,
            accountant: EpochAccountant::new(start_time, limits),
            token_last_balance: Amount::zero(),
            can_checkpoint_token: false,
            claimed: HashMap::new(),
        })
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn ownership_mut(&mut self) -> &mut Ownership {
        &mut self.ownership
    }

    pub fn custody(&self) -> Address {
        self.custody
    }

    pub fn accountant(&self) -> &EpochAccountant {
        &self.accountant
    }

    pub fn can_checkpoint_token(&self) -> bool {
        self.can_checkpoint_token
    }

    pub fn token_last_balance(&self) -> Amount {
        self.token_last_balance
    }

    pub fn claimed(&self, user: &Address) -> Amount {
        self.claimed.get(user).copied().unwrap_or_default()
    }

    /// Credited but not yet paid, as of the user's last checkpoint.
    pub fn claimable(&self, user: &Address) -> Amount {
        self.accountant
            .integrate_fraction(user)
            .floor_sub(self.claimed(user))
    }

    /// Moves `amount` fee tokens from `from` into custody.
    pub fn deposit_fees(
        &mut self,
        from: Address,
        amount: Amount,
        token: &mut TokenLedger,
    ) -> Result<(), FeeError> {
        if amount.is_zero() {
            return Err(FeeError::ZeroAmount);
        }
        token.transfer(from, self.custody, amount)?;
        tracing::debug!(from = %from, amount = %amount, "fees deposited");
        Ok(())
    }

    /// Spreads fees received since the last call over the elapsed weeks.
    pub fn checkpoint_token(
        &mut self,
        caller: Address,
        now: Timestamp,
        token: &TokenLedger,
    ) -> Result<Progress, FeeError> {
        if caller != self.ownership.admin() && !self.can_checkpoint_token {
            return Err(FeeError::Unauthorized { caller });
        }
        self.bucket_new_fees(now, token)
    }

    pub fn checkpoint_total_supply(
        &mut self,
        now: Timestamp,
        escrow: &VotingEscrow,
    ) -> Result<Progress, FeeError> {
        Ok(self.accountant.checkpoint_total_supply(now, escrow)?)
    }

    /// Opens or closes `checkpoint_token` to everyone.
    pub fn toggle_allow_checkpoint_token(&mut self, caller: Address) -> Result<bool, FeeError> {
        self.ownership.ensure_admin(caller)?;
        self.can_checkpoint_token = !self.can_checkpoint_token;
        tracing::info!(allowed = self.can_checkpoint_token, "token checkpoint toggled");
        Ok(self.can_checkpoint_token)
    }

    /// Checkpoints what is due and pays `user` everything credited but unpaid.
    pub fn claim(
        &mut self,
        user: Address,
        now: Timestamp,
        escrow: &VotingEscrow,
        token: &mut TokenLedger,
    ) -> Result<Amount, FeeError> {
        if now >= self.accountant.time_cursor() {
            self.accountant.checkpoint_total_supply(now, escrow)?;
        }
        if self.can_checkpoint_token
            && now > self.accountant.token_time_cursor() + TOKEN_CHECKPOINT_DEADLINE
        {
            self.bucket_new_fees(now, token)?;
        }
        self.accountant.user_checkpoint(user, escrow)?;

        let amount = self.claimable(&user);
        if amount.is_zero() {
            return Ok(amount);
        }
        let last_balance = self.token_last_balance.try_sub(amount)?;
        let claimed = self.claimed(&user).try_add(amount)?;
        token.transfer(self.custody, user, amount)?;

        self.token_last_balance = last_balance;
        self.claimed.insert(user, claimed);
        tracing::debug!(user = %user, amount = %amount, "fees claimed");
        Ok(amount)
    }

    fn bucket_new_fees(&mut self, now: Timestamp, token: &TokenLedger) -> Result<Progress, FeeError> {
        let balance = token.balance_of(&self.custody);
        let received = balance.floor_sub(self.token_last_balance);
        self.token_last_balance = balance;
        Ok(self.accountant.distribute_lump(now, received)?)
    }
}
