//! # velock Contracts
//!
//! The accounting engine behind vote-escrowed governance. Users lock tokens
//! for up to four years and receive voting power that decays linearly to
//! zero at unlock. That power steers emission between reward channels and
//! entitles lockers to a share of collected fees:
//!
//! - **Voting Escrow**: per-user and global piecewise-linear power
//!   histories, queried at any past time or block.
//! - **Gauge Controller**: typed channels, admin weights and user votes,
//!   aggregated into per-week relative weights.
//! - **Inflation**: a stepped emission curve that decays every year.
//! - **Epoch Accountant**: weekly buckets, weekly supply snapshots and exact
//!   per-user credit, shared by reward channels and the fee distributor.
//! - **Minter**: turns channel credit into minted tokens, at most once.
//! - **Engine**: one facade over all of the above, with snapshots.
//!
//! ## Design Principles
//!
//! 1. All amount arithmetic is checked 256-bit fixed point. Division
//!    truncates, overflow is an error.
//! 2. Every loop over elapsed weeks is bounded and resumable. Stopping early
//!    is reported, never an error, and never loses work.
//! 3. Validation happens before the first state write.
//! 4. Every public type is serializable (serde) for snapshots.

pub mod engine;
pub mod epoch_accountant;
pub mod fee_distributor;
pub mod gauge_controller;
pub mod inflation;
pub mod minter;
pub mod reward_channel;
pub mod token;
pub mod voting_escrow;

pub use engine::{
    ChannelStatus, Component, Engine, EngineError, EngineResult, EngineStatus, ErrorKind,
    SyncReport,
};
pub use epoch_accountant::EpochAccountant;
pub use fee_distributor::FeeDistributor;
pub use gauge_controller::GaugeController;
pub use inflation::InflationSchedule;
pub use minter::Minter;
pub use reward_channel::RewardChannel;
pub use token::TokenLedger;
pub use voting_escrow::{LockedBalance, VotingEscrow};
