pub mod config;
pub mod distribution;
pub mod staking;
