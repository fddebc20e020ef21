pub mod contract;
pub mod error;
pub mod msg;
pub mod power;
pub mod queries;
pub mod scripts;
pub mod staking;
pub mod state;
pub mod validation;
