use cosmwasm_std::StdError;
use cw_controllers::AdminError;
use cw_utils::PaymentError;
use hex::FromHexError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ContractError {
    #[error("{0}")]
    Std(#[from] StdError),
    #[error("{0}")]
    Admin(#[from] AdminError),
    #[error("{0}")]
    Payment(#[from] PaymentError),
    #[error("{0}")]
    Hex(#[from] FromHexError),
    #[error("{0}")]
    Adaptor(#[from] staking_adaptor::error::Error),
    #[error("{0}")]
    Bip322(#[from] staking_bip322::error::Error),
    // Malformed inputs
    #[error("Invalid BTC tx: {0}")]
    InvalidBtcTx(String),
    #[error("Invalid BTC tx hash: {0}")]
    InvalidTxHash(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid lock time: {0} is over the maximum of {1} blocks")]
    InvalidLockTime(u32, u32),
    #[error("Time-based lock times are not allowed")]
    InvalidLockType {},
    #[error("Invalid staking time: {0} blocks does not fit a script time lock")]
    InvalidStakingTime(u64),
    #[error("Description field {0} is too long: {1} chars, max {2}")]
    DescriptionTooLong(&'static str, usize, usize),
    #[error("Missing finality provider description")]
    MissingDescription {},
    #[error("Missing proof of possession")]
    MissingProofOfPossession {},
    #[error("Unknown proof of possession type: {0}")]
    UnknownPopType(i32),
    #[error("Missing the signer Bitcoin address of a BIP-322 proof of possession")]
    MissingPopAddress {},
    #[error("Empty finality provider list")]
    EmptyFpList {},
    #[error("Duplicate finality provider key: {0}")]
    DuplicateFpKey(String),
    #[error("Empty unbonding tx")]
    EmptyUnbondingTx {},
    #[error("Empty slashing tx")]
    EmptySlashingTx {},
    #[error("Empty signature from the delegator")]
    EmptySignature {},
    #[error("Invalid slashing rate: {0}")]
    InvalidSlashingRate(String),
    #[error("Transaction input count mismatch: expected {0}, got {1}")]
    TxInputCountMismatch(usize, usize),
    #[error("Failed to compute sighash: {0}")]
    SighashError(String),
    #[error("A multisig script requires at least two keys")]
    InsufficientMultisigKeys {},
    #[error("Duplicate keys in a multisig script")]
    DuplicateKeys {},
    #[error("Quorum exceeds the key count of a multisig script")]
    QuorumExceedsKeyCount {},
    #[error("Failed to add a leaf to the taproot tree")]
    AddLeafFailed {},
    #[error("Failed to finalize the taproot tree")]
    FinalizeTaprootFailed {},
    // Policy violations
    #[error("Finality provider already exists: {0}")]
    FinalityProviderAlreadyExists(String),
    #[error("Finality provider not found: {0}")]
    FinalityProviderNotFound(String),
    #[error("Finality provider is slashed: {0}")]
    FinalityProviderSlashed(String),
    #[error("Commission rate {0} is below the minimum of {1}")]
    CommissionTooLow(String, String),
    #[error("Commission rate {0} is over 100%")]
    CommissionTooHigh(String),
    #[error("Staking tx hash already exists: {0}")]
    DelegationAlreadyExists(String),
    #[error("Delegation not found: {0}")]
    DelegationNotFound(String),
    #[error("Staking tx is not deep enough: started at BTC height {start_height}, tip is {btc_tip}, required depth {depth}")]
    StakingTxNotDeepEnough {
        start_height: u64,
        btc_tip: u64,
        depth: u64,
    },
    #[error("Staking time-lock ends at BTC height {end_height} which leaves less than {timeout} blocks past the tip {btc_tip}")]
    StakingTimeLockTooShort {
        end_height: u64,
        btc_tip: u64,
        timeout: u64,
    },
    #[error("Unbonding time {0} is below the minimum of {1} blocks")]
    UnbondingTimeTooShort(u32, u32),
    #[error("Unbonding tx must spend the staking output")]
    UnbondingTxNotSpendingStakingOutput {},
    #[error("Slashing tx must spend the funding output")]
    SlashingTxNotSpendingFundingOutput {},
    #[error("Slashing tx slashes {0} satoshis, below the minimum of {1}")]
    SlashingAmountTooLow(u64, u64),
    #[error("Slashing tx must pay to the configured slashing address")]
    WrongSlashingOutput {},
    #[error("Invalid slashing tx change output script")]
    WrongSlashingChangeOutput {},
    #[error("Slashing tx fee {0} is below the minimum of {1} satoshis")]
    SlashingFeeTooLow(u64, u64),
    #[error("Slashing tx outputs must not spend more than the funding output")]
    SlashingOverspends {},
    #[error("Transaction contains dust outputs")]
    DustOutput {},
    #[error("Not a covenant committee member: {0}")]
    NotACovenantMember(String),
    #[error("Covenant signature bundle must cover exactly the restaked finality providers")]
    CovenantBundleMismatch {},
    #[error("Conflicting covenant signatures already recorded for member {0}")]
    CovenantSigConflict(String),
    #[error("Delegation has already been unbonded: {0}")]
    UnbondingAlreadyRequested(String),
    #[error("The recovered secret key does not match any restaked finality provider: {0}")]
    EvidenceKeyMismatch(String),
}
