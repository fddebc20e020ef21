use cosmwasm_schema::{cw_serde, QueryResponses};
use cosmwasm_std::{Binary, Decimal};

use crate::error::ContractError;
use crate::state::config::{Config, Params};
use crate::state::distribution::VotingPowerDistCache;
use crate::state::staking::{BTCDelegationStatus, BtcDelegation, FinalityProvider};

#[cw_serde]
pub struct InstantiateMsg {
    pub params: Option<Params>,
    pub admin: Option<String>,
}

#[cw_serde]
pub enum ExecuteMsg {
    /// Change the admin
    UpdateAdmin { admin: Option<String> },
    /// Register a new finality provider, including its proof of possession
    RegisterFinalityProvider { fp: NewFinalityProvider },
    /// Create a new BTC delegation restaked to one or more finality providers
    CreateDelegation { delegation: NewBtcDelegation },
    /// Add one covenant member's signatures over a delegation: adaptor
    /// signatures on the slashing tx (one per restaked finality provider), a
    /// Schnorr signature on the unbonding tx, and adaptor signatures on the
    /// unbonding slashing tx
    AddCovenantSignatures {
        /// The (reversed) staking tx hash, in hex
        staking_tx_hash: String,
        /// BIP-340 PK of the covenant member, in hex
        cov_pk_hex: String,
        slashing_sigs: Vec<FpAdaptorSignature>,
        unbonding_sig: Binary,
        unbonding_slashing_sigs: Vec<FpAdaptorSignature>,
    },
    /// Attach the delegator's signature on the unbonding tx, switching the
    /// delegation to on-demand unbonding
    RequestUnbonding {
        /// The (reversed) staking tx hash, in hex
        staking_tx_hash: String,
        unbonding_tx_sig: Binary,
    },
    /// Report a finality provider secret key recovered from a decrypted
    /// covenant adaptor signature, slashing the provider
    SubmitSelectiveSlashingEvidence {
        /// The (reversed) staking tx hash, in hex
        staking_tx_hash: String,
        /// The recovered secp256k1 secret key of the offending finality
        /// provider, in hex
        recovered_fp_btc_sk_hex: String,
    },
}

#[cw_serde]
pub enum SudoMsg {
    /// The chain's begin blocker, reporting the current BTC tip height.
    /// Expires delegations whose time-lock window closes and recomputes the
    /// voting power distribution
    BeginBlock { btc_height: u64 },
    /// The chain's end blocker. Kept for pipeline symmetry; currently a no-op
    EndBlock {},
}

#[cw_serde]
#[derive(QueryResponses)]
pub enum QueryMsg {
    /// Returns the current configuration of the contract
    #[returns(Config)]
    Config {},
    /// Returns the current staking parameters
    #[returns(Params)]
    Params {},
    /// Returns the current admin, if any
    #[returns(cw_controllers::AdminResponse)]
    Admin {},
    /// Returns a registered finality provider by its BTC public key, in hex
    #[returns(FinalityProvider)]
    FinalityProvider { btc_pk_hex: String },
    /// Returns the registered finality providers
    #[returns(FinalityProvidersResponse)]
    FinalityProviders {
        start_after: Option<String>,
        limit: Option<u32>,
    },
    /// Returns a delegation by its (reversed) staking tx hash, in hex
    #[returns(BtcDelegation)]
    Delegation { staking_tx_hash_hex: String },
    /// Returns the stored delegations
    #[returns(BtcDelegationsResponse)]
    Delegations {
        start_after: Option<String>,
        limit: Option<u32>,
    },
    /// Returns the staking tx hashes of the delegations restaked to a
    /// finality provider
    #[returns(DelegationsByFpResponse)]
    DelegationsByFp { btc_pk_hex: String },
    /// Returns the derived status of a delegation at a BTC height
    /// (the reported tip if omitted)
    #[returns(DelegationStatusResponse)]
    DelegationStatus {
        staking_tx_hash_hex: String,
        btc_height: Option<u64>,
    },
    /// Returns the voting power of a finality provider at a processed BTC
    /// height (the last processed height if omitted)
    #[returns(VotingPowerResponse)]
    VotingPower {
        fp_btc_pk_hex: String,
        height: Option<u64>,
    },
    /// Returns the voting power distribution cache at a processed BTC height
    /// (the last processed height if omitted)
    #[returns(VotingPowerDistCache)]
    DistributionCache { height: Option<u64> },
    /// Returns the chain height at which the first voting power was recorded
    /// (zero if the protocol is not activated yet)
    #[returns(ActivatedHeightResponse)]
    ActivatedHeight {},
}

#[cw_serde]
pub struct NewFinalityProvider {
    /// addr is the Consumer address of the finality provider
    pub addr: String,
    /// description defines the description terms for the finality provider
    pub description: Option<FinalityProviderDescription>,
    /// commission defines the commission rate of the finality provider
    pub commission: Decimal,
    /// btc_pk_hex is the Bitcoin secp256k1 PK of this finality provider.
    /// The PK follows encoding in BIP-340 spec in hex format
    pub btc_pk_hex: String,
    /// pop is the proof of possession of the btc_pk by the fp address
    pub pop: Option<ProofOfPossession>,
}

#[cw_serde]
#[derive(Default)]
pub struct FinalityProviderDescription {
    pub moniker: String,
    pub identity: String,
    pub website: String,
    pub security_contact: String,
    pub details: String,
}

impl FinalityProviderDescription {
    pub const MAX_MONIKER_LENGTH: usize = 70;
    pub const MAX_IDENTITY_LENGTH: usize = 3000;
    pub const MAX_WEBSITE_LENGTH: usize = 140;
    pub const MAX_SECURITY_CONTACT_LENGTH: usize = 140;
    pub const MAX_DETAILS_LENGTH: usize = 280;

    pub fn validate(&self) -> Result<(), ContractError> {
        let checks = [
            ("moniker", self.moniker.len(), Self::MAX_MONIKER_LENGTH),
            ("identity", self.identity.len(), Self::MAX_IDENTITY_LENGTH),
            ("website", self.website.len(), Self::MAX_WEBSITE_LENGTH),
            (
                "security_contact",
                self.security_contact.len(),
                Self::MAX_SECURITY_CONTACT_LENGTH,
            ),
            ("details", self.details.len(), Self::MAX_DETAILS_LENGTH),
        ];
        for (field, len, max) in checks {
            if len > max {
                return Err(ContractError::DescriptionTooLong(field, len, max));
            }
        }
        Ok(())
    }
}

/// BtcSigType indicates the type of btc_sig in a proof of possession
#[cw_serde]
#[derive(Copy)]
pub enum BtcSigType {
    /// BIP-340 signature over the sha256 hash of the signer address
    Bip340 = 0,
    /// BIP-322 simple signature over the signer address
    Bip322 = 1,
}

impl TryFrom<i32> for BtcSigType {
    type Error = ContractError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BtcSigType::Bip340),
            1 => Ok(BtcSigType::Bip322),
            other => Err(ContractError::UnknownPopType(other)),
        }
    }
}

#[cw_serde]
pub struct ProofOfPossession {
    /// btc_sig_type indicates the type of btc_sig in the pop
    pub btc_sig_type: i32,
    /// btc_sig is the signature of the fp address by the BTC secret key.
    /// For BIP-340 it is a 64-byte signature over the sha256 hash of the
    /// address; for BIP-322 it is a simple signature (an encoded witness
    /// stack) over the address bytes
    pub btc_sig: Binary,
    /// btc_sig_address is the Bitcoin address that produced a BIP-322
    /// signature. It must be derived from the BTC public key.
    /// Required iff btc_sig_type is BIP-322
    pub btc_sig_address: Option<String>,
}

#[cw_serde]
pub struct NewBtcDelegation {
    /// staker_addr is the address to receive rewards from BTC delegation
    pub staker_addr: String,
    /// btc_pk_hex is the BIP-340 PK of the BTC delegator, in hex
    pub btc_pk_hex: String,
    /// fp_btc_pk_list is the list of BIP-340 PKs of the restaked finality
    /// providers
    pub fp_btc_pk_list: Vec<String>,
    /// start_height is the start BTC height of the time-lock
    pub start_height: u64,
    /// end_height is the end BTC height of the time-lock
    pub end_height: u64,
    /// total_sat is the total BTC stakes in this delegation, quantified in satoshi
    pub total_sat: u64,
    /// staking_tx is the staking tx, in consensus encoding
    pub staking_tx: Binary,
    /// staking_output_idx is the index of the staking output in the staking tx
    pub staking_output_idx: u32,
    /// slashing_tx is the slashing tx, in consensus encoding
    pub slashing_tx: Binary,
    /// delegator_slashing_sig is the delegator's signature on the slashing tx
    pub delegator_slashing_sig: Binary,
    /// unbonding_time is the time-lock of the unbonding output, in BTC blocks
    pub unbonding_time: u32,
    /// undelegation_info carries the pre-signed on-demand unbonding data
    pub undelegation_info: NewUndelegationInfo,
}

#[cw_serde]
pub struct NewUndelegationInfo {
    /// unbonding_tx is the unbonding tx, in consensus encoding
    pub unbonding_tx: Binary,
    /// slashing_tx is the unbonding slashing tx, in consensus encoding
    pub slashing_tx: Binary,
    /// delegator_slashing_sig is the delegator's signature on the unbonding
    /// slashing tx
    pub delegator_slashing_sig: Binary,
}

/// An adaptor signature encrypted to one finality provider's key
#[cw_serde]
pub struct FpAdaptorSignature {
    /// BIP-340 PK of the finality provider the signature is encrypted to, in hex
    pub fp_btc_pk_hex: String,
    /// The 66-byte adaptor signature
    pub sig: Binary,
}

/// One covenant member's bundle of adaptor signatures over a slashing tx
#[cw_serde]
pub struct CovenantAdaptorSignatures {
    /// BIP-340 PK of the covenant member, in hex
    pub cov_pk_hex: String,
    /// Adaptor signatures keyed by finality provider
    pub adaptor_sigs: Vec<FpAdaptorSignature>,
}

/// A (public key, signature) pair on the unbonding tx
#[cw_serde]
pub struct SignatureInfo {
    /// BIP-340 PK of the signer, in hex
    pub pk_hex: String,
    /// 64-byte BIP-340 signature
    pub sig: Binary,
}

#[cw_serde]
pub struct FinalityProvidersResponse {
    pub fps: Vec<FinalityProvider>,
}

#[cw_serde]
pub struct BtcDelegationsResponse {
    pub delegations: Vec<BtcDelegation>,
}

#[cw_serde]
pub struct DelegationsByFpResponse {
    /// The (reversed) staking tx hashes, in hex
    pub hashes: Vec<String>,
}

#[cw_serde]
pub struct DelegationStatusResponse {
    pub status: BTCDelegationStatus,
    pub voting_power: u64,
    /// The BTC height the status was derived at
    pub btc_height: u64,
}

#[cw_serde]
pub struct VotingPowerResponse {
    pub fp_btc_pk_hex: String,
    /// The processed BTC height the power was read at
    pub btc_height: u64,
    pub power: u64,
}

#[cw_serde]
pub struct ActivatedHeightResponse {
    pub height: u64,
}
