use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Binary, Decimal};
use cw_storage_plus::{Item, Map};

use crate::msg::{
    CovenantAdaptorSignatures, FinalityProviderDescription, NewBtcDelegation,
    NewFinalityProvider, ProofOfPossession, SignatureInfo,
};

/// Size of a (reversed) staking tx hash
pub const HASH_SIZE: usize = 32;

/// BTCDelegationStatus is the lifecycle state of a BTC delegation.
/// `Expired` only appears in power distribution events; status derivation
/// folds an expired time-lock into `Unbonded`
#[cw_serde]
#[derive(Copy)]
pub enum BTCDelegationStatus {
    Pending,
    Active,
    Unbonding,
    Unbonded,
    Expired,
}

#[cw_serde]
pub struct FinalityProvider {
    /// addr is the Consumer address of the finality provider
    pub addr: String,
    /// description defines the description terms for the finality provider
    pub description: FinalityProviderDescription,
    /// commission defines the commission rate of the finality provider
    pub commission: Decimal,
    /// btc_pk_hex is the Bitcoin secp256k1 PK of this finality provider.
    /// The PK follows encoding in BIP-340 spec in hex format
    pub btc_pk_hex: String,
    /// pop is the proof of possession of the btc_pk by the fp address
    pub pop: ProofOfPossession,
    /// slashed_height is the chain height on which the finality provider's
    /// selective slashing evidence was accepted (0 if not slashed)
    pub slashed_height: u64,
}

impl FinalityProvider {
    pub fn from_new(new_fp: &NewFinalityProvider, pop: ProofOfPossession) -> Self {
        FinalityProvider {
            addr: new_fp.addr.clone(),
            description: new_fp.description.clone().unwrap_or_default(),
            commission: new_fp.commission,
            btc_pk_hex: new_fp.btc_pk_hex.clone(),
            pop,
            slashed_height: 0,
        }
    }

    pub fn is_slashed(&self) -> bool {
        self.slashed_height > 0
    }
}

#[cw_serde]
pub struct BtcDelegation {
    /// staker_addr is the address to receive rewards from BTC delegation
    pub staker_addr: String,
    /// btc_pk_hex is the Bitcoin secp256k1 PK of the BTC delegator.
    /// The PK follows encoding in BIP-340 spec in hex format
    pub btc_pk_hex: String,
    /// fp_btc_pk_list is the list of BIP-340 PKs of the finality providers that
    /// this BTC delegation delegates to
    pub fp_btc_pk_list: Vec<String>,
    /// start_height is the start BTC height of the time-lock
    pub start_height: u64,
    /// end_height is the end BTC height of the time-lock
    pub end_height: u64,
    /// total_sat is the total BTC stakes in this delegation, quantified in satoshi
    pub total_sat: u64,
    /// staking_tx is the staking tx
    pub staking_tx: Binary,
    /// staking_output_idx is the index of the staking output in the staking tx
    pub staking_output_idx: u32,
    /// slashing_tx is the slashing tx
    pub slashing_tx: Binary,
    /// delegator_slashing_sig is the signature on the slashing tx by the delegator
    /// (i.e. SK corresponding to btc_pk). It will be a part of the witness for the
    /// staking tx output
    pub delegator_slashing_sig: Binary,
    /// unbonding_time is used in unbonding output time-lock path and in slashing
    /// transactions change outputs
    pub unbonding_time: u32,
    /// covenant_sigs is the list of adaptor signature bundles on the slashing tx,
    /// one bundle per covenant member, each keyed by finality provider inside
    pub covenant_sigs: Vec<CovenantAdaptorSignatures>,
    /// undelegation_info is the undelegation info of this delegation
    pub undelegation_info: UndelegationInfo,
}

#[cw_serde]
pub struct UndelegationInfo {
    /// unbonding_tx is the transaction which will transfer the funds from staking
    /// output to unbonding output. Unbonding output will usually have lower
    /// timelock than staking output
    pub unbonding_tx: Binary,
    /// slashing_tx is the unbonding slashing tx
    pub slashing_tx: Binary,
    /// delegator_slashing_sig is the signature on the unbonding slashing tx by the
    /// delegator. It will be a part of the witness for the unbonding tx output
    pub delegator_slashing_sig: Binary,
    /// delegator_unbonding_sig is the signature on the unbonding tx by the
    /// delegator. Its presence effectively proves that the delegator wants to
    /// unbond; the delegation is then no longer eligible for voting power
    pub delegator_unbonding_sig: Binary,
    /// covenant_unbonding_sig_list is the list of signatures on the unbonding tx
    /// by covenant members
    pub covenant_unbonding_sig_list: Vec<SignatureInfo>,
    /// covenant_slashing_sigs is the list of adaptor signature bundles on the
    /// unbonding slashing tx, one bundle per covenant member
    pub covenant_slashing_sigs: Vec<CovenantAdaptorSignatures>,
}

impl BtcDelegation {
    pub fn from_new(delegation: &NewBtcDelegation) -> Self {
        let undelegation = &delegation.undelegation_info;
        BtcDelegation {
            staker_addr: delegation.staker_addr.clone(),
            btc_pk_hex: delegation.btc_pk_hex.clone(),
            fp_btc_pk_list: delegation.fp_btc_pk_list.clone(),
            start_height: delegation.start_height,
            end_height: delegation.end_height,
            total_sat: delegation.total_sat,
            staking_tx: delegation.staking_tx.clone(),
            staking_output_idx: delegation.staking_output_idx,
            slashing_tx: delegation.slashing_tx.clone(),
            delegator_slashing_sig: delegation.delegator_slashing_sig.clone(),
            unbonding_time: delegation.unbonding_time,
            covenant_sigs: vec![],
            undelegation_info: UndelegationInfo {
                unbonding_tx: undelegation.unbonding_tx.clone(),
                slashing_tx: undelegation.slashing_tx.clone(),
                delegator_slashing_sig: undelegation.delegator_slashing_sig.clone(),
                delegator_unbonding_sig: Binary::default(),
                covenant_unbonding_sig_list: vec![],
                covenant_slashing_sigs: vec![],
            },
        }
    }

    pub fn is_unbonded_early(&self) -> bool {
        !self.undelegation_info.delegator_unbonding_sig.is_empty()
    }

    /// has_covenant_quorum reports whether enough covenant members have signed
    /// the slashing tx for the delegation to gain voting power
    pub fn has_covenant_quorum(&self, quorum: u32) -> bool {
        self.covenant_sigs.len() >= quorum as usize
    }

    /// has_unbonding_quorums reports whether both covenant signature sets of the
    /// undelegation (unbonding tx and unbonding slashing tx) have reached quorum
    pub fn has_unbonding_quorums(&self, quorum: u32) -> bool {
        self.undelegation_info.covenant_unbonding_sig_list.len() >= quorum as usize
            && self.undelegation_info.covenant_slashing_sigs.len() >= quorum as usize
    }

    /// status derives the lifecycle state at BTC height `btc_height`, with
    /// finalization timeout `w` and covenant quorum `quorum`
    pub fn status(&self, btc_height: u64, w: u64, quorum: u32) -> BTCDelegationStatus {
        if self.is_unbonded_early() {
            // The delegator asked to unbond on-demand. It stays in unbonding
            // until the covenant quorums over the undelegation are complete
            if self.has_unbonding_quorums(quorum) {
                BTCDelegationStatus::Unbonded
            } else {
                BTCDelegationStatus::Unbonding
            }
        } else if btc_height >= self.start_height
            && btc_height.saturating_add(w) <= self.end_height
        {
            // Time-lock is running and has more than w blocks left
            if self.has_covenant_quorum(quorum) {
                BTCDelegationStatus::Active
            } else {
                BTCDelegationStatus::Pending
            }
        } else {
            // Time-lock has not begun, or has less than w blocks left
            BTCDelegationStatus::Unbonded
        }
    }

    /// voting_power is `total_sat` iff the delegation is active
    pub fn voting_power(&self, btc_height: u64, w: u64, quorum: u32) -> u64 {
        match self.status(btc_height, w, quorum) {
            BTCDelegationStatus::Active => self.total_sat,
            _ => 0,
        }
    }
}

/// Finality providers by their BTC public key
pub(crate) const FPS: Map<&str, FinalityProvider> = Map::new("fps");

/// Delegations by staking tx hash
pub(crate) const DELEGATIONS: Map<&[u8; HASH_SIZE], BtcDelegation> = Map::new("delegations");
/// Map of staking hashes by finality provider
pub(crate) const FP_DELEGATIONS: Map<&str, Vec<Vec<u8>>> = Map::new("fp_delegations");
/// Reverse map of finality providers by staking hash
pub(crate) const DELEGATION_FPS: Map<&[u8; HASH_SIZE], Vec<String>> = Map::new("delegation_fps");

/// The chain height at which a finality provider first gets voting power
pub(crate) const ACTIVATED_HEIGHT: Item<u64> = Item::new("activated_height");
