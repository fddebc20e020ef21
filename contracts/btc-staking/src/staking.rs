//! BTC staking lifecycle: finality provider registration, delegation
//! creation, covenant signature collection, on-demand unbonding, and
//! selective slashing evidence.

use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::Txid;

use cosmwasm_std::{Binary, Decimal, DepsMut, Env, Response};
use k256::schnorr::{Signature as SchnorrSignature, SigningKey};

use staking_adaptor::{AdaptorSignature, EncryptionKey};

use crate::error::ContractError;
use crate::msg::{
    CovenantAdaptorSignatures, FpAdaptorSignature, NewBtcDelegation, NewFinalityProvider,
    SignatureInfo,
};
use crate::scripts::{
    enc_verify_transaction_sig_with_output, verify_transaction_sig_with_output,
    verifying_key_from_hex,
};
use crate::state::config::{Params, PARAMS};
use crate::state::distribution::{record_event, PowerDistUpdateEvent, BTC_TIP, EXPIRY_INDEX};
use crate::state::staking::{
    BTCDelegationStatus, BtcDelegation, FinalityProvider, DELEGATIONS, DELEGATION_FPS, FPS,
    FP_DELEGATIONS, HASH_SIZE,
};
use crate::validation::{build_artifacts, parse_btc_tx, verify_new_delegation, verify_pop};

/// staking_tx_hash parses a (reversed) staking tx hash from hex into the
/// internal byte order used as storage key
pub(crate) fn staking_tx_hash(hash_hex: &str) -> Result<[u8; HASH_SIZE], ContractError> {
    let txid =
        Txid::from_str(hash_hex).map_err(|e| ContractError::InvalidTxHash(e.to_string()))?;
    Ok(txid.to_byte_array())
}

fn btc_tip(deps: &DepsMut) -> Result<u64, ContractError> {
    Ok(BTC_TIP.may_load(deps.storage)?.unwrap_or_default())
}

fn artifacts_of(
    params: &Params,
    del: &BtcDelegation,
) -> Result<crate::validation::DelegationArtifacts, ContractError> {
    build_artifacts(
        params,
        &del.btc_pk_hex,
        &del.fp_btc_pk_list,
        del.start_height,
        del.end_height,
        del.staking_tx.as_slice(),
        del.staking_output_idx,
        del.slashing_tx.as_slice(),
        del.undelegation_info.unbonding_tx.as_slice(),
        del.undelegation_info.slashing_tx.as_slice(),
        del.unbonding_time,
    )
}

pub fn handle_register_finality_provider(
    deps: DepsMut,
    fp: NewFinalityProvider,
) -> Result<Response, ContractError> {
    deps.api.addr_validate(&fp.addr)?;

    if FPS.has(deps.storage, &fp.btc_pk_hex) {
        return Err(ContractError::FinalityProviderAlreadyExists(
            fp.btc_pk_hex.clone(),
        ));
    }

    let description = fp
        .description
        .as_ref()
        .ok_or(ContractError::MissingDescription {})?;
    description.validate()?;

    let params = PARAMS.load(deps.storage)?;
    if fp.commission < params.min_commission_rate {
        return Err(ContractError::CommissionTooLow(
            fp.commission.to_string(),
            params.min_commission_rate.to_string(),
        ));
    }
    if fp.commission > Decimal::one() {
        return Err(ContractError::CommissionTooHigh(fp.commission.to_string()));
    }

    let pop = fp
        .pop
        .as_ref()
        .ok_or(ContractError::MissingProofOfPossession {})?;
    verify_pop(&params, &fp.btc_pk_hex, &fp.addr, pop)?;

    let fp_record = FinalityProvider::from_new(&fp, pop.clone());
    FPS.save(deps.storage, &fp.btc_pk_hex, &fp_record)?;

    Ok(Response::new()
        .add_attribute("action", "register_finality_provider")
        .add_attribute("btc_pk_hex", fp.btc_pk_hex))
}

pub fn handle_create_delegation(
    deps: DepsMut,
    delegation: NewBtcDelegation,
) -> Result<Response, ContractError> {
    deps.api.addr_validate(&delegation.staker_addr)?;

    if delegation.fp_btc_pk_list.is_empty() {
        return Err(ContractError::EmptyFpList {});
    }
    let mut seen = delegation.fp_btc_pk_list.clone();
    seen.sort();
    for window in seen.windows(2) {
        if window[0] == window[1] {
            return Err(ContractError::DuplicateFpKey(window[0].clone()));
        }
    }
    for fp_pk_hex in &delegation.fp_btc_pk_list {
        let fp = FPS
            .may_load(deps.storage, fp_pk_hex)?
            .ok_or_else(|| ContractError::FinalityProviderNotFound(fp_pk_hex.clone()))?;
        if fp.is_slashed() {
            return Err(ContractError::FinalityProviderSlashed(fp_pk_hex.clone()));
        }
    }

    if delegation.delegator_slashing_sig.is_empty() {
        return Err(ContractError::EmptySignature {});
    }
    let undelegation = &delegation.undelegation_info;
    if undelegation.unbonding_tx.is_empty() {
        return Err(ContractError::EmptyUnbondingTx {});
    }
    if undelegation.slashing_tx.is_empty() {
        return Err(ContractError::EmptySlashingTx {});
    }
    if undelegation.delegator_slashing_sig.is_empty() {
        return Err(ContractError::EmptySignature {});
    }

    let params = PARAMS.load(deps.storage)?;
    let btc_tip = btc_tip(&deps)?;
    // The staking tx must be k-deep under the reported tip
    if btc_tip < delegation.start_height.saturating_add(params.btc_confirmation_depth) {
        return Err(ContractError::StakingTxNotDeepEnough {
            start_height: delegation.start_height,
            btc_tip,
            depth: params.btc_confirmation_depth,
        });
    }
    // The time-lock must leave more than w blocks past the tip
    if delegation.end_height <= btc_tip.saturating_add(params.checkpoint_finalization_timeout) {
        return Err(ContractError::StakingTimeLockTooShort {
            end_height: delegation.end_height,
            btc_tip,
            timeout: params.checkpoint_finalization_timeout,
        });
    }
    if delegation.unbonding_time < params.min_unbonding_time_blocks {
        return Err(ContractError::UnbondingTimeTooShort(
            delegation.unbonding_time,
            params.min_unbonding_time_blocks,
        ));
    }

    verify_new_delegation(&params, &delegation)?;

    let staking_tx = parse_btc_tx(delegation.staking_tx.as_slice())?;
    let txid = staking_tx.txid();
    let hash: [u8; HASH_SIZE] = txid.to_byte_array();
    if DELEGATIONS.has(deps.storage, &hash) {
        return Err(ContractError::DelegationAlreadyExists(txid.to_string()));
    }

    let del = BtcDelegation::from_new(&delegation);
    DELEGATIONS.save(deps.storage, &hash, &del)?;
    for fp_pk_hex in &del.fp_btc_pk_list {
        let mut hashes = FP_DELEGATIONS
            .may_load(deps.storage, fp_pk_hex)?
            .unwrap_or_default();
        hashes.push(hash.to_vec());
        FP_DELEGATIONS.save(deps.storage, fp_pk_hex, &hashes)?;
    }
    DELEGATION_FPS.save(deps.storage, &hash, &del.fp_btc_pk_list)?;

    Ok(Response::new()
        .add_attribute("action", "create_btc_delegation")
        .add_attribute("staking_tx_hash", txid.to_string()))
}

fn same_fp_key_set(sigs: &[FpAdaptorSignature], fp_pk_list: &[String]) -> bool {
    let mut sig_keys: Vec<&String> = sigs.iter().map(|sig| &sig.fp_btc_pk_hex).collect();
    let mut fp_keys: Vec<&String> = fp_pk_list.iter().collect();
    sig_keys.sort();
    fp_keys.sort();
    sig_keys == fp_keys
}

pub fn handle_add_covenant_sigs(
    deps: DepsMut,
    staking_tx_hash_hex: &str,
    cov_pk_hex: String,
    slashing_sigs: Vec<FpAdaptorSignature>,
    unbonding_sig: Binary,
    unbonding_slashing_sigs: Vec<FpAdaptorSignature>,
) -> Result<Response, ContractError> {
    let params = PARAMS.load(deps.storage)?;
    if !params.covenant_pks.contains(&cov_pk_hex) {
        return Err(ContractError::NotACovenantMember(cov_pk_hex));
    }

    let hash = staking_tx_hash(staking_tx_hash_hex)?;
    let mut del = DELEGATIONS
        .may_load(deps.storage, &hash)?
        .ok_or_else(|| ContractError::DelegationNotFound(staking_tx_hash_hex.to_string()))?;

    // A bundle must carry exactly one signature per restaked finality provider
    if !same_fp_key_set(&slashing_sigs, &del.fp_btc_pk_list)
        || !same_fp_key_set(&unbonding_slashing_sigs, &del.fp_btc_pk_list)
    {
        return Err(ContractError::CovenantBundleMismatch {});
    }

    let existing_slashing = del
        .covenant_sigs
        .iter()
        .find(|bundle| bundle.cov_pk_hex == cov_pk_hex);
    if let Some(existing) = existing_slashing {
        let existing_unbonding = del
            .undelegation_info
            .covenant_unbonding_sig_list
            .iter()
            .find(|info| info.pk_hex == cov_pk_hex);
        let existing_unbonding_slashing = del
            .undelegation_info
            .covenant_slashing_sigs
            .iter()
            .find(|bundle| bundle.cov_pk_hex == cov_pk_hex);
        let identical = existing.adaptor_sigs == slashing_sigs
            && existing_unbonding.map(|info| &info.sig) == Some(&unbonding_sig)
            && existing_unbonding_slashing.map(|bundle| &bundle.adaptor_sigs)
                == Some(&unbonding_slashing_sigs);
        if identical {
            // Byte-identical resubmission is accepted without effect
            return Ok(Response::new()
                .add_attribute("action", "add_covenant_signatures")
                .add_attribute("idempotent", "true"));
        }
        return Err(ContractError::CovenantSigConflict(cov_pk_hex));
    }

    let artifacts = artifacts_of(&params, &del)?;
    let cov_vk = verifying_key_from_hex(&cov_pk_hex)?;

    // Adaptor signatures on the slashing tx, one per finality provider,
    // encrypted to that provider's key
    for fp_sig in &slashing_sigs {
        let fp_vk = verifying_key_from_hex(&fp_sig.fp_btc_pk_hex)?;
        let enc_key = EncryptionKey::from_verifying_key(&fp_vk)?;
        let sig = AdaptorSignature::new(fp_sig.sig.as_slice())?;
        enc_verify_transaction_sig_with_output(
            &artifacts.slashing_tx,
            &artifacts.staking_output,
            artifacts.staking_paths.slashing_path_script.as_script(),
            &cov_vk,
            &enc_key,
            &sig,
        )?;
    }

    // Schnorr signature on the unbonding tx
    let unbonding_schnorr_sig = SchnorrSignature::try_from(unbonding_sig.as_slice())
        .map_err(|e| ContractError::InvalidSignature(e.to_string()))?;
    verify_transaction_sig_with_output(
        &artifacts.unbonding_tx,
        &artifacts.staking_output,
        artifacts.staking_paths.unbonding_path_script.as_script(),
        &cov_vk,
        &unbonding_schnorr_sig,
    )?;

    // Adaptor signatures on the unbonding slashing tx
    for fp_sig in &unbonding_slashing_sigs {
        let fp_vk = verifying_key_from_hex(&fp_sig.fp_btc_pk_hex)?;
        let enc_key = EncryptionKey::from_verifying_key(&fp_vk)?;
        let sig = AdaptorSignature::new(fp_sig.sig.as_slice())?;
        enc_verify_transaction_sig_with_output(
            &artifacts.unbonding_slashing_tx,
            &artifacts.unbonding_output,
            artifacts.unbonding_paths.slashing_path_script.as_script(),
            &cov_vk,
            &enc_key,
            &sig,
        )?;
    }

    let pre_quorum = del.has_covenant_quorum(params.covenant_quorum);
    del.covenant_sigs.push(CovenantAdaptorSignatures {
        cov_pk_hex: cov_pk_hex.clone(),
        adaptor_sigs: slashing_sigs,
    });
    del.undelegation_info
        .covenant_unbonding_sig_list
        .push(SignatureInfo {
            pk_hex: cov_pk_hex.clone(),
            sig: unbonding_sig,
        });
    del.undelegation_info
        .covenant_slashing_sigs
        .push(CovenantAdaptorSignatures {
            cov_pk_hex: cov_pk_hex.clone(),
            adaptor_sigs: unbonding_slashing_sigs,
        });
    DELEGATIONS.save(deps.storage, &hash, &del)?;

    // On reaching quorum the delegation activates: queue the state change and
    // index the height at which the remaining time-lock stops counting
    if !pre_quorum && del.has_covenant_quorum(params.covenant_quorum) {
        let btc_height = BTC_TIP.may_load(deps.storage)?.unwrap_or_default();
        record_event(
            deps.storage,
            btc_height,
            &PowerDistUpdateEvent::DelegationStateChange {
                staking_tx_hash: staking_tx_hash_hex.to_string(),
                new_state: BTCDelegationStatus::Active,
            },
        )?;
        let expiry_height = del
            .end_height
            .saturating_sub(params.checkpoint_finalization_timeout)
            .saturating_add(1);
        EXPIRY_INDEX.save(deps.storage, (expiry_height, &hash), &())?;
    }

    Ok(Response::new()
        .add_attribute("action", "add_covenant_signatures")
        .add_attribute("covenant_pk", cov_pk_hex)
        .add_attribute("staking_tx_hash", staking_tx_hash_hex))
}

pub fn handle_request_unbonding(
    deps: DepsMut,
    staking_tx_hash_hex: &str,
    unbonding_tx_sig: Binary,
) -> Result<Response, ContractError> {
    let hash = staking_tx_hash(staking_tx_hash_hex)?;
    let mut del = DELEGATIONS
        .may_load(deps.storage, &hash)?
        .ok_or_else(|| ContractError::DelegationNotFound(staking_tx_hash_hex.to_string()))?;
    if del.is_unbonded_early() {
        return Err(ContractError::UnbondingAlreadyRequested(
            staking_tx_hash_hex.to_string(),
        ));
    }
    if unbonding_tx_sig.is_empty() {
        return Err(ContractError::EmptySignature {});
    }

    let params = PARAMS.load(deps.storage)?;
    let artifacts = artifacts_of(&params, &del)?;
    let staker_vk = verifying_key_from_hex(&del.btc_pk_hex)?;
    let sig = SchnorrSignature::try_from(unbonding_tx_sig.as_slice())
        .map_err(|e| ContractError::InvalidSignature(e.to_string()))?;
    verify_transaction_sig_with_output(
        &artifacts.unbonding_tx,
        &artifacts.staking_output,
        artifacts.staking_paths.unbonding_path_script.as_script(),
        &staker_vk,
        &sig,
    )?;

    del.undelegation_info.delegator_unbonding_sig = unbonding_tx_sig;
    DELEGATIONS.save(deps.storage, &hash, &del)?;

    let new_state = if del.has_unbonding_quorums(params.covenant_quorum) {
        BTCDelegationStatus::Unbonded
    } else {
        BTCDelegationStatus::Unbonding
    };
    let btc_height = BTC_TIP.may_load(deps.storage)?.unwrap_or_default();
    record_event(
        deps.storage,
        btc_height,
        &PowerDistUpdateEvent::DelegationStateChange {
            staking_tx_hash: staking_tx_hash_hex.to_string(),
            new_state,
        },
    )?;

    Ok(Response::new()
        .add_attribute("action", "request_unbonding")
        .add_attribute("staking_tx_hash", staking_tx_hash_hex))
}

pub fn handle_selective_slashing_evidence(
    deps: DepsMut,
    env: &Env,
    staking_tx_hash_hex: &str,
    recovered_fp_btc_sk_hex: &str,
) -> Result<Response, ContractError> {
    let hash = staking_tx_hash(staking_tx_hash_hex)?;
    let del = DELEGATIONS
        .may_load(deps.storage, &hash)?
        .ok_or_else(|| ContractError::DelegationNotFound(staking_tx_hash_hex.to_string()))?;

    // The recovered secret key must match one of the restaked providers
    let sk_bytes = hex::decode(recovered_fp_btc_sk_hex)?;
    let fp_sk = SigningKey::from_bytes(&sk_bytes)
        .map_err(|e| ContractError::InvalidPublicKey(e.to_string()))?;
    let fp_btc_pk_hex = hex::encode(fp_sk.verifying_key().to_bytes());
    if !del.fp_btc_pk_list.contains(&fp_btc_pk_hex) {
        return Err(ContractError::EvidenceKeyMismatch(fp_btc_pk_hex));
    }

    let mut fp = FPS
        .may_load(deps.storage, &fp_btc_pk_hex)?
        .ok_or_else(|| ContractError::FinalityProviderNotFound(fp_btc_pk_hex.clone()))?;
    if fp.is_slashed() {
        return Err(ContractError::FinalityProviderSlashed(fp_btc_pk_hex));
    }
    fp.slashed_height = env.block.height;
    FPS.save(deps.storage, &fp_btc_pk_hex, &fp)?;

    let btc_height = BTC_TIP.may_load(deps.storage)?.unwrap_or_default();
    record_event(
        deps.storage,
        btc_height,
        &PowerDistUpdateEvent::SlashedFp {
            fp_btc_pk_hex: fp_btc_pk_hex.clone(),
        },
    )?;

    Ok(Response::new()
        .add_attribute("action", "submit_selective_slashing_evidence")
        .add_attribute("btc_pk_hex", fp_btc_pk_hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    use bitcoin::absolute::LockTime;
    use bitcoin::consensus::serialize;
    use bitcoin::transaction::Version;
    use bitcoin::{
        Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
        XOnlyPublicKey,
    };
    use cosmwasm_std::testing::mock_dependencies;
    use cosmwasm_std::OwnedDeps;
    use k256::schnorr::SigningKey;
    use rand::thread_rng;

    use crate::msg::{FinalityProviderDescription, ProofOfPossession};
    use crate::scripts::{build_relative_time_lock_pk_script, calc_sighash, StakingScriptPaths};
    use crate::state::config::Network;
    use crate::state::distribution::EVENTS;
    use sha2::{Digest, Sha256};
    use staking_bip322::pubkey_to_p2wpkh_address;

    const W: u64 = 50;
    const QUORUM: u32 = 2;
    const UNBONDING_TIME: u32 = 101;
    const START_HEIGHT: u64 = 100;
    const END_HEIGHT: u64 = 1100;
    const TOTAL_SAT: u64 = 1_000_000;

    struct Fixture {
        deps: OwnedDeps<
            cosmwasm_std::testing::MockStorage,
            cosmwasm_std::testing::MockApi,
            cosmwasm_std::testing::MockQuerier,
        >,
        params: Params,
        staker_sk: SigningKey,
        fp_sks: Vec<SigningKey>,
        cov_sks: Vec<SigningKey>,
    }

    fn xonly(sk: &SigningKey) -> XOnlyPublicKey {
        XOnlyPublicKey::from_slice(&sk.verifying_key().to_bytes()).unwrap()
    }

    fn pk_hex(sk: &SigningKey) -> String {
        hex::encode(sk.verifying_key().to_bytes())
    }

    fn p2wpkh_address_str(sk: &SigningKey) -> String {
        let mut compressed = [0u8; 33];
        compressed[0] = 0x02;
        compressed[1..].copy_from_slice(&sk.verifying_key().to_bytes());
        let pk = bitcoin::PublicKey::from_slice(&compressed).unwrap();
        pubkey_to_p2wpkh_address(&pk, bitcoin::Network::Regtest)
            .unwrap()
            .to_string()
    }

    fn setup() -> Fixture {
        let mut deps = mock_dependencies();
        let staker_sk = SigningKey::random(&mut thread_rng());
        let fp_sks: Vec<SigningKey> =
            (0..2).map(|_| SigningKey::random(&mut thread_rng())).collect();
        let cov_sks: Vec<SigningKey> =
            (0..3).map(|_| SigningKey::random(&mut thread_rng())).collect();
        let slashing_addr_sk = SigningKey::random(&mut thread_rng());

        let params = Params {
            covenant_pks: cov_sks.iter().map(pk_hex).collect(),
            covenant_quorum: QUORUM,
            btc_network: Network::Regtest,
            btc_confirmation_depth: 10,
            checkpoint_finalization_timeout: W,
            min_unbonding_time_blocks: 101,
            slashing_address: p2wpkh_address_str(&slashing_addr_sk),
            min_slashing_tx_fee_sat: 1_000,
            slashing_rate: "0.1".to_string(),
            ..Default::default()
        };
        PARAMS.save(deps.as_mut().storage, &params).unwrap();
        BTC_TIP.save(deps.as_mut().storage, &500).unwrap();

        Fixture {
            deps,
            params,
            staker_sk,
            fp_sks,
            cov_sks,
        }
    }

    fn register_fp(fix: &mut Fixture, fp_sk: &SigningKey) -> String {
        let addr = fix.deps.api.addr_make("fp-operator").to_string();
        let msg_hash: [u8; 32] = Sha256::digest(addr.as_bytes()).into();
        let pop_sig = fp_sk.sign_raw(&msg_hash, &[0u8; 32]).unwrap();
        let new_fp = NewFinalityProvider {
            addr,
            description: Some(FinalityProviderDescription {
                moniker: "fp".to_string(),
                ..Default::default()
            }),
            commission: Decimal::percent(5),
            btc_pk_hex: pk_hex(fp_sk),
            pop: Some(ProofOfPossession {
                btc_sig_type: 0,
                btc_sig: Binary::from(pop_sig.to_bytes().as_slice()),
                btc_sig_address: None,
            }),
        };
        handle_register_finality_provider(fix.deps.as_mut(), new_fp.clone()).unwrap();
        new_fp.btc_pk_hex
    }

    struct DelegationFixture {
        msg: NewBtcDelegation,
        staking_output: TxOut,
        slashing_tx: Transaction,
        unbonding_tx: Transaction,
        unbonding_output: TxOut,
        unbonding_slashing_tx: Transaction,
        staking_paths: StakingScriptPaths,
        unbonding_paths: StakingScriptPaths,
        hash_hex: String,
    }

    fn single_input_tx(prev: OutPoint, outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: prev,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: outputs,
        }
    }

    /// Builds a fully signed delegation over the given finality providers.
    /// `seed` varies the funding outpoint so each delegation gets a distinct
    /// staking tx hash
    fn build_delegation(fix: &Fixture, fp_sks: &[SigningKey], seed: u8) -> DelegationFixture {
        let staker_pk = xonly(&fix.staker_sk);
        let fp_pks: Vec<XOnlyPublicKey> = fp_sks.iter().map(xonly).collect();
        let cov_pks: Vec<XOnlyPublicKey> = fix.cov_sks.iter().map(xonly).collect();
        let network = bitcoin::Network::Regtest;
        let staking_time = (END_HEIGHT - START_HEIGHT) as u16;

        let staking_paths = StakingScriptPaths::new(
            &staker_pk,
            &fp_pks,
            &cov_pks,
            QUORUM as usize,
            staking_time,
        )
        .unwrap();
        let unbonding_paths = StakingScriptPaths::new(
            &staker_pk,
            &fp_pks,
            &cov_pks,
            QUORUM as usize,
            UNBONDING_TIME as u16,
        )
        .unwrap();

        let change_script =
            build_relative_time_lock_pk_script(&staker_pk, UNBONDING_TIME as u16, network)
                .unwrap();
        let slashing_address = bitcoin::Address::from_str(&fix.params.slashing_address)
            .unwrap()
            .require_network(network)
            .unwrap();

        let funding = OutPoint {
            txid: Txid::from_byte_array([seed; 32]),
            vout: 0,
        };
        let staking_tx = single_input_tx(
            funding,
            vec![TxOut {
                value: Amount::from_sat(TOTAL_SAT),
                script_pubkey: change_script.clone(),
            }],
        );
        let staking_output = staking_tx.output[0].clone();
        let staking_outpoint = OutPoint {
            txid: staking_tx.txid(),
            vout: 0,
        };

        // 10% slashed, 2000 sat fee
        let slashing_tx = single_input_tx(
            staking_outpoint,
            vec![
                TxOut {
                    value: Amount::from_sat(100_000),
                    script_pubkey: slashing_address.script_pubkey(),
                },
                TxOut {
                    value: Amount::from_sat(898_000),
                    script_pubkey: change_script.clone(),
                },
            ],
        );

        let unbonding_tx = single_input_tx(
            staking_outpoint,
            vec![TxOut {
                value: Amount::from_sat(995_000),
                script_pubkey: change_script.clone(),
            }],
        );
        let unbonding_output = unbonding_tx.output[0].clone();
        let unbonding_outpoint = OutPoint {
            txid: unbonding_tx.txid(),
            vout: 0,
        };

        let unbonding_slashing_tx = single_input_tx(
            unbonding_outpoint,
            vec![
                TxOut {
                    value: Amount::from_sat(99_500),
                    script_pubkey: slashing_address.script_pubkey(),
                },
                TxOut {
                    value: Amount::from_sat(894_500),
                    script_pubkey: change_script,
                },
            ],
        );

        let slashing_sighash = calc_sighash(
            &slashing_tx,
            &staking_output,
            staking_paths.slashing_path_script.as_script(),
        )
        .unwrap();
        let delegator_slashing_sig = fix
            .staker_sk
            .sign_raw(&slashing_sighash, &[0u8; 32])
            .unwrap();

        let unbonding_slashing_sighash = calc_sighash(
            &unbonding_slashing_tx,
            &unbonding_output,
            unbonding_paths.slashing_path_script.as_script(),
        )
        .unwrap();
        let delegator_unbonding_slashing_sig = fix
            .staker_sk
            .sign_raw(&unbonding_slashing_sighash, &[0u8; 32])
            .unwrap();

        let msg = NewBtcDelegation {
            staker_addr: fix.deps.api.addr_make("staker").to_string(),
            btc_pk_hex: pk_hex(&fix.staker_sk),
            fp_btc_pk_list: fp_sks.iter().map(pk_hex).collect(),
            start_height: START_HEIGHT,
            end_height: END_HEIGHT,
            total_sat: TOTAL_SAT,
            staking_tx: Binary::from(serialize(&staking_tx)),
            staking_output_idx: 0,
            slashing_tx: Binary::from(serialize(&slashing_tx)),
            delegator_slashing_sig: Binary::from(
                delegator_slashing_sig.to_bytes().as_slice(),
            ),
            unbonding_time: UNBONDING_TIME,
            undelegation_info: crate::msg::NewUndelegationInfo {
                unbonding_tx: Binary::from(serialize(&unbonding_tx)),
                slashing_tx: Binary::from(serialize(&unbonding_slashing_tx)),
                delegator_slashing_sig: Binary::from(
                    delegator_unbonding_slashing_sig.to_bytes().as_slice(),
                ),
            },
        };
        let hash_hex = staking_tx.txid().to_string();

        DelegationFixture {
            msg,
            staking_output,
            slashing_tx,
            unbonding_tx,
            unbonding_output,
            unbonding_slashing_tx,
            staking_paths,
            unbonding_paths,
            hash_hex,
        }
    }

    /// Builds one covenant member's signature bundle over a delegation
    fn covenant_bundle(
        del: &DelegationFixture,
        cov_sk: &SigningKey,
        fp_sks: &[SigningKey],
    ) -> (Vec<FpAdaptorSignature>, Binary, Vec<FpAdaptorSignature>) {
        let slashing_sighash = calc_sighash(
            &del.slashing_tx,
            &del.staking_output,
            del.staking_paths.slashing_path_script.as_script(),
        )
        .unwrap();
        let unbonding_sighash = calc_sighash(
            &del.unbonding_tx,
            &del.staking_output,
            del.staking_paths.unbonding_path_script.as_script(),
        )
        .unwrap();
        let unbonding_slashing_sighash = calc_sighash(
            &del.unbonding_slashing_tx,
            &del.unbonding_output,
            del.unbonding_paths.slashing_path_script.as_script(),
        )
        .unwrap();

        let mut slashing_sigs = vec![];
        let mut unbonding_slashing_sigs = vec![];
        for fp_sk in fp_sks {
            let enc_key = EncryptionKey::from_verifying_key(fp_sk.verifying_key()).unwrap();
            let asig =
                AdaptorSignature::enc_sign(cov_sk, &enc_key, &slashing_sighash).unwrap();
            slashing_sigs.push(FpAdaptorSignature {
                fp_btc_pk_hex: pk_hex(fp_sk),
                sig: Binary::from(asig.to_bytes().as_slice()),
            });
            let asig =
                AdaptorSignature::enc_sign(cov_sk, &enc_key, &unbonding_slashing_sighash)
                    .unwrap();
            unbonding_slashing_sigs.push(FpAdaptorSignature {
                fp_btc_pk_hex: pk_hex(fp_sk),
                sig: Binary::from(asig.to_bytes().as_slice()),
            });
        }
        let unbonding_sig = cov_sk.sign_raw(&unbonding_sighash, &[0u8; 32]).unwrap();

        (
            slashing_sigs,
            Binary::from(unbonding_sig.to_bytes().as_slice()),
            unbonding_slashing_sigs,
        )
    }

    fn add_bundle(
        fix: &mut Fixture,
        del: &DelegationFixture,
        cov_idx: usize,
        fp_sks: &[SigningKey],
    ) -> Result<Response, ContractError> {
        let cov_sk = fix.cov_sks[cov_idx].clone();
        let (slashing_sigs, unbonding_sig, unbonding_slashing_sigs) =
            covenant_bundle(del, &cov_sk, fp_sks);
        handle_add_covenant_sigs(
            fix.deps.as_mut(),
            &del.hash_hex,
            pk_hex(&cov_sk),
            slashing_sigs,
            unbonding_sig,
            unbonding_slashing_sigs,
        )
    }

    fn delegation_status(fix: &Fixture, hash_hex: &str, btc_height: u64) -> BTCDelegationStatus {
        let hash = staking_tx_hash(hash_hex).unwrap();
        let del = DELEGATIONS.load(&fix.deps.storage, &hash).unwrap();
        del.status(btc_height, W, QUORUM)
    }

    #[test]
    fn test_register_finality_provider() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        let fp_pk_hex = register_fp(&mut fix, &fp_sk);

        let fp = FPS.load(&fix.deps.storage, &fp_pk_hex).unwrap();
        assert_eq!(fp.btc_pk_hex, fp_pk_hex);
        assert!(!fp.is_slashed());

        // re-registration fails
        let addr = fix.deps.api.addr_make("fp-operator").to_string();
        let msg_hash: [u8; 32] = Sha256::digest(addr.as_bytes()).into();
        let pop_sig = fp_sk.sign_raw(&msg_hash, &[0u8; 32]).unwrap();
        let new_fp = NewFinalityProvider {
            addr,
            description: Some(FinalityProviderDescription::default()),
            commission: Decimal::percent(5),
            btc_pk_hex: fp_pk_hex.clone(),
            pop: Some(ProofOfPossession {
                btc_sig_type: 0,
                btc_sig: Binary::from(pop_sig.to_bytes().as_slice()),
                btc_sig_address: None,
            }),
        };
        assert_eq!(
            handle_register_finality_provider(fix.deps.as_mut(), new_fp.clone()).unwrap_err(),
            ContractError::FinalityProviderAlreadyExists(fp_pk_hex)
        );

        // missing proof of possession fails
        let other_sk = SigningKey::random(&mut thread_rng());
        let mut no_pop = new_fp;
        no_pop.btc_pk_hex = pk_hex(&other_sk);
        no_pop.pop = None;
        assert_eq!(
            handle_register_finality_provider(fix.deps.as_mut(), no_pop).unwrap_err(),
            ContractError::MissingProofOfPossession {}
        );
    }

    #[test]
    fn test_create_delegation_pending() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        register_fp(&mut fix, &fp_sk);
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);

        handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap();

        assert_eq!(
            delegation_status(&fix, &del.hash_hex, 500),
            BTCDelegationStatus::Pending
        );
        // no covenant quorum, no voting power
        let hash = staking_tx_hash(&del.hash_hex).unwrap();
        let stored = DELEGATIONS.load(&fix.deps.storage, &hash).unwrap();
        assert_eq!(stored.voting_power(500, W, QUORUM), 0);

        // duplicate creation fails
        assert_eq!(
            handle_create_delegation(fix.deps.as_mut(), del.msg).unwrap_err(),
            ContractError::DelegationAlreadyExists(del.hash_hex)
        );
    }

    #[test]
    fn test_create_delegation_unregistered_fp() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);
        assert_eq!(
            handle_create_delegation(fix.deps.as_mut(), del.msg).unwrap_err(),
            ContractError::FinalityProviderNotFound(pk_hex(&fp_sk))
        );
    }

    #[test]
    fn test_create_delegation_height_checks() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        register_fp(&mut fix, &fp_sk);
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);

        // staking tx not deep enough under the tip
        BTC_TIP.save(fix.deps.as_mut().storage, &105).unwrap();
        assert!(matches!(
            handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap_err(),
            ContractError::StakingTxNotDeepEnough { .. }
        ));

        // time-lock has less than w blocks left
        BTC_TIP.save(fix.deps.as_mut().storage, &1_060).unwrap();
        assert!(matches!(
            handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap_err(),
            ContractError::StakingTimeLockTooShort { .. }
        ));

        // a start height at the integer limit yields an error, not a panic
        BTC_TIP.save(fix.deps.as_mut().storage, &500).unwrap();
        let mut huge = del.msg;
        huge.start_height = u64::MAX;
        assert!(matches!(
            handle_create_delegation(fix.deps.as_mut(), huge).unwrap_err(),
            ContractError::StakingTxNotDeepEnough { .. }
        ));
    }

    #[test]
    fn test_covenant_quorum_activates() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        register_fp(&mut fix, &fp_sk);
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);
        handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap();
        let fp_sks = vec![fp_sk];

        add_bundle(&mut fix, &del, 0, &fp_sks).unwrap();
        assert_eq!(
            delegation_status(&fix, &del.hash_hex, 500),
            BTCDelegationStatus::Pending
        );

        add_bundle(&mut fix, &del, 1, &fp_sks).unwrap();
        assert_eq!(
            delegation_status(&fix, &del.hash_hex, 500),
            BTCDelegationStatus::Active
        );

        // activation queued an event under the reported tip
        let event = EVENTS.load(&fix.deps.storage, (500, 0)).unwrap();
        assert_eq!(
            event,
            PowerDistUpdateEvent::DelegationStateChange {
                staking_tx_hash: del.hash_hex.clone(),
                new_state: BTCDelegationStatus::Active,
            }
        );
        // and indexed the expiry height (end - w + 1)
        let hash = staking_tx_hash(&del.hash_hex).unwrap();
        assert!(EXPIRY_INDEX.has(&fix.deps.storage, (END_HEIGHT - W + 1, &hash)));

        // once the time-lock nears its end the delegation no longer counts
        assert_eq!(
            delegation_status(&fix, &del.hash_hex, 1_060),
            BTCDelegationStatus::Unbonded
        );
    }

    #[test]
    fn test_covenant_sigs_idempotent_resubmission() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        register_fp(&mut fix, &fp_sk);
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);
        handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap();
        let fp_sks = vec![fp_sk.clone()];

        let cov_sk = fix.cov_sks[0].clone();
        let (slashing_sigs, unbonding_sig, unbonding_slashing_sigs) =
            covenant_bundle(&del, &cov_sk, &fp_sks);
        handle_add_covenant_sigs(
            fix.deps.as_mut(),
            &del.hash_hex,
            pk_hex(&cov_sk),
            slashing_sigs.clone(),
            unbonding_sig.clone(),
            unbonding_slashing_sigs.clone(),
        )
        .unwrap();

        // byte-identical resubmission is accepted and does not duplicate
        handle_add_covenant_sigs(
            fix.deps.as_mut(),
            &del.hash_hex,
            pk_hex(&cov_sk),
            slashing_sigs,
            unbonding_sig.clone(),
            unbonding_slashing_sigs.clone(),
        )
        .unwrap();
        let hash = staking_tx_hash(&del.hash_hex).unwrap();
        let stored = DELEGATIONS.load(&fix.deps.storage, &hash).unwrap();
        assert_eq!(stored.covenant_sigs.len(), 1);

        // a different payload from the same member is a conflict (signing is
        // deterministic, so take the bytes from another member's signatures)
        let (other_slashing_sigs, _, _) = covenant_bundle(&del, &fix.cov_sks[1], &fp_sks);
        let err = handle_add_covenant_sigs(
            fix.deps.as_mut(),
            &del.hash_hex,
            pk_hex(&cov_sk),
            other_slashing_sigs,
            unbonding_sig,
            unbonding_slashing_sigs,
        )
        .unwrap_err();
        assert_eq!(err, ContractError::CovenantSigConflict(pk_hex(&cov_sk)));
    }

    #[test]
    fn test_covenant_sigs_reject_non_member_and_bad_bundle() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        register_fp(&mut fix, &fp_sk);
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);
        handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap();
        let fp_sks = vec![fp_sk];

        // not a covenant member
        let outsider = SigningKey::random(&mut thread_rng());
        let (slashing_sigs, unbonding_sig, unbonding_slashing_sigs) =
            covenant_bundle(&del, &outsider, &fp_sks);
        assert_eq!(
            handle_add_covenant_sigs(
                fix.deps.as_mut(),
                &del.hash_hex,
                pk_hex(&outsider),
                slashing_sigs,
                unbonding_sig,
                unbonding_slashing_sigs,
            )
            .unwrap_err(),
            ContractError::NotACovenantMember(pk_hex(&outsider))
        );

        // bundle keyed by the wrong finality provider set
        let cov_sk = fix.cov_sks[0].clone();
        let wrong_fp = SigningKey::random(&mut thread_rng());
        let (slashing_sigs, unbonding_sig, unbonding_slashing_sigs) =
            covenant_bundle(&del, &cov_sk, std::slice::from_ref(&wrong_fp));
        assert_eq!(
            handle_add_covenant_sigs(
                fix.deps.as_mut(),
                &del.hash_hex,
                pk_hex(&cov_sk),
                slashing_sigs,
                unbonding_sig,
                unbonding_slashing_sigs,
            )
            .unwrap_err(),
            ContractError::CovenantBundleMismatch {}
        );
    }

    #[test]
    fn test_request_unbonding() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        register_fp(&mut fix, &fp_sk);
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);
        handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap();

        let unbonding_sighash = calc_sighash(
            &del.unbonding_tx,
            &del.staking_output,
            del.staking_paths.unbonding_path_script.as_script(),
        )
        .unwrap();
        let sig = fix
            .staker_sk
            .sign_raw(&unbonding_sighash, &[0u8; 32])
            .unwrap();
        let sig_bin = Binary::from(sig.to_bytes().as_slice());

        handle_request_unbonding(fix.deps.as_mut(), &del.hash_hex, sig_bin.clone()).unwrap();

        // no covenant quorums over the undelegation yet
        assert_eq!(
            delegation_status(&fix, &del.hash_hex, 500),
            BTCDelegationStatus::Unbonding
        );
        let event = EVENTS.load(&fix.deps.storage, (500, 0)).unwrap();
        assert_eq!(
            event,
            PowerDistUpdateEvent::DelegationStateChange {
                staking_tx_hash: del.hash_hex.clone(),
                new_state: BTCDelegationStatus::Unbonding,
            }
        );

        // a second request fails
        assert_eq!(
            handle_request_unbonding(fix.deps.as_mut(), &del.hash_hex, sig_bin).unwrap_err(),
            ContractError::UnbondingAlreadyRequested(del.hash_hex.clone())
        );
    }

    #[test]
    fn test_request_unbonding_after_quorums() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        register_fp(&mut fix, &fp_sk);
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);
        handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap();
        let fp_sks = vec![fp_sk];
        add_bundle(&mut fix, &del, 0, &fp_sks).unwrap();
        add_bundle(&mut fix, &del, 1, &fp_sks).unwrap();

        let unbonding_sighash = calc_sighash(
            &del.unbonding_tx,
            &del.staking_output,
            del.staking_paths.unbonding_path_script.as_script(),
        )
        .unwrap();
        let sig = fix
            .staker_sk
            .sign_raw(&unbonding_sighash, &[0u8; 32])
            .unwrap();
        handle_request_unbonding(
            fix.deps.as_mut(),
            &del.hash_hex,
            Binary::from(sig.to_bytes().as_slice()),
        )
        .unwrap();

        // both undelegation quorums are complete, so it goes straight to unbonded
        assert_eq!(
            delegation_status(&fix, &del.hash_hex, 500),
            BTCDelegationStatus::Unbonded
        );
    }

    #[test]
    fn test_selective_slashing_evidence() {
        let mut fix = setup();
        let fp_sk = fix.fp_sks[0].clone();
        register_fp(&mut fix, &fp_sk);
        let del = build_delegation(&fix, std::slice::from_ref(&fp_sk), 1);
        handle_create_delegation(fix.deps.as_mut(), del.msg.clone()).unwrap();

        let env = cosmwasm_std::testing::mock_env();
        let sk_hex = hex::encode(fp_sk.as_nonzero_scalar().to_bytes());
        handle_selective_slashing_evidence(fix.deps.as_mut(), &env, &del.hash_hex, &sk_hex)
            .unwrap();

        let fp = FPS.load(&fix.deps.storage, &pk_hex(&fp_sk)).unwrap();
        assert_eq!(fp.slashed_height, env.block.height);
        let event = EVENTS.load(&fix.deps.storage, (500, 0)).unwrap();
        assert_eq!(
            event,
            PowerDistUpdateEvent::SlashedFp {
                fp_btc_pk_hex: pk_hex(&fp_sk),
            }
        );

        // resubmission fails, the provider is already slashed
        assert_eq!(
            handle_selective_slashing_evidence(fix.deps.as_mut(), &env, &del.hash_hex, &sk_hex)
                .unwrap_err(),
            ContractError::FinalityProviderSlashed(pk_hex(&fp_sk))
        );

        // a key outside the delegation's provider set is rejected
        let stranger = SigningKey::random(&mut thread_rng());
        let stranger_hex = hex::encode(stranger.as_nonzero_scalar().to_bytes());
        assert_eq!(
            handle_selective_slashing_evidence(
                fix.deps.as_mut(),
                &env,
                &del.hash_hex,
                &stranger_hex
            )
            .unwrap_err(),
            ContractError::EvidenceKeyMismatch(pk_hex(&stranger))
        );

        // new delegations to the slashed provider are rejected
        let del2 = build_delegation(&fix, std::slice::from_ref(&fp_sk), 2);
        assert_eq!(
            handle_create_delegation(fix.deps.as_mut(), del2.msg).unwrap_err(),
            ContractError::FinalityProviderSlashed(pk_hex(&fp_sk))
        );
    }
}
