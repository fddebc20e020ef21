//! Stateless validation of finality provider registrations and BTC
//! delegations: proof of possession, transaction well-formedness, and the
//! pre-signed slashing commitments.

use std::str::FromStr;

use bitcoin::consensus::deserialize;
use bitcoin::{Address, OutPoint, Transaction, TxOut, XOnlyPublicKey};

use cosmwasm_std::{Decimal, Uint128};
use k256::schnorr::signature::hazmat::PrehashVerifier;
use k256::schnorr::Signature as SchnorrSignature;
use sha2::{Digest, Sha256};

use staking_bip322::{
    parse_address, pubkey_to_p2tr_address, pubkey_to_p2wpkh_address, simple_sig_to_witness,
};

use crate::error::ContractError;
use crate::msg::{BtcSigType, NewBtcDelegation, ProofOfPossession};
use crate::scripts::{
    build_relative_time_lock_pk_script, verifying_key_from_hex, xonly_from_hex,
    verify_transaction_sig_with_output, StakingScriptPaths,
};
use crate::state::config::Params;

type Result<T> = std::result::Result<T, ContractError>;

/// Outputs below this value are considered dust
const MIN_NON_DUST_SAT: u64 = 546;

/// verify_pop checks that the proof of possession demonstrates control of the
/// BTC key by the given signer address
pub fn verify_pop(
    params: &Params,
    btc_pk_hex: &str,
    signer_addr: &str,
    pop: &ProofOfPossession,
) -> Result<()> {
    match BtcSigType::try_from(pop.btc_sig_type)? {
        BtcSigType::Bip340 => {
            let btc_pk = verifying_key_from_hex(btc_pk_hex)?;
            let sig = SchnorrSignature::try_from(pop.btc_sig.as_slice())
                .map_err(|e| ContractError::InvalidSignature(e.to_string()))?;
            let msg_hash: [u8; 32] = Sha256::digest(signer_addr.as_bytes()).into();
            btc_pk
                .verify_prehash(&msg_hash, &sig)
                .map_err(|e| ContractError::InvalidSignature(e.to_string()))
        }
        BtcSigType::Bip322 => {
            let btc_network = bitcoin::Network::from(params.btc_network);
            let sig_addr_str = pop
                .btc_sig_address
                .as_ref()
                .ok_or(ContractError::MissingPopAddress {})?;
            let address = parse_address(sig_addr_str, btc_network)?;

            // The signing address must be derived from the BTC key
            let btc_pk = xonly_from_hex(btc_pk_hex)?;
            let mut compressed = [0u8; 33];
            compressed[0] = 0x02;
            compressed[1..].copy_from_slice(&btc_pk.serialize());
            let pubkey = bitcoin::PublicKey::from_slice(&compressed)
                .map_err(|e| ContractError::InvalidPublicKey(e.to_string()))?;
            let p2wpkh = pubkey_to_p2wpkh_address(&pubkey, btc_network)?;
            let p2tr = pubkey_to_p2tr_address(&pubkey, btc_network);
            if address != p2wpkh && address != p2tr {
                return Err(ContractError::InvalidAddress(format!(
                    "address {sig_addr_str} is not derived from the BTC key"
                )));
            }

            let witness = simple_sig_to_witness(pop.btc_sig.as_slice())?;
            Ok(staking_bip322::verify(
                signer_addr.as_bytes(),
                &witness,
                &address,
            )?)
        }
    }
}

/// decode_xonly_pks parses a list of BIP-340 public keys from hex
pub fn decode_xonly_pks(pk_hexes: &[String]) -> Result<Vec<XOnlyPublicKey>> {
    pk_hexes.iter().map(|pk| xonly_from_hex(pk)).collect()
}

pub(crate) fn parse_btc_tx(tx_bytes: &[u8]) -> Result<Transaction> {
    deserialize(tx_bytes).map_err(|e| ContractError::InvalidBtcTx(e.to_string()))
}

fn parse_slashing_rate(params: &Params) -> Result<Decimal> {
    Decimal::from_str(&params.slashing_rate)
        .map_err(|_| ContractError::InvalidSlashingRate(params.slashing_rate.clone()))
}

/// check_slashing_tx validates a pre-signed slashing tx against the funding
/// output it spends: it must pay at least the slashing portion of the staked
/// value to the slashing address, lock the change to the staker for the
/// unbonding time, carry an adequate fee, and not overspend
pub fn check_slashing_tx(
    params: &Params,
    slashing_tx: &Transaction,
    funding_outpoint: OutPoint,
    funding_value: u64,
    staker_pk: &XOnlyPublicKey,
    change_lock_time: u16,
) -> Result<()> {
    if slashing_tx.input.len() != 1 {
        return Err(ContractError::TxInputCountMismatch(
            1,
            slashing_tx.input.len(),
        ));
    }
    if slashing_tx.input[0].previous_output != funding_outpoint {
        return Err(ContractError::SlashingTxNotSpendingFundingOutput {});
    }
    if slashing_tx.output.len() != 2 {
        return Err(ContractError::InvalidBtcTx(format!(
            "slashing tx must have 2 outputs, got {}",
            slashing_tx.output.len()
        )));
    }

    let slashing_rate = parse_slashing_rate(params)?;
    let min_slash_amount = Uint128::from(funding_value).mul_floor(slashing_rate);
    let slash_output = &slashing_tx.output[0];
    if Uint128::from(slash_output.value.to_sat()) < min_slash_amount {
        return Err(ContractError::SlashingAmountTooLow(
            slash_output.value.to_sat(),
            min_slash_amount.u128() as u64,
        ));
    }

    let btc_network = bitcoin::Network::from(params.btc_network);
    let slashing_address = Address::from_str(&params.slashing_address)
        .map_err(|e| ContractError::InvalidAddress(e.to_string()))?
        .require_network(btc_network)
        .map_err(|e| ContractError::InvalidAddress(e.to_string()))?;
    if slash_output.script_pubkey != slashing_address.script_pubkey() {
        return Err(ContractError::WrongSlashingOutput {});
    }

    let change_output = &slashing_tx.output[1];
    let expected_change_script =
        build_relative_time_lock_pk_script(staker_pk, change_lock_time, btc_network)?;
    if change_output.script_pubkey != expected_change_script {
        return Err(ContractError::WrongSlashingChangeOutput {});
    }

    for out in &slashing_tx.output {
        if out.value.to_sat() <= MIN_NON_DUST_SAT {
            return Err(ContractError::DustOutput {});
        }
    }

    let total_out: u64 = slashing_tx
        .output
        .iter()
        .map(|out| out.value.to_sat())
        .sum();
    if total_out > funding_value {
        return Err(ContractError::SlashingOverspends {});
    }
    let fee = funding_value - total_out;
    if fee < params.min_slashing_tx_fee_sat {
        return Err(ContractError::SlashingFeeTooLow(
            fee,
            params.min_slashing_tx_fee_sat,
        ));
    }

    Ok(())
}

/// DelegationArtifacts holds the parsed transactions and derived script paths
/// of a delegation, as needed to verify signatures against the right sighashes
pub(crate) struct DelegationArtifacts {
    pub staking_tx: Transaction,
    pub staking_output: TxOut,
    pub staking_outpoint: OutPoint,
    /// Script paths of the staking output (staking time-lock)
    pub staking_paths: StakingScriptPaths,
    pub slashing_tx: Transaction,
    pub unbonding_tx: Transaction,
    pub unbonding_output: TxOut,
    pub unbonding_outpoint: OutPoint,
    /// Script paths of the unbonding output (unbonding time-lock)
    pub unbonding_paths: StakingScriptPaths,
    pub unbonding_slashing_tx: Transaction,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn build_artifacts(
    params: &Params,
    staker_pk_hex: &str,
    fp_pk_hexes: &[String],
    start_height: u64,
    end_height: u64,
    staking_tx_bytes: &[u8],
    staking_output_idx: u32,
    slashing_tx_bytes: &[u8],
    unbonding_tx_bytes: &[u8],
    unbonding_slashing_tx_bytes: &[u8],
    unbonding_time: u32,
) -> Result<DelegationArtifacts> {
    let staker_pk = xonly_from_hex(staker_pk_hex)?;
    let fp_pks = decode_xonly_pks(fp_pk_hexes)?;
    let cov_pks = decode_xonly_pks(&params.covenant_pks)?;
    let quorum = params.covenant_quorum as usize;

    if end_height <= start_height {
        return Err(ContractError::InvalidStakingTime(0));
    }
    let staking_time = end_height - start_height;
    let staking_time = u16::try_from(staking_time)
        .map_err(|_| ContractError::InvalidStakingTime(staking_time))?;
    let unbonding_lock_time = u16::try_from(unbonding_time)
        .map_err(|_| ContractError::InvalidLockTime(unbonding_time, u16::MAX as u32))?;

    let staking_tx = parse_btc_tx(staking_tx_bytes)?;
    if !staking_tx.lock_time.is_block_height() {
        return Err(ContractError::InvalidLockType {});
    }
    let staking_output = staking_tx
        .output
        .get(staking_output_idx as usize)
        .ok_or_else(|| {
            ContractError::InvalidBtcTx(format!(
                "staking output index {staking_output_idx} out of range"
            ))
        })?
        .clone();
    let staking_outpoint = OutPoint {
        txid: staking_tx.txid(),
        vout: staking_output_idx,
    };
    let staking_paths =
        StakingScriptPaths::new(&staker_pk, &fp_pks, &cov_pks, quorum, staking_time)?;

    let slashing_tx = parse_btc_tx(slashing_tx_bytes)?;

    let unbonding_tx = parse_btc_tx(unbonding_tx_bytes)?;
    if unbonding_tx.input.len() != 1 {
        return Err(ContractError::TxInputCountMismatch(
            1,
            unbonding_tx.input.len(),
        ));
    }
    if unbonding_tx.input[0].previous_output != staking_outpoint {
        return Err(ContractError::UnbondingTxNotSpendingStakingOutput {});
    }
    let unbonding_output = unbonding_tx
        .output
        .first()
        .ok_or_else(|| ContractError::InvalidBtcTx("unbonding tx has no outputs".to_string()))?
        .clone();
    let unbonding_outpoint = OutPoint {
        txid: unbonding_tx.txid(),
        vout: 0,
    };
    let unbonding_paths =
        StakingScriptPaths::new(&staker_pk, &fp_pks, &cov_pks, quorum, unbonding_lock_time)?;

    let unbonding_slashing_tx = parse_btc_tx(unbonding_slashing_tx_bytes)?;

    Ok(DelegationArtifacts {
        staking_tx,
        staking_output,
        staking_outpoint,
        staking_paths,
        slashing_tx,
        unbonding_tx,
        unbonding_output,
        unbonding_outpoint,
        unbonding_paths,
        unbonding_slashing_tx,
    })
}

/// verify_new_delegation runs the stateless checks over a new delegation: the
/// transaction chain is consistent, both slashing txs commit to the slashing
/// parameters, and the delegator pre-signed both slashing paths
pub fn verify_new_delegation(params: &Params, del: &NewBtcDelegation) -> Result<()> {
    let artifacts = build_artifacts(
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
    )?;
    let staker_pk = xonly_from_hex(&del.btc_pk_hex)?;
    let staker_vk = verifying_key_from_hex(&del.btc_pk_hex)?;
    let unbonding_lock_time = del.unbonding_time as u16;

    // the slashing tx slashes the staking output
    check_slashing_tx(
        params,
        &artifacts.slashing_tx,
        artifacts.staking_outpoint,
        artifacts.staking_output.value.to_sat(),
        &staker_pk,
        unbonding_lock_time,
    )?;

    // the delegator pre-signed the slashing path of the staking output
    let slashing_sig = SchnorrSignature::try_from(del.delegator_slashing_sig.as_slice())
        .map_err(|e| ContractError::InvalidSignature(e.to_string()))?;
    verify_transaction_sig_with_output(
        &artifacts.slashing_tx,
        &artifacts.staking_output,
        artifacts.staking_paths.slashing_path_script.as_script(),
        &staker_vk,
        &slashing_sig,
    )?;

    // the unbonding slashing tx slashes the unbonding output
    check_slashing_tx(
        params,
        &artifacts.unbonding_slashing_tx,
        artifacts.unbonding_outpoint,
        artifacts.unbonding_output.value.to_sat(),
        &staker_pk,
        unbonding_lock_time,
    )?;

    // the delegator pre-signed the slashing path of the unbonding output
    let unbonding_slashing_sig =
        SchnorrSignature::try_from(del.undelegation_info.delegator_slashing_sig.as_slice())
            .map_err(|e| ContractError::InvalidSignature(e.to_string()))?;
    verify_transaction_sig_with_output(
        &artifacts.unbonding_slashing_tx,
        &artifacts.unbonding_output,
        artifacts.unbonding_paths.slashing_path_script.as_script(),
        &staker_vk,
        &unbonding_slashing_sig,
    )?;

    Ok(())
}
