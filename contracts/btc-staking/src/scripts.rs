//! Taproot script paths of the staking and unbonding outputs, and signature
//! verification against their script-spend sighashes.

use crate::error::ContractError;

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::Hash;
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::PublicKey;
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::taproot::TaprootBuilder;
use bitcoin::{Address, Network, Script, ScriptBuf, Transaction, TxOut, XOnlyPublicKey};

use k256::schnorr::signature::hazmat::PrehashVerifier;
use k256::schnorr::{Signature as SchnorrSignature, VerifyingKey};

use staking_adaptor::{AdaptorSignature, EncryptionKey};

type Result<T> = std::result::Result<T, ContractError>;

const UNSPENDABLE_KEY: &str = "0250929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

fn unspendable_key_path_internal_pub_key() -> XOnlyPublicKey {
    let key_bytes = hex::decode(UNSPENDABLE_KEY).unwrap();

    let (pk_x, _) = PublicKey::from_slice(&key_bytes)
        .unwrap()
        .x_only_public_key();
    pk_x
}

/// xonly_from_hex parses a BIP-340 x-only public key from hex
pub fn xonly_from_hex(pk_hex: &str) -> Result<XOnlyPublicKey> {
    let pk_bytes = hex::decode(pk_hex)?;
    XOnlyPublicKey::from_slice(&pk_bytes)
        .map_err(|e| ContractError::InvalidPublicKey(e.to_string()))
}

/// verifying_key_from_hex parses a BIP-340 x-only public key from hex into a
/// Schnorr verifying key
pub fn verifying_key_from_hex(pk_hex: &str) -> Result<VerifyingKey> {
    let pk_bytes = hex::decode(pk_hex)?;
    VerifyingKey::from_bytes(&pk_bytes)
        .map_err(|e| ContractError::InvalidPublicKey(e.to_string()))
}

// sort_keys sorts public keys in lexicographical order
pub fn sort_keys(keys: &mut [XOnlyPublicKey]) {
    keys.sort_by(|a, b| {
        let a_serialized = a.serialize();
        let b_serialized = b.serialize();
        a_serialized.cmp(&b_serialized)
    });
}

/// prepare_keys_for_multisig_script prepares keys for multisig, ensuring there
/// are no duplicates
pub fn prepare_keys_for_multisig_script(keys: &[XOnlyPublicKey]) -> Result<Vec<XOnlyPublicKey>> {
    if keys.len() < 2 {
        return Err(ContractError::InsufficientMultisigKeys {});
    }

    let mut sorted_keys = keys.to_vec();
    sort_keys(&mut sorted_keys);

    // Check for duplicates
    for window in sorted_keys.windows(2) {
        if window[0] == window[1] {
            return Err(ContractError::DuplicateKeys {});
        }
    }

    Ok(sorted_keys)
}

/// assemble_multisig_script assembles a multisig script
fn assemble_multisig_script(
    pubkeys: &[XOnlyPublicKey],
    quorum: usize,
    with_verify: bool,
) -> Result<ScriptBuf> {
    if quorum > pubkeys.len() {
        return Err(ContractError::QuorumExceedsKeyCount {});
    }

    let mut builder = Builder::new();
    for (i, key) in pubkeys.iter().enumerate() {
        builder = builder.push_slice(key.serialize());
        if i == 0 {
            builder = builder.push_opcode(OP_CHECKSIG);
        } else {
            builder = builder.push_opcode(OP_CHECKSIGADD);
        }
    }

    builder = builder.push_int(quorum as i64);
    if with_verify {
        builder = builder.push_opcode(OP_NUMEQUALVERIFY);
    } else {
        builder = builder.push_opcode(OP_NUMEQUAL);
    }

    Ok(builder.into_script())
}

/// build_multisig_script creates a multisig script
pub fn build_multisig_script(
    keys: &[XOnlyPublicKey],
    quorum: usize,
    with_verify: bool,
) -> Result<ScriptBuf> {
    let prepared_keys = prepare_keys_for_multisig_script(keys)?;
    assemble_multisig_script(&prepared_keys, quorum, with_verify)
}

/// build_time_lock_script creates a timelock script
pub fn build_time_lock_script(pub_key: &XOnlyPublicKey, lock_time: u16) -> Result<ScriptBuf> {
    let builder = Builder::new()
        .push_slice(pub_key.serialize())
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(lock_time as i64)
        .push_opcode(OP_CSV);
    let script = builder.into_script();
    Ok(script)
}

/// build_single_key_sig_script builds a single key signature script
pub fn build_single_key_sig_script(
    pub_key: &XOnlyPublicKey,
    with_verify: bool,
) -> Result<ScriptBuf> {
    let mut builder = Builder::new().push_slice(pub_key.serialize());

    if with_verify {
        builder = builder.push_opcode(OP_CHECKSIGVERIFY);
    } else {
        builder = builder.push_opcode(OP_CHECKSIG);
    }

    Ok(builder.into_script())
}

/// build_relative_time_lock_pk_script builds the taproot pk script of an
/// output locked to `pk` for `lock_time` blocks. It is the expected change
/// output script of slashing transactions
pub fn build_relative_time_lock_pk_script(
    pk: &XOnlyPublicKey,
    lock_time: u16,
    network: Network,
) -> Result<ScriptBuf> {
    let unspendable_key_path_key = unspendable_key_path_internal_pub_key();

    let script = build_time_lock_script(pk, lock_time)?;

    let secp = Secp256k1::verification_only();
    let mut builder = TaprootBuilder::new();
    builder = builder
        .add_leaf(0, script.clone())
        .map_err(|_| ContractError::AddLeafFailed {})?;
    let taproot_spend_info = builder
        .finalize(&secp, unspendable_key_path_key)
        .map_err(|_| ContractError::FinalizeTaprootFailed {})?;

    let taproot_address = Address::p2tr(
        &secp,
        taproot_spend_info.internal_key(),
        taproot_spend_info.merkle_root(),
        network,
    );
    let taproot_pk_script = taproot_address.script_pubkey();

    Ok(taproot_pk_script)
}

fn aggregate_scripts(scripts: &[ScriptBuf]) -> ScriptBuf {
    let mut final_script = Vec::new();

    for script in scripts {
        final_script.extend_from_slice(script.as_bytes());
    }

    ScriptBuf::from_bytes(final_script)
}

/// StakingScriptPaths holds all spending paths of a staking script: the
/// timelock path, the on-demand unbonding path, and the slashing path.
/// The same structure is used for the staking output (with the staking
/// time-lock) and the unbonding output (with the unbonding time-lock)
pub struct StakingScriptPaths {
    // time_lock_path_script is the script path for normal unbonding
    // <Staker_PK> OP_CHECKSIGVERIFY <Staking_Time_Blocks> OP_CHECKSEQUENCEVERIFY
    pub time_lock_path_script: ScriptBuf,
    // unbonding_path_script is the script path for on-demand early unbonding
    // <Staker_PK> OP_CHECKSIGVERIFY
    // <Covenant_PK1> OP_CHECKSIG ... <Covenant_PKN> OP_CHECKSIGADD M OP_NUMEQUAL
    pub unbonding_path_script: ScriptBuf,
    // slashing_path_script is the script path for slashing
    // <Staker_PK> OP_CHECKSIGVERIFY
    // <FP_PK1> OP_CHECKSIG ... <FP_PKN> OP_CHECKSIGADD 1 OP_NUMEQUALVERIFY
    // <Covenant_PK1> OP_CHECKSIG ... <Covenant_PKN> OP_CHECKSIGADD M OP_NUMEQUAL
    pub slashing_path_script: ScriptBuf,
}

impl StakingScriptPaths {
    pub fn new(
        staker_key: &XOnlyPublicKey,
        fp_keys: &[XOnlyPublicKey],
        covenant_keys: &[XOnlyPublicKey],
        covenant_quorum: usize,
        lock_time: u16,
    ) -> Result<Self> {
        let time_lock_path_script = build_time_lock_script(staker_key, lock_time)?;
        let covenant_multisig_script =
            build_multisig_script(covenant_keys, covenant_quorum, false)?;
        let staker_sig_script = build_single_key_sig_script(staker_key, true)?;
        let fp_script = if fp_keys.len() == 1 {
            build_single_key_sig_script(&fp_keys[0], true)?
        } else {
            build_multisig_script(fp_keys, 1, true)?
        };
        let unbonding_path_script =
            aggregate_scripts(&[staker_sig_script.clone(), covenant_multisig_script.clone()]);
        let slashing_path_script =
            aggregate_scripts(&[staker_sig_script, fp_script, covenant_multisig_script]);

        Ok(StakingScriptPaths {
            time_lock_path_script,
            unbonding_path_script,
            slashing_path_script,
        })
    }
}

pub(crate) fn calc_sighash(
    transaction: &Transaction,
    funding_output: &TxOut,
    path_script: &Script,
) -> Result<[u8; 32]> {
    if transaction.input.len() != 1 {
        return Err(ContractError::TxInputCountMismatch(
            1,
            transaction.input.len(),
        ));
    }

    // calculate tap leaf hash for the given path of the script
    let tap_leaf_hash = path_script.tapscript_leaf_hash();

    // calculate the sig hash of the tx with the given funding output
    let mut sighash_cache = SighashCache::new(transaction);
    let sighash = sighash_cache
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(&[funding_output]),
            tap_leaf_hash,
            bitcoin::TapSighashType::Default,
        )
        .map_err(|e| ContractError::SighashError(e.to_string()))?;

    Ok(sighash.to_raw_hash().to_byte_array())
}

/// verify_transaction_sig_with_output verifies the validity of a Schnorr
/// signature for a given transaction
pub fn verify_transaction_sig_with_output(
    transaction: &Transaction,
    funding_output: &TxOut,
    path_script: &Script,
    pub_key: &VerifyingKey,
    signature: &SchnorrSignature,
) -> Result<()> {
    // calculate the sig hash of the tx for the given spending path
    let sighash = calc_sighash(transaction, funding_output, path_script)?;
    // verify the signature w.r.t. the signature, the sig hash, and the public key
    pub_key
        .verify_prehash(&sighash, signature)
        .map_err(|e| ContractError::InvalidSignature(e.to_string()))
}

/// enc_verify_transaction_sig_with_output verifies the validity of a Schnorr
/// adaptor signature for a given transaction
pub fn enc_verify_transaction_sig_with_output(
    transaction: &Transaction,
    funding_output: &TxOut,
    path_script: &Script,
    pub_key: &VerifyingKey,
    enc_key: &EncryptionKey,
    signature: &AdaptorSignature,
) -> Result<()> {
    // calculate the sig hash of the tx for the given spending path
    let sighash_msg = calc_sighash(transaction, funding_output, path_script)?;

    // verify the signature w.r.t. the signature, the sig hash, and the public key
    Ok(signature.enc_verify(pub_key, enc_key, sighash_msg)?)
}
