use crate::error::Error;
use crate::{to_sign, to_spend, Result};

use bitcoin::hashes::Hash;
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::{Address, AddressType, Amount, EcdsaSighashType, ScriptBuf, TapSighashType};
use bitcoin::{Transaction, WPubkeyHash, Witness};
use k256::ecdsa::signature::hazmat::PrehashVerifier;

/// verify checks that a BIP-322 witness signs the given message with the
/// given address.
///
/// There is no script interpreter here; instead the witness is checked
/// directly against the spending conditions of the address types allowed for
/// proofs of possession: p2wpkh and p2tr through the BIP-86 key spending
/// path. Anything else is rejected
pub fn verify(msg: &[u8], witness: &Witness, address: &Address) -> Result<()> {
    let to_spend_tx = to_spend(msg, address);
    let to_sign_tx = to_sign(&to_spend_tx);

    match address.address_type() {
        Some(AddressType::P2wpkh) => verify_p2wpkh(&to_spend_tx, &to_sign_tx, witness),
        Some(AddressType::P2tr) => verify_p2tr(&to_spend_tx, &to_sign_tx, witness),
        _ => Err(Error::UnsupportedAddressType {}),
    }
}

/// p2wpkh: witness is `[ecdsa_sig || sighash_type, compressed pubkey]`,
/// signed over the BIP-143 segwit v0 sighash
fn verify_p2wpkh(to_spend: &Transaction, to_sign: &Transaction, witness: &Witness) -> Result<()> {
    if witness.len() != 2 {
        return Err(Error::WrongWitnessStackSize {
            address_type: "p2wpkh",
            expected: 2,
            got: witness.len(),
        });
    }
    let sig_bytes = witness.nth(0).unwrap();
    let pubkey_bytes = witness.nth(1).unwrap();

    let (&sighash_byte, der_bytes) = sig_bytes
        .split_last()
        .ok_or_else(|| Error::InvalidEcdsaSignature("empty signature".to_string()))?;
    let sighash_type = EcdsaSighashType::from_standard(sighash_byte as u32)
        .map_err(|_| Error::UnsupportedSighashType(sighash_byte))?;

    // The pubkey must hash to the witness program the address commits to
    let pubkey_hash = WPubkeyHash::hash(pubkey_bytes);
    if to_spend.output[0].script_pubkey != ScriptBuf::new_p2wpkh(&pubkey_hash) {
        return Err(Error::PublicKeyMismatch {});
    }

    let sighash = SighashCache::new(to_sign)
        .p2wpkh_signature_hash(
            0,
            &to_spend.output[0].script_pubkey,
            Amount::ZERO,
            sighash_type,
        )
        .map_err(|e| Error::SighashError(e.to_string()))?;

    let verifying_key = k256::ecdsa::VerifyingKey::from_sec1_bytes(pubkey_bytes)
        .map_err(|e| Error::FailedToParsePublicKey(e.to_string()))?;
    let signature = k256::ecdsa::Signature::from_der(der_bytes)
        .map_err(|e| Error::InvalidEcdsaSignature(e.to_string()))?;
    let signature = signature.normalize_s().unwrap_or(signature);
    verifying_key
        .verify_prehash(sighash.as_byte_array(), &signature)
        .map_err(|e| Error::InvalidEcdsaSignature(e.to_string()))
}

/// p2tr key spending path: witness is a single Schnorr signature (64 bytes,
/// or 65 with an explicit sighash type), signed over the taproot key-spend
/// sighash and verified against the output key in the witness program
fn verify_p2tr(to_spend: &Transaction, to_sign: &Transaction, witness: &Witness) -> Result<()> {
    if witness.len() != 1 {
        return Err(Error::WrongWitnessStackSize {
            address_type: "p2tr",
            expected: 1,
            got: witness.len(),
        });
    }
    let sig_bytes = witness.nth(0).unwrap();

    let (sig64, sighash_type) = match sig_bytes.len() {
        64 => (sig_bytes, TapSighashType::Default),
        65 => {
            let sighash_type = TapSighashType::from_consensus_u8(sig_bytes[64])
                .map_err(|_| Error::UnsupportedSighashType(sig_bytes[64]))?;
            (&sig_bytes[..64], sighash_type)
        }
        n => {
            return Err(Error::InvalidSchnorrSignature(format!(
                "wrong signature length {n}"
            )))
        }
    };

    let prevouts = [to_spend.output[0].clone()];
    let sighash = SighashCache::new(to_sign)
        .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), sighash_type)
        .map_err(|e| Error::SighashError(e.to_string()))?;

    // The witness program of a p2tr output is the 32-byte output key
    let script_bytes = to_spend.output[0].script_pubkey.as_bytes();
    let output_key = &script_bytes[2..34];

    let verifying_key = k256::schnorr::VerifyingKey::from_bytes(output_key)
        .map_err(|e| Error::FailedToParsePublicKey(e.to_string()))?;
    let signature = k256::schnorr::Signature::try_from(sig64)
        .map_err(|e| Error::InvalidSchnorrSignature(e.to_string()))?;
    verifying_key
        .verify_prehash(sighash.as_byte_array(), &signature)
        .map_err(|e| Error::InvalidSchnorrSignature(e.to_string()))
}
