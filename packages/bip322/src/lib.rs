//! BIP-322 generic signed message support, restricted to the "simple"
//! signature format and the address types used for proofs of possession:
//! p2wpkh and p2tr (BIP-86 key spending path).

pub mod error;
mod verify;
mod witness;

pub use verify::verify;
pub use witness::{serialize_witness, simple_sig_to_witness};

use crate::error::Error;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::OP_0;
use bitcoin::script::Builder;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use sha2::{Digest, Sha256};

pub type Result<T> = std::result::Result<T, error::Error>;

const BIP322_TAG: &[u8] = b"BIP0322-signed-message";

/// tagged_msg_hash builds the BIP-340 tagged hash of a message, i.e.
/// sha256(sha256(tag) || sha256(tag) || msg), with the BIP-322 message tag
pub fn tagged_msg_hash(msg: &[u8]) -> [u8; 32] {
    let tag_hash = Sha256::digest(BIP322_TAG);
    Sha256::new()
        .chain_update(tag_hash)
        .chain_update(tag_hash)
        .chain_update(msg)
        .finalize()
        .into()
}

/// to_spend builds the virtual transaction that a BIP-322 signature spends.
/// Its only input spends the all-zero outpoint with a signature script of
/// `OP_0 PUSH32 [ tagged msg hash ]`, and its only output pays zero value to
/// the signer's address
pub fn to_spend(msg: &[u8], address: &Address) -> Transaction {
    let script_sig = Builder::new()
        .push_opcode(OP_0)
        .push_slice(tagged_msg_hash(msg))
        .into_script();
    Transaction {
        version: Version(0),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout: 0xFFFFFFFF,
            },
            script_sig,
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: address.script_pubkey(),
        }],
    }
}

/// to_sign builds the virtual transaction that carries the signature witness.
/// It spends output 0 of the given `to_spend` transaction and pays zero value
/// to an `OP_RETURN` output. The witness is left empty for the caller to fill
pub fn to_sign(to_spend: &Transaction) -> Transaction {
    Transaction {
        version: Version(0),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: to_spend.txid(),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: Builder::new()
                .push_opcode(bitcoin::opcodes::all::OP_RETURN)
                .into_script(),
        }],
    }
}

/// parse_address parses a Bitcoin address string and checks it belongs to
/// the given network
pub fn parse_address(address: &str, network: Network) -> Result<Address> {
    address
        .parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .map_err(|e| Error::InvalidAddress(e.to_string()))?
        .require_network(network)
        .map_err(|e| Error::InvalidAddress(e.to_string()))
}

/// pubkey_to_p2wpkh_address derives the p2wpkh address of a compressed
/// public key
pub fn pubkey_to_p2wpkh_address(pubkey: &bitcoin::PublicKey, network: Network) -> Result<Address> {
    Address::p2wpkh(pubkey, network).map_err(|e| Error::InvalidAddress(e.to_string()))
}

/// pubkey_to_p2tr_address derives the p2tr address of a public key using the
/// BIP-86 key spending path (no script tree)
pub fn pubkey_to_p2tr_address(pubkey: &bitcoin::PublicKey, network: Network) -> Address {
    let secp = bitcoin::secp256k1::Secp256k1::verification_only();
    let (internal_key, _) = pubkey.inner.x_only_public_key();
    Address::p2tr(&secp, internal_key, None, network)
}
