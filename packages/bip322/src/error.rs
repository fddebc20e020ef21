use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Failed to decode witness: {0}")]
    MalformedWitness(String),
    #[error("Too many witness items to fit into max message size [count {0}, max {1}]")]
    TooManyWitnessItems(usize, usize),
    #[error("Witness item is larger than the max allowed size [size {0}, max {1}]")]
    WitnessItemTooLarge(usize, usize),
    #[error("Witness stack has {got} items, expected {expected} for {address_type}")]
    WrongWitnessStackSize {
        address_type: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Unsupported address type. Only supported options are p2wpkh and p2tr bip86 key spending path")]
    UnsupportedAddressType {},
    #[error("Failed to parse address: {0}")]
    InvalidAddress(String),
    #[error("Failed to parse public key: {0}")]
    FailedToParsePublicKey(String),
    #[error("Public key does not match the address witness program")]
    PublicKeyMismatch {},
    #[error("Unsupported sighash type byte: {0}")]
    UnsupportedSighashType(u8),
    #[error("Failed to compute sighash: {0}")]
    SighashError(String),
    #[error("Invalid ECDSA signature: {0}")]
    InvalidEcdsaSignature(String),
    #[error("Invalid Schnorr signature: {0}")]
    InvalidSchnorrSignature(String),
}
