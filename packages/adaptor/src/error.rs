use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Malformed adaptor signature: expected {0} bytes, got {1}")]
    MalformedAdaptorSignature(usize, usize),
    #[error("Malformed encryption key: expected {0} bytes, got {1}")]
    MalformedEncryptionKey(usize, usize),
    #[error("Malformed decryption key: expected {0} bytes, got {1}")]
    MalformedDecryptionKey(usize, usize),
    #[error("Invalid first byte of a compressed point: expected 0x02 or 0x03, got {0}")]
    InvalidPointFirstByte(u8),
    #[error("Failed to decompress bytes to a projective point")]
    DecompressPointFailed {},
    #[error("Failed to parse bytes as a mod n scalar")]
    FailedToParseScalar {},
    #[error("Failed to parse public key: {0}")]
    FailedToParsePublicKey(String),
    #[error("Point {0} is at infinity")]
    PointAtInfinity(String),
    #[error("Point {0} has odd y axis")]
    PointWithOddY(String),
    #[error("Failed to verify adaptor signature")]
    VerifyAdaptorSigFailed {},
    #[error("The given scalar is zero")]
    ZeroScalar {},
    #[error("Exhausted nonce iterations while generating an adaptor signature")]
    NonceRetriesExhausted {},
    #[error("Invalid Schnorr signature: {0}")]
    InvalidSchnorrSignature(String),
}
