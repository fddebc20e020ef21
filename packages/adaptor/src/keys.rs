use crate::error::Error;
use crate::sig::bytes_to_point;
use crate::Result;

use k256::elliptic_curve::group::prime::PrimeCurveAffine;
use k256::elliptic_curve::rand_core::CryptoRngCore;
use k256::schnorr::VerifyingKey;
use k256::{
    elliptic_curve::{
        ops::MulByGenerator,
        point::{AffineCoordinates, DecompressPoint},
        sec1::ToEncodedPoint,
        subtle::Choice,
        PrimeField,
    },
    AffinePoint, ProjectivePoint, Scalar,
};

/// DECRYPTION_KEY_SIZE is the size of a serialized decryption key, i.e. a
/// scalar on the secp256k1 curve
const DECRYPTION_KEY_SIZE: usize = 32;

/// ENCRYPTION_KEY_SIZE is the size of a serialized encryption key, i.e. a
/// point on the secp256k1 curve in compressed form
const ENCRYPTION_KEY_SIZE: usize = 33;

/// EncryptionKey is the public image `T = t*G` of a decryption key.
/// It is never the point at infinity and is normalized to an even y coordinate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionKey(ProjectivePoint);

/// DecryptionKey is a nonzero scalar `t`, normalized so that `t*G` has an
/// even y coordinate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionKey(Scalar);

impl EncryptionKey {
    pub fn new(point: ProjectivePoint) -> Result<Self> {
        let affine = point.to_affine();
        if affine.is_identity().into() {
            return Err(Error::PointAtInfinity("encryption key".to_string()));
        }
        // Normalize to even y
        let point = if affine.y_is_odd().into() {
            -point
        } else {
            point
        };
        Ok(EncryptionKey(point))
    }

    /// from_bytes parses a 33-byte compressed SEC1 point into an encryption key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENCRYPTION_KEY_SIZE {
            return Err(Error::MalformedEncryptionKey(
                ENCRYPTION_KEY_SIZE,
                bytes.len(),
            ));
        }
        if bytes[0] != 0x02 && bytes[0] != 0x03 {
            return Err(Error::InvalidPointFirstByte(bytes[0]));
        }
        let is_y_odd = bytes[0] == 0x03;
        let point_option = AffinePoint::decompress(
            k256::FieldBytes::from_slice(&bytes[1..]),
            Choice::from(is_y_odd as u8),
        );
        let point = if point_option.is_some().into() {
            ProjectivePoint::from(point_option.unwrap())
        } else {
            return Err(Error::DecompressPointFailed {});
        };
        Self::new(point)
    }

    /// from_verifying_key converts a BIP-340 x-only public key into an
    /// encryption key (the even-y point with the same x coordinate)
    pub fn from_verifying_key(vk: &VerifyingKey) -> Result<Self> {
        let point = bytes_to_point(vk.to_bytes().as_slice())?;
        Self::new(point)
    }

    pub fn to_bytes(&self) -> [u8; ENCRYPTION_KEY_SIZE] {
        let encoded = self.0.to_affine().to_encoded_point(true);
        let mut bytes = [0u8; ENCRYPTION_KEY_SIZE];
        bytes.copy_from_slice(encoded.as_bytes());
        bytes
    }

    /// to_x_only_bytes returns the x coordinate of the key, i.e. its BIP-340
    /// x-only public key form
    pub fn to_x_only_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.0.to_affine().x().as_slice());
        bytes
    }

    pub(crate) fn to_point(&self) -> ProjectivePoint {
        self.0
    }
}

impl DecryptionKey {
    pub fn new(t: Scalar) -> Result<Self> {
        if t.is_zero().into() {
            return Err(Error::ZeroScalar {});
        }
        // Normalize so that t*G has even y
        let image = ProjectivePoint::mul_by_generator(&t).to_affine();
        let t = if image.y_is_odd().into() { -t } else { t };
        Ok(DecryptionKey(t))
    }

    /// from_bytes parses a 32-byte big-endian scalar into a decryption key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DECRYPTION_KEY_SIZE {
            return Err(Error::MalformedDecryptionKey(
                DECRYPTION_KEY_SIZE,
                bytes.len(),
            ));
        }
        let field_bytes = *k256::FieldBytes::from_slice(bytes);
        let t = Scalar::from_repr_vartime(field_bytes).ok_or(Error::FailedToParseScalar {})?;
        Self::new(t)
    }

    /// encryption_key derives the public image `t*G` of this key
    pub fn encryption_key(&self) -> EncryptionKey {
        // t is nonzero so t*G cannot be the identity, and t is normalized
        // so the image already has even y
        EncryptionKey(ProjectivePoint::mul_by_generator(&self.0))
    }

    pub fn to_bytes(&self) -> [u8; DECRYPTION_KEY_SIZE] {
        self.0.to_bytes().into()
    }

    pub(crate) fn scalar(&self) -> Scalar {
        self.0
    }
}

/// keygen generates a fresh (encryption key, decryption key) pair
pub fn keygen(rng: &mut impl CryptoRngCore) -> (EncryptionKey, DecryptionKey) {
    loop {
        let t = Scalar::generate_vartime(rng);
        // Zero is statistically unreachable but the type invariant rejects it
        if let Ok(dk) = DecryptionKey::new(t) {
            return (dk.encryption_key(), dk);
        }
    }
}
