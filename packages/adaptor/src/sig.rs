use crate::error::Error;
use crate::keys::{DecryptionKey, EncryptionKey};
use crate::Result;

use k256::elliptic_curve::group::prime::PrimeCurveAffine;
use k256::schnorr::{Signature as SchnorrSignature, SigningKey, VerifyingKey};
use k256::{
    elliptic_curve::{
        ops::{MulByGenerator, Reduce},
        point::{AffineCoordinates, DecompressPoint},
        PrimeField,
    },
    AffinePoint, ProjectivePoint, Scalar, U256,
};
use sha2::{Digest, Sha256};

/// MODNSCALAR_SIZE is the size of a scalar on the secp256k1 curve
const MODNSCALAR_SIZE: usize = 32;

/// JACOBIAN_POINT_SIZE is the size of a point on the secp256k1 curve in
/// compressed form
const JACOBIAN_POINT_SIZE: usize = 33;

/// ADAPTOR_SIGNATURE_SIZE is the size of a Schnorr adaptor signature
/// It is in the form of (R, s, needsNegation) where `R` is a point,
/// `s` is a scalar, and `needsNegation` is a boolean value
const ADAPTOR_SIGNATURE_SIZE: usize = JACOBIAN_POINT_SIZE + MODNSCALAR_SIZE + 1;

const CHALLENGE_TAG: &[u8] = b"BIP0340/challenge";

/// Domain tag for the deterministic adaptor-signing nonce, distinct from the
/// plain BIP-340 nonce tag
const NONCE_TAG: &[u8] = b"BIP0340/adaptor-nonce";

/// Cap on deterministic nonce iterations before signing gives up
const MAX_NONCE_ITERATIONS: u32 = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdaptorSignature {
    r: ProjectivePoint,
    s_hat: Scalar,
    needs_negation: bool,
}

// Adapted from https://github.com/RustCrypto/elliptic-curves/blob/520f67d26be1773bd600d05796cc26d797dd7182/k256/src/schnorr.rs#L181-L187
fn tagged_hash(tag: &[u8]) -> Sha256 {
    let tag_hash = Sha256::digest(tag);
    let mut digest = Sha256::new();
    // The hash is in sha256d, so we need to hash twice
    digest.update(tag_hash);
    digest.update(tag_hash);
    digest
}

pub fn bytes_to_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let r_option = AffinePoint::decompress(
        k256::FieldBytes::from_slice(bytes),
        k256::elliptic_curve::subtle::Choice::from(false as u8),
    );
    let r = if r_option.is_some().into() {
        r_option.unwrap()
    } else {
        return Err(Error::DecompressPointFailed {});
    };
    // Convert AffinePoint to ProjectivePoint
    Ok(ProjectivePoint::from(r))
}

fn challenge(r: &ProjectivePoint, pub_key: &VerifyingKey, msg: &[u8; 32]) -> Scalar {
    // e = tagged_hash("BIP0340/challenge", bytes(R) || bytes(P) || m) mod n
    let r_bytes = r.to_affine().x();
    let p_bytes = pub_key.to_bytes();
    <Scalar as Reduce<U256>>::reduce_bytes(
        &tagged_hash(CHALLENGE_TAG)
            .chain_update(r_bytes)
            .chain_update(p_bytes.as_slice())
            .chain_update(msg)
            .finalize(),
    )
}

impl AdaptorSignature {
    /// enc_sign creates an adaptor signature over `msg` that decrypts to a
    /// valid BIP-340 signature under the decryption key behind `enc_key`.
    ///
    /// The nonce is derived deterministically from the secret key, the
    /// message and an iteration counter; signing retries with the next
    /// iteration until the result self-verifies, up to a fixed cap.
    pub fn enc_sign(sk: &SigningKey, enc_key: &EncryptionKey, msg: &[u8; 32]) -> Result<Self> {
        // Normalize d so that d*G has even y, per BIP-340
        let mut d = *sk.as_nonzero_scalar().as_ref();
        if bool::from(d.is_zero()) {
            return Err(Error::ZeroScalar {});
        }
        let p = ProjectivePoint::mul_by_generator(&d).to_affine();
        if p.y_is_odd().into() {
            d = -d;
        }
        let pub_key = sk.verifying_key();
        let t = enc_key.to_point();

        for iteration in 0..MAX_NONCE_ITERATIONS {
            let k = <Scalar as Reduce<U256>>::reduce_bytes(
                &tagged_hash(NONCE_TAG)
                    .chain_update(d.to_bytes())
                    .chain_update(msg)
                    .chain_update(iteration.to_be_bytes())
                    .finalize(),
            );
            if bool::from(k.is_zero()) {
                continue;
            }

            // R = k*G + T; negate the nonce and record it when R.y is odd,
            // so the stored point always has even y
            let r = ProjectivePoint::mul_by_generator(&k) + t;
            let r_affine = r.to_affine();
            if r_affine.is_identity().into() {
                continue;
            }
            let (k, r, needs_negation) = if r_affine.y_is_odd().into() {
                (-k, -r, true)
            } else {
                (k, r, false)
            };

            let e = challenge(&r, pub_key, msg);
            let s_hat = k + e * d;

            let sig = AdaptorSignature {
                r,
                s_hat,
                needs_negation,
            };
            if sig.enc_verify(pub_key, enc_key, *msg).is_ok() {
                return Ok(sig);
            }
        }
        Err(Error::NonceRetriesExhausted {})
    }

    pub fn enc_verify(
        &self,
        pub_key: &VerifyingKey,
        enc_key: &EncryptionKey,
        msg: [u8; 32],
    ) -> Result<()> {
        let t = enc_key.to_point();

        // Calculate R' = R - T (or R + T if negation is needed)
        let r_hat = if self.needs_negation {
            self.r + t
        } else {
            self.r - t
        };
        // Convert R' to affine coordinates
        let r_hat = r_hat.to_affine();

        let pk = pub_key.to_bytes();
        let p = bytes_to_point(pk.as_slice())?;
        let e = challenge(&self.r, pub_key, &msg);

        // Calculate expected R' = s'*G - e*P
        let s_hat_g = ProjectivePoint::mul_by_generator(&self.s_hat);
        let e_p = p * e;
        let expected_r_hat = s_hat_g - e_p;

        // Convert expected R' to affine coordinates
        let expected_r_hat = expected_r_hat.to_affine();

        // Ensure expected R' is not the point at infinity
        if expected_r_hat.is_identity().into() {
            return Err(Error::PointAtInfinity("expected R'".to_string()));
        }

        // Ensure R.y is even
        if self.r.to_affine().y_is_odd().into() {
            return Err(Error::PointWithOddY("R".to_string()));
        }

        // Ensure R' == expected R'
        if !r_hat.eq(&expected_r_hat) {
            return Err(Error::VerifyAdaptorSigFailed {});
        }

        Ok(())
    }

    /// decrypt completes the adaptor signature into a BIP-340 signature
    /// using the decryption key
    pub fn decrypt(&self, dec_key: &DecryptionKey) -> Result<SchnorrSignature> {
        let t = dec_key.scalar();
        let s = if self.needs_negation {
            self.s_hat - t
        } else {
            self.s_hat + t
        };

        let mut sig_bytes = [0u8; 64];
        sig_bytes[..32].copy_from_slice(self.r.to_affine().x().as_slice());
        sig_bytes[32..].copy_from_slice(&s.to_bytes());
        SchnorrSignature::try_from(sig_bytes.as_slice())
            .map_err(|e| Error::InvalidSchnorrSignature(e.to_string()))
    }

    /// recover extracts the decryption key from this adaptor signature and
    /// its decrypted BIP-340 counterpart
    pub fn recover(&self, sig: &SchnorrSignature) -> Result<DecryptionKey> {
        let sig_bytes = sig.to_bytes();
        let s_field_bytes = *k256::FieldBytes::from_slice(&sig_bytes[32..]);
        let s = Scalar::from_repr_vartime(s_field_bytes).ok_or(Error::FailedToParseScalar {})?;

        let t = if self.needs_negation {
            self.s_hat - s
        } else {
            s - self.s_hat
        };
        DecryptionKey::new(t)
    }

    pub fn new(asig_bytes: &[u8]) -> Result<Self> {
        if asig_bytes.len() != ADAPTOR_SIGNATURE_SIZE {
            return Err(Error::MalformedAdaptorSignature(
                ADAPTOR_SIGNATURE_SIZE,
                asig_bytes.len(),
            ));
        }
        // get R
        if asig_bytes[0] != 0x02 && asig_bytes[0] != 0x03 {
            return Err(Error::InvalidPointFirstByte(asig_bytes[0]));
        }
        let is_y_odd = asig_bytes[0] == 0x03;
        let r_option = AffinePoint::decompress(
            k256::FieldBytes::from_slice(&asig_bytes[1..JACOBIAN_POINT_SIZE]),
            k256::elliptic_curve::subtle::Choice::from(is_y_odd as u8),
        );
        let r = if r_option.is_some().into() {
            r_option.unwrap().into()
        } else {
            return Err(Error::DecompressPointFailed {});
        };

        // get s_hat
        let s_hat_bytes = &asig_bytes[JACOBIAN_POINT_SIZE..JACOBIAN_POINT_SIZE + MODNSCALAR_SIZE];
        let s_hat_field_bytes = *k256::FieldBytes::from_slice(s_hat_bytes);
        let s_hat =
            Scalar::from_repr_vartime(s_hat_field_bytes).ok_or(Error::FailedToParseScalar {})?;

        let needs_negation = asig_bytes[JACOBIAN_POINT_SIZE + MODNSCALAR_SIZE] == 0x01;
        Ok(AdaptorSignature {
            r,
            s_hat,
            needs_negation,
        })
    }

    pub fn to_bytes(&self) -> [u8; ADAPTOR_SIGNATURE_SIZE] {
        use k256::elliptic_curve::sec1::ToEncodedPoint;

        let mut bytes = [0u8; ADAPTOR_SIGNATURE_SIZE];
        let r_encoded = self.r.to_affine().to_encoded_point(true);
        bytes[..JACOBIAN_POINT_SIZE].copy_from_slice(r_encoded.as_bytes());
        bytes[JACOBIAN_POINT_SIZE..JACOBIAN_POINT_SIZE + MODNSCALAR_SIZE]
            .copy_from_slice(&self.s_hat.to_bytes());
        bytes[ADAPTOR_SIGNATURE_SIZE - 1] = self.needs_negation as u8;
        bytes
    }
}
