//! P-256 key agreement and ECDSA over raw public keys.

use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::Error;

/// Uncompressed SEC1 point length for P-256.
pub const POINT_LEN: usize = 65;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Our long term key: signs ServerKeyExchange or CertificateVerify and is
/// announced as a raw public key.
#[derive(Clone)]
pub struct Identity {
    key: SigningKey,
    spki: Vec<u8>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("spki_len", &self.spki.len())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Load a private key, either a bare 32 byte scalar or PKCS#8 DER.
    pub fn from_secret_key(secret: &[u8]) -> Result<Self, Error> {
        let key = if secret.len() == 32 {
            SigningKey::from_slice(secret).map_err(|_| Error::BadParameter("secret key"))?
        } else {
            SigningKey::from_pkcs8_der(secret).map_err(|_| Error::BadParameter("secret key"))?
        };
        Self::from_signing_key(key)
    }

    /// Fresh random identity.
    pub fn generate() -> Result<Self, Error> {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    fn from_signing_key(key: SigningKey) -> Result<Self, Error> {
        let public = PublicKey::from(key.verifying_key());
        let spki = public
            .to_public_key_der()
            .map_err(|_| Error::BadParameter("public key"))?
            .as_bytes()
            .to_vec();
        Ok(Identity { key, spki })
    }

    /// SubjectPublicKeyInfo DER, as sent in a raw public key Certificate.
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki
    }

    /// ECDSA-SHA256 over `data`, DER encoded.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let digest = sha256(data);
        let signature: Signature = self
            .key
            .sign_prehash(&digest)
            .map_err(|_| Error::BadParameter("sign"))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// Check that `spki` is a P-256 SubjectPublicKeyInfo.
pub fn parse_public_key(spki: &[u8]) -> Result<PublicKey, Error> {
    PublicKey::from_public_key_der(spki).map_err(|_| Error::Parse("public key"))
}

/// Verify a DER ECDSA-SHA256 signature by the key in `spki`.
pub fn verify(spki: &[u8], data: &[u8], signature: &[u8]) -> Result<(), Error> {
    let public = parse_public_key(spki)?;
    let verifying = VerifyingKey::from(&public);
    let signature = Signature::from_der(signature).map_err(|_| Error::Parse("signature"))?;
    verifying
        .verify_prehash(&sha256(data), &signature)
        .map_err(|_| Error::Parse("bad signature"))
}

/// One ECDHE exchange.
pub struct EphemeralKey {
    secret: EphemeralSecret,
    public: Vec<u8>,
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKey").finish_non_exhaustive()
    }
}

impl EphemeralKey {
    pub fn new() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        EphemeralKey { secret, public }
    }

    /// Our uncompressed point.
    pub fn public(&self) -> &[u8] {
        &self.public
    }

    /// Shared secret (the x coordinate) with the peer's point.
    pub fn agree(self, peer: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        if peer.len() != POINT_LEN {
            return Err(Error::Parse("ec point"));
        }
        let peer = PublicKey::from_sec1_bytes(peer).map_err(|_| Error::Parse("ec point"))?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}
