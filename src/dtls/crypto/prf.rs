use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::dtls::message::VERIFY_DATA_LEN;
use crate::Error;

pub const MASTER_SECRET_LEN: usize = 48;

/// AES-128 keys and 4 byte implicit IVs, no MAC keys for an AEAD suite.
pub const KEY_BLOCK_LEN: usize = 2 * 16 + 2 * 4;

type HmacSha256 = Hmac<Sha256>;

fn hmac(secret: &[u8]) -> Result<HmacSha256, Error> {
    <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| Error::BadParameter("hmac key"))
}

/// TLS 1.2 PRF with SHA-256, RFC 5246 section 5.
///
/// `PRF(secret, label, seed) = P_SHA256(secret, label + seed)`
pub fn prf(secret: &[u8], label: &str, seed: &[u8], out: &mut [u8]) -> Result<(), Error> {
    let mut full_seed = Vec::with_capacity(label.len() + seed.len());
    full_seed.extend_from_slice(label.as_bytes());
    full_seed.extend_from_slice(seed);

    // A(1) = HMAC(secret, A(0)), A(0) = seed
    let mut mac = hmac(secret)?;
    mac.update(&full_seed);
    let mut a = mac.finalize().into_bytes();

    let mut filled = 0;
    while filled < out.len() {
        let mut mac = hmac(secret)?;
        mac.update(&a);
        mac.update(&full_seed);
        let chunk = mac.finalize().into_bytes();

        let n = (out.len() - filled).min(chunk.len());
        out[filled..filled + n].copy_from_slice(&chunk[..n]);
        filled += n;

        let mut mac = hmac(secret)?;
        mac.update(&a);
        a = mac.finalize().into_bytes();
    }
    Ok(())
}

pub fn master_secret(
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<Zeroizing<[u8; MASTER_SECRET_LEN]>, Error> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(client_random);
    seed[32..].copy_from_slice(server_random);

    let mut out = Zeroizing::new([0u8; MASTER_SECRET_LEN]);
    prf(pre_master_secret, "master secret", &seed, &mut out[..])?;
    Ok(out)
}

/// Traffic keys derived from the master secret.
pub struct KeyBlock {
    pub client_write_key: Zeroizing<[u8; 16]>,
    pub server_write_key: Zeroizing<[u8; 16]>,
    pub client_write_iv: [u8; 4],
    pub server_write_iv: [u8; 4],
}

impl std::fmt::Debug for KeyBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBlock").finish_non_exhaustive()
    }
}

/// Key expansion, RFC 5246 section 6.3. Note the seed is
/// `server_random ‖ client_random` here.
pub fn key_block(
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<KeyBlock, Error> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);

    let mut block = Zeroizing::new([0u8; KEY_BLOCK_LEN]);
    prf(master_secret, "key expansion", &seed, &mut block[..])?;

    let mut kb = KeyBlock {
        client_write_key: Zeroizing::new([0u8; 16]),
        server_write_key: Zeroizing::new([0u8; 16]),
        client_write_iv: [0u8; 4],
        server_write_iv: [0u8; 4],
    };
    kb.client_write_key.copy_from_slice(&block[0..16]);
    kb.server_write_key.copy_from_slice(&block[16..32]);
    kb.client_write_iv.copy_from_slice(&block[32..36]);
    kb.server_write_iv.copy_from_slice(&block[36..40]);
    Ok(kb)
}

/// Finished verify_data over the transcript hash. `label` is
/// "client finished" or "server finished".
pub fn verify_data(
    master_secret: &[u8],
    label: &str,
    handshake_hash: &[u8; 32],
) -> Result<[u8; VERIFY_DATA_LEN], Error> {
    let mut out = [0u8; VERIFY_DATA_LEN];
    prf(master_secret, label, handshake_hash, &mut out)?;
    Ok(out)
}
