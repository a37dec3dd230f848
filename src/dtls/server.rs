//! Server side of the handshake and the stateless cookie exchange.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::crypto::ecc::{self, EphemeralKey};
use super::crypto::prf::master_secret;
use super::message::{extension, Body, Certificate, CertificateRequest, ClientHello, Cookie};
use super::message::{EcdhParams, Finished, ServerHello, ServerKeyExchange, SessionId};
use super::message::{CIPHER_SUITE, COMPRESSION_NULL, SIGNATURE_ECDSA_SHA256};
use super::peer::{fatal, Env, Peer, State};
use super::record::ProtocolVersion;
use super::AlertDescription;
use crate::bytes::equals_ct;
use crate::rng::SeededRng;
use crate::Error;

/// How long a cookie secret is used before it is replaced. Cookies made
/// with the previous secret stay valid for one more period.
const COOKIE_SECRET_LIFETIME: Duration = Duration::from_secs(300);

/// Rotating HMAC key for HelloVerifyRequest cookies.
pub(crate) struct CookieSecret {
    current: Zeroizing<[u8; 32]>,
    previous: Zeroizing<[u8; 32]>,
    rotated_at: Option<Instant>,
}

impl CookieSecret {
    pub fn new(rng: &mut SeededRng) -> Self {
        let mut current = Zeroizing::new([0u8; 32]);
        rng.fill(&mut current[..]);
        CookieSecret {
            previous: current.clone(),
            current,
            rotated_at: None,
        }
    }

    pub fn maybe_rotate(&mut self, now: Instant, rng: &mut SeededRng) {
        let Some(at) = self.rotated_at else {
            self.rotated_at = Some(now);
            return;
        };
        if now.saturating_duration_since(at) < COOKIE_SECRET_LIFETIME {
            return;
        }
        trace!("Rotate cookie secret");
        self.previous = self.current.clone();
        rng.fill(&mut self.current[..]);
        self.rotated_at = Some(now);
    }

    pub fn generate(&self, addr: SocketAddr, hello: &ClientHello) -> Cookie {
        compute_cookie(&self.current[..], addr, hello)
    }

    pub fn verify(&self, addr: SocketAddr, hello: &ClientHello) -> bool {
        if hello.cookie.is_empty() {
            return false;
        }
        [&self.current, &self.previous]
            .iter()
            .any(|secret| equals_ct(&compute_cookie(&secret[..], addr, hello), &hello.cookie))
    }
}

/// HMAC over the client address and the ClientHello fields that stay the
/// same between the first and second hello.
fn compute_cookie(secret: &[u8], addr: SocketAddr, hello: &ClientHello) -> Cookie {
    let mut cookie = Cookie::new();
    let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(secret) else {
        return cookie;
    };
    match addr.ip() {
        IpAddr::V4(ip) => mac.update(&ip.octets()),
        IpAddr::V6(ip) => mac.update(&ip.octets()),
    }
    mac.update(&addr.port().to_be_bytes());
    mac.update(&hello.client_version.as_u16().to_be_bytes());
    mac.update(&hello.random.to_bytes());
    mac.update(&hello.session_id);
    for suite in &hello.cipher_suites {
        mac.update(&suite.to_be_bytes());
    }
    mac.update(&hello.compression_methods);
    cookie.extend_from_slice(&mac.finalize().into_bytes());
    cookie
}

impl Peer {
    /// Answer a ClientHello that carried a valid cookie with the server's
    /// first flight.
    pub(crate) fn server_hello(
        &mut self,
        env: &mut Env<'_>,
        hello: ClientHello,
        raw: &[u8],
        message_seq: u16,
    ) -> Result<(), Error> {
        let Some(identity) = env.identity else {
            return Err(fatal(AlertDescription::InternalError));
        };
        if hello.client_version != ProtocolVersion::DTLS1_2 {
            return Err(fatal(AlertDescription::ProtocolVersion));
        }
        if !hello.cipher_suites.contains(&CIPHER_SUITE)
            || !hello.compression_methods.contains(&COMPRESSION_NULL)
        {
            return Err(fatal(AlertDescription::HandshakeFailure));
        }
        if !hello.offers_raw_public_key(extension::SERVER_CERTIFICATE_TYPE) {
            return Err(fatal(AlertDescription::UnsupportedCertificate));
        }
        let client_auth = env.config.require_client_certificate();
        if client_auth && !hello.offers_raw_public_key(extension::CLIENT_CERTIFICATE_TYPE) {
            return Err(fatal(AlertDescription::UnsupportedCertificate));
        }

        self.hs.client_random = hello.random;
        self.hs.transcript.extend_from_slice(raw);
        self.next_recv_seq = message_seq.wrapping_add(1);
        self.next_send_seq = message_seq;

        self.netq.begin();
        self.send_handshake(&Body::ServerHello(ServerHello::new(
            self.hs.server_random,
            SessionId::new(),
            client_auth,
        )))?;
        self.send_handshake(&Body::Certificate(Certificate {
            subject_public_key_info: identity.public_key_der().to_vec(),
        }))?;

        let ephemeral = EphemeralKey::new();
        let params = EcdhParams::new(ephemeral.public().to_vec());
        let mut signed = Vec::with_capacity(64 + 4 + params.public.len());
        signed.extend_from_slice(&self.hs.client_random.to_bytes());
        signed.extend_from_slice(&self.hs.server_random.to_bytes());
        params.serialize(&mut signed);
        let signature = identity.sign(&signed)?;
        self.hs.ephemeral = Some(ephemeral);
        self.send_handshake(&Body::ServerKeyExchange(ServerKeyExchange {
            params,
            algorithm: SIGNATURE_ECDSA_SHA256,
            signature,
        }))?;

        if client_auth {
            self.hs.client_auth = true;
            self.send_handshake(&Body::CertificateRequest(CertificateRequest::default()))?;
        }
        self.send_handshake(&Body::ServerHelloDone)?;

        self.state = if client_auth {
            State::WaitClientCertificate
        } else {
            State::WaitClientKeyExchange
        };
        Ok(())
    }

    pub(crate) fn server_handle(&mut self, env: &mut Env<'_>, body: Body, raw: &[u8]) -> Result<(), Error> {
        match (self.state, body) {
            (State::WaitClientCertificate, Body::Certificate(cert)) => {
                let spki = cert.subject_public_key_info;
                if spki.is_empty() {
                    warn!("{} declined to authenticate", self.addr);
                    return Err(fatal(AlertDescription::HandshakeFailure));
                }
                if ecc::parse_public_key(&spki).is_err() {
                    return Err(fatal(AlertDescription::BadCertificate));
                }
                env.keystore.check(self.addr, &spki).map_err(crate::Error::Alert)?;
                self.hs.peer_public_key = spki;
                self.state = State::WaitClientKeyExchange;
                Ok(())
            }

            (State::WaitClientKeyExchange, Body::ClientKeyExchange(cke)) => {
                let Some(ephemeral) = self.hs.ephemeral.take() else {
                    return Err(fatal(AlertDescription::InternalError));
                };
                let pre_master = ephemeral
                    .agree(&cke.public)
                    .map_err(|_| fatal(AlertDescription::IllegalParameter))?;
                self.hs.master_secret = Some(master_secret(
                    &pre_master,
                    &self.hs.client_random.to_bytes(),
                    &self.hs.server_random.to_bytes(),
                )?);
                self.install_keys()?;
                self.state = if self.hs.peer_public_key.is_empty() {
                    State::WaitChangeCipherSpec
                } else {
                    State::WaitCertificateVerify
                };
                Ok(())
            }

            (State::WaitCertificateVerify, Body::CertificateVerify(cv)) => {
                if cv.algorithm != SIGNATURE_ECDSA_SHA256 {
                    return Err(fatal(AlertDescription::HandshakeFailure));
                }
                if ecc::verify(&self.hs.peer_public_key, &self.hs.transcript, &cv.signature).is_err() {
                    warn!("Bad CertificateVerify from {}", self.addr);
                    return Err(fatal(AlertDescription::DecryptError));
                }
                self.hs.transcript.extend_from_slice(raw);
                self.state = State::WaitChangeCipherSpec;
                Ok(())
            }

            (State::WaitFinished, Body::Finished(finished)) => {
                let expected = self.finished_data("client finished")?;
                if !equals_ct(&expected, &finished.verify_data) {
                    warn!("Bad client Finished from {}", self.addr);
                    return Err(fatal(AlertDescription::DecryptError));
                }
                self.hs.transcript.extend_from_slice(raw);

                self.netq.begin();
                self.send_change_cipher_spec()?;
                let verify_data = self.finished_data("server finished")?;
                self.send_handshake(&Body::Finished(Finished { verify_data }))?;
                // The last flight is only resent when the client repeats
                // its Finished.
                self.netq.stop_timer();
                self.state = State::Connected;
                debug!("Connected to {}", self.addr);
                Ok(())
            }

            (state, body) => {
                warn!("Unexpected {:?} from {} in {:?}", body.msg_type(), self.addr, state);
                Err(fatal(AlertDescription::UnexpectedMessage))
            }
        }
    }
}
