//! Client side of the handshake.
//!
//! ```text
//! ClientHello        -->
//!                    <--  HelloVerifyRequest
//! ClientHello+cookie -->
//!                    <--  ServerHello, Certificate, ServerKeyExchange,
//!                         [CertificateRequest], ServerHelloDone
//! [Certificate], ClientKeyExchange, [CertificateVerify],
//! ChangeCipherSpec, Finished -->
//!                    <--  ChangeCipherSpec, Finished
//! ```
//!
//! The client Finished goes out as soon as ServerHelloDone arrives, before
//! the server has proven anything beyond its ServerKeyExchange signature.

use super::crypto::ecc::{self, EphemeralKey};
use super::crypto::prf::{master_secret, verify_data};
use super::message::{extension, Body, Certificate, CertificateVerify, ClientHello};
use super::message::{ClientKeyExchange, Cookie, Finished};
use super::message::{CERT_TYPE_RAW_PUBLIC_KEY, CIPHER_SUITE, COMPRESSION_NULL};
use super::message::{NAMED_CURVE_P256, SIGNATURE_ECDSA_SHA256};
use super::peer::{fatal, Env, Peer, State};
use super::record::ProtocolVersion;
use super::AlertDescription;
use crate::bytes::equals_ct;
use crate::Error;

impl Peer {
    /// Send the first ClientHello.
    pub(crate) fn client_start(&mut self, env: &mut Env<'_>) -> Result<(), Error> {
        self.netq.begin();
        let hello = ClientHello::new(self.hs.client_random, Cookie::new(), env.identity.is_some());
        self.send_handshake(&Body::ClientHello(hello))
    }

    pub(crate) fn client_handle(&mut self, env: &mut Env<'_>, body: Body, raw: &[u8]) -> Result<(), Error> {
        match (self.state, body) {
            (State::ClientHello, Body::HelloVerifyRequest(hvr)) => {
                debug!("Cookie exchange with {}", self.addr);
                // Neither hello so far counts towards the Finished hash.
                self.hs.transcript.clear();
                self.reset_epoch0_replay();
                self.netq.begin();
                let hello = ClientHello::new(self.hs.client_random, hvr.cookie, env.identity.is_some());
                self.send_handshake(&Body::ClientHello(hello))
            }

            (State::ClientHello, Body::ServerHello(hello)) => {
                if hello.server_version != ProtocolVersion::DTLS1_2 {
                    return Err(fatal(AlertDescription::ProtocolVersion));
                }
                if hello.cipher_suite != CIPHER_SUITE || hello.compression_method != COMPRESSION_NULL {
                    return Err(fatal(AlertDescription::HandshakeFailure));
                }
                let server_type = hello.certificate_type(extension::SERVER_CERTIFICATE_TYPE);
                if server_type != Some(CERT_TYPE_RAW_PUBLIC_KEY) {
                    return Err(fatal(AlertDescription::UnsupportedCertificate));
                }
                self.hs.server_random = hello.random;
                self.state = State::WaitServerCertificate;
                Ok(())
            }

            (State::WaitServerCertificate, Body::Certificate(cert)) => {
                let spki = cert.subject_public_key_info;
                if ecc::parse_public_key(&spki).is_err() {
                    return Err(fatal(AlertDescription::BadCertificate));
                }
                env.keystore.check(self.addr, &spki).map_err(Error::Alert)?;
                self.hs.peer_public_key = spki;
                self.state = State::WaitServerKeyExchange;
                Ok(())
            }

            (State::WaitServerKeyExchange, Body::ServerKeyExchange(ske)) => {
                if ske.params.named_curve != NAMED_CURVE_P256 || ske.algorithm != SIGNATURE_ECDSA_SHA256 {
                    return Err(fatal(AlertDescription::HandshakeFailure));
                }
                let mut signed = Vec::with_capacity(64 + 4 + ske.params.public.len());
                signed.extend_from_slice(&self.hs.client_random.to_bytes());
                signed.extend_from_slice(&self.hs.server_random.to_bytes());
                ske.params.serialize(&mut signed);
                if ecc::verify(&self.hs.peer_public_key, &signed, &ske.signature).is_err() {
                    warn!("Bad ServerKeyExchange signature from {}", self.addr);
                    return Err(fatal(AlertDescription::DecryptError));
                }
                self.hs.peer_point = ske.params.public;
                self.state = State::WaitServerHelloDone;
                Ok(())
            }

            (State::WaitServerHelloDone, Body::CertificateRequest(req)) => {
                if self.hs.client_auth {
                    return Err(fatal(AlertDescription::UnexpectedMessage));
                }
                if !req.signature_algorithms.contains(&SIGNATURE_ECDSA_SHA256) {
                    return Err(fatal(AlertDescription::HandshakeFailure));
                }
                self.hs.client_auth = true;
                Ok(())
            }

            (State::WaitServerHelloDone, Body::ServerHelloDone) => self.client_key_exchange(env),

            (State::WaitFinished, Body::Finished(finished)) => {
                let expected = self.finished_data("server finished")?;
                if !equals_ct(&expected, &finished.verify_data) {
                    warn!("Bad server Finished from {}", self.addr);
                    return Err(fatal(AlertDescription::DecryptError));
                }
                self.hs.transcript.extend_from_slice(raw);
                self.netq.clear();
                self.state = State::Connected;
                debug!("Connected to {}", self.addr);
                Ok(())
            }

            (_, Body::HelloRequest) => {
                debug!("Ignore HelloRequest from {}", self.addr);
                Ok(())
            }

            (state, body) => {
                warn!("Unexpected {:?} from {} in {:?}", body.msg_type(), self.addr, state);
                Err(fatal(AlertDescription::UnexpectedMessage))
            }
        }
    }

    /// Our whole second flight, sent in answer to ServerHelloDone.
    fn client_key_exchange(&mut self, env: &mut Env<'_>) -> Result<(), Error> {
        self.netq.begin();

        if self.hs.client_auth {
            // Without a key of our own the Certificate is empty and the
            // server decides whether that is acceptable.
            let spki = env
                .identity
                .map(|id| id.public_key_der().to_vec())
                .unwrap_or_default();
            self.send_handshake(&Body::Certificate(Certificate {
                subject_public_key_info: spki,
            }))?;
        }

        let ephemeral = EphemeralKey::new();
        let public = ephemeral.public().to_vec();
        let pre_master = ephemeral
            .agree(&self.hs.peer_point)
            .map_err(|_| fatal(AlertDescription::IllegalParameter))?;
        self.send_handshake(&Body::ClientKeyExchange(ClientKeyExchange { public }))?;

        self.hs.master_secret = Some(master_secret(
            &pre_master,
            &self.hs.client_random.to_bytes(),
            &self.hs.server_random.to_bytes(),
        )?);

        if self.hs.client_auth {
            if let Some(identity) = env.identity {
                let signature = identity.sign(&self.hs.transcript)?;
                self.send_handshake(&Body::CertificateVerify(CertificateVerify {
                    algorithm: SIGNATURE_ECDSA_SHA256,
                    signature,
                }))?;
            }
        }

        self.install_keys()?;
        self.send_change_cipher_spec()?;

        let verify_data = self.finished_data("client finished")?;
        self.send_handshake(&Body::Finished(Finished { verify_data }))?;
        self.state = State::WaitChangeCipherSpec;
        Ok(())
    }

    /// verify_data over the transcript so far.
    pub(crate) fn finished_data(&self, label: &str) -> Result<[u8; 12], Error> {
        let Some(master) = &self.hs.master_secret else {
            return Err(fatal(AlertDescription::InternalError));
        };
        let hash = ecc::sha256(&self.hs.transcript);
        verify_data(&master[..], label, &hash)
    }
}
