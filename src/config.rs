use std::time::Duration;

use crate::objects::valid_binding;
use crate::Error;

/// DTLS configuration
#[derive(Debug, Clone)]
pub struct Config {
    mtu: usize,
    max_queue_rx: usize,
    max_peers: usize,
    require_client_certificate: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build_unchecked()
    }
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            max_queue_rx: 30,
            max_peers: 8,
            require_client_certificate: false,
            flight_start_rto: Duration::from_secs(2),
            flight_retries: 7,
            rng_seed: None,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest size UDP packets we will produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Max amount of decrypted application records to buffer before
    /// rejecting more input.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max number of simultaneous peers. A server drops new ClientHellos
    /// beyond this.
    #[inline(always)]
    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// For a server, require a client certificate.
    ///
    /// This will cause the server to send a CertificateRequest message.
    /// Makes the server fail if the client does not send a certificate.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// Time of first retransmission.
    ///
    /// Every flight restarts with this value. Doubled for every retry.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Max number of retransmissions per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Seed for the non-cryptographic randomness (cookie secret rotation
    /// aside). `None` uses the thread rng.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for DTLS configuration.
pub struct ConfigBuilder {
    mtu: usize,
    max_queue_rx: usize,
    max_peers: usize,
    require_client_certificate: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the max amount of incoming records to buffer.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the max number of peers.
    ///
    /// Defaults to 8.
    pub fn max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Set whether to require a client certificate (for servers).
    ///
    /// Defaults to false.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.require_client_certificate = require;
        self
    }

    /// Set the time of first retransmission.
    ///
    /// Defaults to 2 seconds.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the max number of retransmissions per flight.
    ///
    /// Defaults to 7.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Seed the random generator used for retransmission jitter, message
    /// ids and tokens. Key material is never seeded.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    fn build_unchecked(self) -> Config {
        Config {
            mtu: self.mtu,
            max_queue_rx: self.max_queue_rx,
            max_peers: self.max_peers,
            require_client_certificate: self.require_client_certificate,
            flight_start_rto: self.flight_start_rto,
            flight_retries: self.flight_retries,
            rng_seed: self.rng_seed,
        }
    }

    /// Build the configuration.
    ///
    /// Returns `Error::BadParameter` for an MTU too small to carry a
    /// handshake message or zero-sized queues.
    pub fn build(self) -> Result<Config, Error> {
        if self.mtu < 256 {
            return Err(Error::BadParameter("mtu below 256"));
        }
        if self.max_queue_rx == 0 || self.max_peers == 0 {
            return Err(Error::BadParameter("queue size zero"));
        }
        if self.flight_start_rto.is_zero() {
            return Err(Error::BadParameter("flight rto zero"));
        }
        Ok(self.build_unchecked())
    }
}

/// LWM2M client configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    endpoint_name: String,
    server_uri: String,
    bootstrap: bool,
    short_server_id: u16,
    lifetime: u32,
    binding: String,
    local_port: u16,
    secret_key: Option<Vec<u8>>,
    server_public_key: Option<Vec<u8>>,
    hold_off: u32,
    dtls: Config,
    rng_seed: Option<u64>,
}

impl DeviceConfig {
    pub fn builder(endpoint_name: impl Into<String>, server_uri: impl Into<String>) -> DeviceConfigBuilder {
        DeviceConfigBuilder {
            endpoint_name: endpoint_name.into(),
            server_uri: server_uri.into(),
            bootstrap: false,
            short_server_id: 123,
            lifetime: 300,
            binding: "U".to_string(),
            local_port: 0,
            secret_key: None,
            server_public_key: None,
            hold_off: 0,
            dtls: None,
            rng_seed: None,
        }
    }

    /// Endpoint client name sent as `ep=` when registering.
    #[inline(always)]
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    /// `coap://host:port` or `coaps://host:port` of the first server.
    #[inline(always)]
    pub fn server_uri(&self) -> &str {
        &self.server_uri
    }

    /// Whether `server_uri` is a bootstrap server.
    #[inline(always)]
    pub fn bootstrap(&self) -> bool {
        self.bootstrap
    }

    #[inline(always)]
    pub fn short_server_id(&self) -> u16 {
        self.short_server_id
    }

    /// Registration lifetime in seconds.
    #[inline(always)]
    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    #[inline(always)]
    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// Local UDP port. 0 picks an ephemeral one.
    #[inline(always)]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Client private key (PKCS#8 DER or raw P-256 scalar) for `coaps`.
    /// `None` generates one at startup.
    #[inline(always)]
    pub fn secret_key(&self) -> Option<&[u8]> {
        self.secret_key.as_deref()
    }

    /// Pinned server public key (SPKI DER). `None` trusts the first key seen.
    #[inline(always)]
    pub fn server_public_key(&self) -> Option<&[u8]> {
        self.server_public_key.as_deref()
    }

    /// Client hold-off before bootstrapping, in seconds.
    #[inline(always)]
    pub fn hold_off(&self) -> u32 {
        self.hold_off
    }

    #[inline(always)]
    pub fn dtls(&self) -> &Config {
        &self.dtls
    }

    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for [`DeviceConfig`].
pub struct DeviceConfigBuilder {
    endpoint_name: String,
    server_uri: String,
    bootstrap: bool,
    short_server_id: u16,
    lifetime: u32,
    binding: String,
    local_port: u16,
    secret_key: Option<Vec<u8>>,
    server_public_key: Option<Vec<u8>>,
    hold_off: u32,
    dtls: Option<Config>,
    rng_seed: Option<u64>,
}

impl DeviceConfigBuilder {
    /// Treat the server URI as a bootstrap server.
    ///
    /// Defaults to false.
    pub fn bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Defaults to 123.
    pub fn short_server_id(mut self, id: u16) -> Self {
        self.short_server_id = id;
        self
    }

    /// Defaults to 300 seconds.
    pub fn lifetime(mut self, lifetime: u32) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Defaults to `U`.
    pub fn binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = binding.into();
        self
    }

    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn secret_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    pub fn server_public_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.server_public_key = Some(key.into());
        self
    }

    pub fn hold_off(mut self, secs: u32) -> Self {
        self.hold_off = secs;
        self
    }

    pub fn dtls(mut self, config: Config) -> Self {
        self.dtls = Some(config);
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<DeviceConfig, Error> {
        if self.endpoint_name.is_empty() {
            return Err(Error::BadParameter("empty endpoint name"));
        }
        if !(self.server_uri.starts_with("coap://") || self.server_uri.starts_with("coaps://")) {
            return Err(Error::InvalidUri);
        }
        if self.lifetime == 0 {
            return Err(Error::BadParameter("lifetime zero"));
        }
        if !valid_binding(&self.binding) {
            return Err(Error::BadParameter("binding"));
        }
        if self.short_server_id == 0 || self.short_server_id == u16::MAX {
            return Err(Error::BadParameter("short server id"));
        }

        Ok(DeviceConfig {
            endpoint_name: self.endpoint_name,
            server_uri: self.server_uri,
            bootstrap: self.bootstrap,
            short_server_id: self.short_server_id,
            lifetime: self.lifetime,
            binding: self.binding,
            local_port: self.local_port,
            secret_key: self.secret_key,
            server_public_key: self.server_public_key,
            hold_off: self.hold_off,
            dtls: self.dtls.unwrap_or_default(),
            rng_seed: self.rng_seed,
        })
    }
}
