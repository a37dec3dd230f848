//! The device facade: one socket, one DTLS endpoint and one LWM2M client
//! glued into a single [`Device::step`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::Buf;
use crate::config::DeviceConfig;
use crate::data::Value;
use crate::dtls::{is_record, DtlsContext, Event, Identity, Output};
use crate::lwm2m::{ClientState, Lwm2mContext, ServerSecurity, Transport};
use crate::object::{ObjectRegistry, DEVICE_OBJECT_ID, SECURITY_OBJECT_ID, SERVER_OBJECT_ID};
use crate::objects::{DeviceObject, Resource, ResourceObject, SecurityInstance, SecurityMode};
use crate::objects::{SecurityObject, ServerInstance, ServerObject};
use crate::uri::Uri;
use crate::Error;

pub const COAP_PORT: u16 = 5683;
pub const COAPS_PORT: u16 = 5684;

/// Largest datagram we read.
const MAX_DATAGRAM: usize = 2048;

/// Wait returned by `step` when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// CoAP messages held per session while its handshake runs.
const MAX_PENDING: usize = 8;

/// Non-blocking datagram socket.
pub trait Socket {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// `WouldBlock` when nothing is waiting.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl Socket for UdpSocket {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, data, addr)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }
}

/// Split `coap[s]://host[:port]` into security, host and port.
pub fn parse_server_uri(uri: &str) -> Result<(bool, &str, u16), Error> {
    let (secure, rest) = if let Some(rest) = uri.strip_prefix("coaps://") {
        (true, rest)
    } else if let Some(rest) = uri.strip_prefix("coap://") {
        (false, rest)
    } else {
        return Err(Error::InvalidUri);
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let default_port = if secure { COAPS_PORT } else { COAP_PORT };

    let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
        let Some((host, after)) = v6.split_once(']') else {
            return Err(Error::InvalidUri);
        };
        match after.strip_prefix(':') {
            Some(p) => (host, p.parse().map_err(|_| Error::InvalidUri)?),
            None if after.is_empty() => (host, default_port),
            None => return Err(Error::InvalidUri),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, p)) => (host, p.parse().map_err(|_| Error::InvalidUri)?),
            None => (authority, default_port),
        }
    };
    if host.is_empty() {
        return Err(Error::InvalidUri);
    }
    Ok((secure, host, port))
}

fn resolve(uri: &str) -> Result<(bool, SocketAddr), Error> {
    let (secure, host, port) = parse_server_uri(uri)?;
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::InvalidUri)?
        .next()
        .ok_or(Error::InvalidUri)?;
    Ok((secure, addr))
}

/// Sessions over plain UDP or DTLS, as the LWM2M client sees them.
struct Link<S> {
    socket: S,
    dtls: DtlsContext,
    identity: Identity,
    /// Sessions that run over DTLS.
    secure: BTreeSet<SocketAddr>,
    /// Messages waiting for a handshake to finish.
    pending: BTreeMap<SocketAddr, VecDeque<Vec<u8>>>,
    /// Decrypted datagrams for the LWM2M client.
    inbox: VecDeque<(SocketAddr, Buf)>,
    /// DTLS sessions the peer ended.
    closed: Vec<SocketAddr>,
    now: Instant,
}

impl<S: Socket> Link<S> {
    fn send_datagram(&mut self, peer: SocketAddr, data: &[u8]) {
        match self.socket.send_to(data, peer) {
            Ok(_) => trace!("Sent {} bytes to {}", data.len(), peer),
            Err(e) => warn!("Send to {} failed: {}", peer, e),
        }
    }

    /// Drain DTLS outputs: datagrams go out, data and closures are kept for
    /// the LWM2M client.
    fn pump(&mut self, now: Instant) {
        while let Some(output) = self.dtls.poll_output() {
            match output {
                Output::Packet { peer, data } => self.send_datagram(peer, &data),
                Output::ApplicationData { peer, data } => self.inbox.push_back((peer, data)),
                Output::Event {
                    peer,
                    event: Event::Connected,
                } => {
                    info!("DTLS session to {} up", peer);
                    for message in self.pending.remove(&peer).unwrap_or_default() {
                        if let Err(e) = self.dtls.write(now, peer, &message) {
                            warn!("Queued message to {} lost: {}", peer, e);
                        }
                    }
                }
                Output::Event {
                    peer,
                    event: Event::Closed(alert),
                } => {
                    match alert {
                        Some(alert) => info!("DTLS session to {} closed: {}", peer, alert),
                        None => info!("DTLS session to {} closed", peer),
                    }
                    self.pending.remove(&peer);
                    if self.secure.remove(&peer) {
                        self.closed.push(peer);
                    }
                }
            }
        }
    }
}

impl<S: Socket> Transport for Link<S> {
    fn connect(&mut self, now: Instant, security: &ServerSecurity) -> Result<SocketAddr, Error> {
        self.now = now;
        let (secure, addr) = resolve(&security.uri)?;
        if !secure {
            if security.mode != SecurityMode::NoSec {
                warn!("{} is not coaps, security mode ignored", security.uri);
            }
            return Ok(addr);
        }
        if security.mode == SecurityMode::PreSharedKey {
            return Err(Error::NotSupported);
        }
        if self.dtls.has_peer(addr) {
            self.secure.insert(addr);
            return Ok(addr);
        }

        let identity = if security.secret_key.is_empty() {
            self.identity.clone()
        } else {
            Identity::from_secret_key(&security.secret_key)?
        };
        self.dtls.set_identity(Some(identity));
        let pinned = (!security.server_public_key.is_empty()).then(|| &security.server_public_key[..]);
        self.dtls.connect(now, addr, pinned)?;
        self.secure.insert(addr);
        self.pump(now);
        Ok(addr)
    }

    fn send(&mut self, now: Instant, session: SocketAddr, data: &[u8]) -> Result<(), Error> {
        self.now = now;
        if !self.secure.contains(&session) {
            self.socket.send_to(data, session)?;
            return Ok(());
        }
        if self.dtls.is_connected(session) {
            self.dtls.write(now, session, data)?;
            self.pump(now);
            return Ok(());
        }
        if !self.dtls.has_peer(session) {
            return Err(Error::Socket(io::ErrorKind::NotConnected));
        }
        let queue = self.pending.entry(session).or_default();
        if queue.len() >= MAX_PENDING {
            return Err(Error::NoMemory);
        }
        queue.push_back(data.to_vec());
        Ok(())
    }

    fn disconnect(&mut self, session: SocketAddr) {
        self.pending.remove(&session);
        if self.secure.remove(&session) {
            let now = self.now;
            let _ = self.dtls.close(now, session);
            self.pump(now);
        }
    }
}

/// An LWM2M device: owns its socket and its client state.
///
/// ```no_run
/// use std::time::Instant;
/// use nbiot::{Device, DeviceConfig};
///
/// let config = DeviceConfig::builder("dev1", "coap://127.0.0.1:5683").build()?;
/// let mut device = Device::bind(config)?;
/// device.connect();
/// loop {
///     let wait = device.step(Instant::now())?;
///     std::thread::sleep(wait.min(std::time::Duration::from_millis(100)));
/// }
/// # Ok::<(), nbiot::Error>(())
/// ```
pub struct Device<S: Socket = UdpSocket> {
    config: DeviceConfig,
    lwm2m: Lwm2mContext,
    link: Link<S>,
    buf: Vec<u8>,
}

impl Device<UdpSocket> {
    /// Bind a non-blocking UDP socket on the configured local port.
    pub fn bind(config: DeviceConfig) -> Result<Self, Error> {
        let socket = UdpSocket::bind(("0.0.0.0", config.local_port()))?;
        socket.set_nonblocking(true)?;
        Device::new(config, socket)
    }
}

impl<S: Socket> Device<S> {
    /// Build the device around a non-blocking `socket`.
    pub fn new(config: DeviceConfig, socket: S) -> Result<Self, Error> {
        let identity = match config.secret_key() {
            Some(key) => Identity::from_secret_key(key)?,
            None => Identity::generate()?,
        };
        let (secure, _, _) = parse_server_uri(config.server_uri())?;

        let mut security = SecurityInstance::new(0, config.server_uri(), config.short_server_id());
        security.bootstrap = config.bootstrap();
        security.hold_off = config.hold_off();
        if secure {
            security.mode = SecurityMode::RawPublicKey;
            security.public_key = identity.public_key_der().to_vec();
            security.secret_key = config.secret_key().map(|k| k.to_vec()).unwrap_or_default();
            security.server_public_key = config
                .server_public_key()
                .map(|k| k.to_vec())
                .unwrap_or_default();
        }
        let mut security_object = SecurityObject::new();
        security_object.add_instance(security);

        let mut server_object = ServerObject::new();
        if !config.bootstrap() {
            let mut server = ServerInstance::new(0, config.short_server_id(), config.lifetime());
            server.binding = config.binding().to_string();
            server_object.add_instance(server);
        }

        let mut registry = ObjectRegistry::new();
        registry.add(Box::new(security_object))?;
        registry.add(Box::new(server_object))?;
        registry.add(Box::new(DeviceObject::new(
            env!("CARGO_PKG_NAME"),
            config.endpoint_name(),
        )))?;

        let lwm2m = Lwm2mContext::new(config.endpoint_name(), registry, config.rng_seed());
        let dtls = DtlsContext::client(Arc::new(config.dtls().clone()), Some(identity.clone()));
        let link = Link {
            socket,
            dtls,
            identity,
            secure: BTreeSet::new(),
            pending: BTreeMap::new(),
            inbox: VecDeque::new(),
            closed: Vec::new(),
            now: Instant::now(),
        };

        Ok(Device {
            config,
            lwm2m,
            link,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.lwm2m.state()
    }

    /// `Ok` once registered with at least one server.
    pub fn registration_status(&self) -> Result<(), Error> {
        self.lwm2m.registration_status()
    }

    /// Our raw public key (SPKI DER), for provisioning on the server.
    pub fn public_key(&self) -> &[u8] {
        self.link.identity.public_key_der()
    }

    pub fn lwm2m(&self) -> &Lwm2mContext {
        &self.lwm2m
    }

    pub fn lwm2m_mut(&mut self) -> &mut Lwm2mContext {
        &mut self.lwm2m
    }

    /// Expose a user resource. Resources of the Security, Server and Device
    /// objects are reserved.
    pub fn add_resource(&mut self, resource: Resource) -> Result<(), Error> {
        let object = resource.object;
        if matches!(object, SECURITY_OBJECT_ID | SERVER_OBJECT_ID | DEVICE_OBJECT_ID) {
            return Err(Error::BadParameter("reserved object"));
        }
        let registry = self.lwm2m.registry_mut();
        if !registry.contains(object) {
            registry.add(Box::new(ResourceObject::new(object)))?;
        }
        let Some(target) = registry.downcast_mut::<ResourceObject>(object) else {
            return Err(Error::AlreadyRegistered);
        };
        debug!("Add resource {}", resource.uri());
        target.insert(resource)?;
        if self.lwm2m.state() == ClientState::Ready {
            self.lwm2m.update_registration(true);
        }
        Ok(())
    }

    /// Change a user resource's value locally and notify observers if it
    /// changed.
    pub fn set_value(&mut self, uri: Uri, value: Value) -> Result<(), Error> {
        let (Some(instance), Some(resource)) = (uri.instance_id(), uri.resource_id()) else {
            return Err(Error::InvalidUri);
        };
        let Some(object) = self
            .lwm2m
            .registry_mut()
            .downcast_mut::<ResourceObject>(uri.object_id())
        else {
            return Err(Error::NotFound);
        };
        match object.set_value(instance, resource, value) {
            None => Err(Error::NotFound),
            Some(true) => {
                self.notify(uri);
                Ok(())
            }
            Some(false) => Ok(()),
        }
    }

    /// Tell the observation engine that `uri` changed.
    pub fn notify(&mut self, uri: Uri) {
        self.lwm2m.resource_value_changed(&uri);
    }

    /// Start (or restart) bootstrap and registration. The work happens in
    /// [`step`](Self::step).
    pub fn connect(&mut self) {
        self.lwm2m.restart();
    }

    /// Ask for a registration update on the next step.
    pub fn update_registration(&mut self, with_objects: bool) {
        self.lwm2m.update_registration(with_objects);
    }

    /// Receive everything waiting on the socket, advance the client once and
    /// return how long the caller may wait before the next step.
    pub fn step(&mut self, now: Instant) -> Result<Duration, Error> {
        loop {
            match self.link.socket.recv_from(&mut self.buf) {
                Ok((n, from)) => {
                    let data = self.buf[..n].to_vec();
                    self.receive(now, from, &data);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        self.link.dtls.check_retransmit(now);
        self.link.pump(now);
        self.deliver(now);

        let mut timeout = IDLE_WAIT;
        let result = self.lwm2m.step(now, &mut self.link, &mut timeout);
        self.link.pump(now);
        self.deliver(now);

        if let Some(deadline) = self.link.dtls.check_retransmit(now) {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }
        result.map(|_| timeout)
    }

    fn receive(&mut self, now: Instant, from: SocketAddr, data: &[u8]) {
        trace!("Received {} bytes from {}", data.len(), from);
        if self.link.secure.contains(&from) {
            // A secure server only ever talks DTLS.
            if is_record(data) == 0 {
                debug!("Drop {} plaintext bytes from secure server {}", data.len(), from);
                return;
            }
            if let Err(e) = self.link.dtls.handle_message(now, from, data) {
                warn!("DTLS error from {}: {}", from, e);
            }
            self.link.pump(now);
        } else {
            self.lwm2m.handle_packet(now, &mut self.link, from, data);
        }
    }

    fn deliver(&mut self, now: Instant) {
        for session in std::mem::take(&mut self.link.closed) {
            self.lwm2m.session_closed(session);
        }
        while let Some((peer, data)) = self.link.inbox.pop_front() {
            self.lwm2m.handle_packet(now, &mut self.link, peer, &data);
            self.link.pump(now);
        }
    }

    /// Deregister, close every session and reset the client.
    pub fn close(&mut self, now: Instant) {
        self.lwm2m.close(now, &mut self.link);
        self.link.pump(now);
    }

    /// Give back the socket.
    pub fn into_socket(self) -> S {
        self.link.socket
    }
}

impl<S> fmt::Debug for Device<S>
where
    S: Socket,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("endpoint", &self.config.endpoint_name())
            .field("state", &self.lwm2m.state())
            .field("dtls", &self.link.dtls)
            .finish()
    }
}
