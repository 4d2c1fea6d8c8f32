//! A non-blocking D-Bus client connection that leaves all waiting to an external event loop.
//!
//! The connection asks for one watch that reads the socket, one that writes it while there is queued output,
//! and one timeout per method call that is waiting for its reply. The event loop reports readiness back through
//! the [`Bus`] trait.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    io::{ErrorKind, Read, Write},
    os::unix::{
        io::{AsFd, AsRawFd},
        net::UnixStream,
    },
    str::FromStr,
    time::{Duration, Instant},
};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use zbus::MessageType;

use crate::{
    bus::{Bus, DispatchStatus, HandlerResult, MessageHandler, SourceHandler, Timeout, TimeoutId, Watch, WatchFlags, WatchId},
    message::Message,
    names, Error, Result,
};

mod auth;

/// How long a method call may wait for its reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);

/// Upper bound on serialized messages waiting to be written.
pub const MAX_OUTBOUND_BYTES: usize = 64 * 1024 * 1024;

const READ_WATCH: WatchId = WatchId(1);
const WRITE_WATCH: WatchId = WatchId(2);

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Debug)]
struct PendingCall {
    member: String,
    timeout: Option<Timeout>,
}

#[derive(Debug)]
pub struct Connection {
    stream: UnixStream,
    unique_name: String,
    next_serial: u32,
    next_timeout: u32,
    inbound: Vec<u8>,
    dispatch_queue: VecDeque<Message>,
    outbound: VecDeque<Vec<u8>>,
    /// Bytes of the front of `outbound` that were already written.
    outbound_offset: usize,
    outbound_len: usize,
    attached: bool,
    write_watch_enabled: bool,
    pending: HashMap<u32, PendingCall>,
    timeout_calls: HashMap<TimeoutId, u32>,
    object_paths: BTreeSet<String>,
}

impl Connection {
    /// Connect to the session bus, or to `address` if given.
    pub fn session(address: Option<&str>) -> Result<Self> {
        let address = match address {
            Some(address) => zbus::Address::from_str(address)?,
            None => zbus::Address::session()?,
        };
        log::debug!("connecting to {}", address);
        let mut stream = match &address {
            zbus::Address::Unix(path) => connect_unix(path)?,
            other => return Err(Error::AddressUnsupported(other.to_string())),
        };
        let guid = auth::authenticate(&mut stream, nix::unistd::Uid::effective().as_raw())?;
        log::debug!("authenticated, server guid {}", guid);
        Self::new(stream)
    }

    /// Take over an authenticated stream and say `Hello` to the bus.
    pub fn new(stream: UnixStream) -> Result<Self> {
        let mut connection = Self::with_unique_name(stream, String::new())?;
        let hello = Message::method_call(names::DBUS_BUS, names::DBUS_OBJECT, names::DBUS_INTERFACE, "Hello")?;
        let reply = connection.call_blocking(hello, DEFAULT_CALL_TIMEOUT)?;
        let (unique_name,): (String,) = reply.body()?;
        log::info!("connected to the bus as {}", unique_name);
        connection.unique_name = unique_name;
        Ok(connection)
    }

    pub(crate) fn with_unique_name(stream: UnixStream, unique_name: String) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            unique_name,
            next_serial: 1,
            next_timeout: 1,
            inbound: Vec::new(),
            dispatch_queue: VecDeque::new(),
            outbound: VecDeque::new(),
            outbound_offset: 0,
            outbound_len: 0,
            attached: false,
            write_watch_enabled: false,
            pending: HashMap::new(),
            timeout_calls: HashMap::new(),
            object_paths: BTreeSet::new(),
        })
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Route method calls and signals for `path` to the message handler.
    pub fn register_object_path(&mut self, path: &str) -> Result<()> {
        zbus::zvariant::ObjectPath::try_from(path)?;
        self.object_paths.insert(path.to_string());
        Ok(())
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn read_watch(&self) -> Watch {
        Watch { id: READ_WATCH, fd: self.stream.as_raw_fd(), flags: WatchFlags::READABLE, enabled: true }
    }

    fn write_watch(&self) -> Watch {
        Watch { id: WRITE_WATCH, fd: self.stream.as_raw_fd(), flags: WatchFlags::WRITABLE, enabled: self.write_watch_enabled }
    }

    /// Enable the write watch exactly while there is output queued.
    fn sync_write_watch(&mut self, sources: &mut dyn SourceHandler) {
        let wanted = !self.outbound.is_empty();
        if self.attached && wanted != self.write_watch_enabled {
            self.write_watch_enabled = wanted;
            sources.toggle_watch(&self.write_watch());
        }
    }

    fn next_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.checked_add(1).unwrap_or(1);
        serial
    }

    /// Assign a serial and queue the serialized message, without touching any event source.
    fn enqueue(&mut self, mut msg: Message) -> Result<u32> {
        let serial = self.next_serial();
        msg.set_serial(serial);
        let bytes = msg.to_bytes()?;
        if self.outbound_len + bytes.len() > MAX_OUTBOUND_BYTES {
            return Err(Error::OutboundFull);
        }
        log::trace!("queueing {}", msg);
        self.outbound_len += bytes.len();
        self.outbound.push_back(bytes);
        Ok(serial)
    }

    /// Read everything the socket has to offer and queue the complete messages for dispatch.
    fn read_available(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => self.inbound.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => return Err(Error::Disconnected),
                Err(e) => return Err(e.into()),
            }
        }

        while let Some(len) = Message::frame_len(&self.inbound)? {
            if self.inbound.len() < len {
                break;
            }
            let decoded = Message::from_bytes(&self.inbound[..len]);
            self.inbound.drain(..len);
            match decoded {
                Ok(msg) => {
                    log::trace!("received {}", msg);
                    self.dispatch_queue.push_back(msg);
                }
                Err(e) => log::warn!("Dropping undecodable message of {} bytes: {}", len, e),
            }
        }
        Ok(())
    }

    /// Write as much queued output as the socket accepts right now.
    fn write_available(&mut self) -> Result<()> {
        while let Some(front) = self.outbound.front() {
            match self.stream.write(&front[self.outbound_offset..]) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => {
                    self.outbound_offset += n;
                    self.outbound_len -= n;
                    if self.outbound_offset == front.len() {
                        self.outbound.pop_front();
                        self.outbound_offset = 0;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::BrokenPipe => return Err(Error::Disconnected),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Block until the socket reports one of `events`, or `timeout` passed. Returns whether it did.
    fn wait_for(&self, events: PollFlags, timeout: Option<Duration>) -> Result<bool> {
        let timeout = match timeout {
            Some(timeout) => PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX),
            None => PollTimeout::NONE,
        };
        let mut fds = [PollFd::new(self.stream.as_fd(), events)];
        loop {
            match poll(&mut fds, timeout) {
                Ok(ready) => return Ok(ready > 0),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn flush_blocking(&mut self) -> Result<()> {
        loop {
            self.write_available()?;
            if self.outbound.is_empty() {
                return Ok(());
            }
            self.wait_for(PollFlags::POLLOUT, None)?;
        }
    }

    /// Send a method call and wait for its reply, queueing everything else that arrives meanwhile.
    fn call_blocking(&mut self, msg: Message, timeout: Duration) -> Result<Message> {
        let member = msg.member().map(|member| member.to_string()).unwrap_or_default();
        let serial = self.enqueue(msg)?;
        self.flush_blocking()?;

        let deadline = Instant::now() + timeout;
        loop {
            let position = self.dispatch_queue.iter().position(|msg| {
                msg.reply_serial() == Some(serial) && matches!(msg.message_type(), MessageType::MethodReturn | MessageType::Error)
            });
            if let Some(reply) = position.and_then(|position| self.dispatch_queue.remove(position)) {
                return match reply.message_type() {
                    MessageType::Error => Err(reply.to_error()),
                    _ => Ok(reply),
                };
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_for(PollFlags::POLLIN, Some(remaining))? {
                return Err(Error::MethodError {
                    name: names::ERROR_NO_REPLY.to_string(),
                    text: format!("Did not receive a reply to {}", member),
                });
            }
            self.read_available()?;
        }
    }

    fn start_pending_call(&mut self, serial: u32, member: String, sources: &mut dyn SourceHandler) {
        let timeout = Timeout { id: TimeoutId(self.next_timeout), interval: DEFAULT_CALL_TIMEOUT, enabled: true };
        self.next_timeout = self.next_timeout.wrapping_add(1);
        let timeout = if sources.add_timeout(&timeout) {
            self.timeout_calls.insert(timeout.id, serial);
            Some(timeout)
        } else {
            log::warn!("no timeout for call to {}, it will wait for its reply indefinitely", member);
            None
        };
        self.pending.insert(serial, PendingCall { member, timeout });
    }

    fn finish_pending_call(&mut self, call: PendingCall, reply: &Message, sources: &mut dyn SourceHandler) {
        if let Some(timeout) = call.timeout {
            self.timeout_calls.remove(&timeout.id);
            sources.remove_timeout(&Timeout { enabled: false, ..timeout });
        }
        match reply.message_type() {
            MessageType::Error => log::warn!("call to {} failed: {}", call.member, reply.to_error()),
            _ => log::debug!("call to {} succeeded", call.member),
        }
    }

    fn reply_unknown_method(&mut self, call: &Message, sources: &mut dyn SourceHandler) -> Result<()> {
        if !call.expects_reply() {
            return Ok(());
        }
        let text = format!(
            "No such method '{}' in interface '{}' at object path '{}'",
            call.member().map(|m| m.as_str()).unwrap_or_default(),
            call.interface().map(|i| i.as_str()).unwrap_or_default(),
            call.path().map(|p| p.as_str()).unwrap_or_default(),
        );
        let error = Message::error(call, names::ERROR_UNKNOWN_METHOD, &text)?;
        self.send(error, sources)?;
        Ok(())
    }

    /// Answer the methods every object implicitly supports.
    fn reply_peer(&mut self, call: &Message, member: &str, sources: &mut dyn SourceHandler) -> Result<()> {
        let reply = match member {
            "Ping" => Message::method_return(call),
            "GetMachineId" => match MACHINE_ID_PATHS.iter().find_map(|path| std::fs::read_to_string(path).ok()) {
                Some(id) => Message::method_return(call).with_body(&(id.trim(),))?,
                None => Message::error(call, names::ERROR_FAILED, "Could not determine the machine id")?,
            },
            _ => return self.reply_unknown_method(call, sources),
        };
        self.send(reply, sources)?;
        Ok(())
    }

    /// Names of the direct children of `path` among the registered object paths.
    fn child_nodes(&self, path: &str) -> BTreeSet<&str> {
        let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
        self.object_paths
            .iter()
            .filter_map(|registered| registered.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .collect()
    }

    fn dispatch_call(&mut self, call: Message, sources: &mut dyn SourceHandler, handler: &mut dyn MessageHandler) -> Result<()> {
        let path = call.path().map(|path| path.to_string()).unwrap_or_default();
        let interface = call.interface().map(|interface| interface.to_string()).unwrap_or_default();
        let member = call.member().map(|member| member.to_string()).unwrap_or_default();

        if interface == names::PEER_INTERFACE {
            return self.reply_peer(&call, &member, sources);
        }

        if self.object_paths.contains(&path) {
            return match handler.handle_message(&call)? {
                HandlerResult::Handled(Some(reply)) => {
                    if call.expects_reply() {
                        self.send(reply, sources)?;
                    }
                    Ok(())
                }
                HandlerResult::Handled(None) => Ok(()),
                HandlerResult::NotYetHandled => self.reply_unknown_method(&call, sources),
            };
        }

        let children = self.child_nodes(&path);
        if interface == names::INTROSPECTABLE_INTERFACE && member == "Introspect" && !children.is_empty() {
            let mut xml = format!("{}<node>\n", names::INTROSPECTION_DOCTYPE);
            for child in children {
                xml.push_str(&format!("  <node name=\"{}\"/>\n", child));
            }
            xml.push_str("</node>\n");
            let reply = Message::method_return(&call).with_body(&(xml,))?;
            self.send(reply, sources)?;
            return Ok(());
        }

        self.reply_unknown_method(&call, sources)
    }
}

fn connect_unix(path: &std::ffi::OsStr) -> Result<UnixStream> {
    use std::os::unix::ffi::OsStrExt;
    let bytes = path.as_bytes();
    match bytes.strip_prefix(b"\0") {
        Some(name) => {
            use std::os::linux::net::SocketAddrExt;
            let address = std::os::unix::net::SocketAddr::from_abstract_name(name)?;
            Ok(UnixStream::connect_addr(&address)?)
        }
        None => Ok(UnixStream::connect(path)?),
    }
}

impl Bus for Connection {
    fn attach(&mut self, sources: &mut dyn SourceHandler) -> Result<()> {
        self.attached = true;
        if !sources.add_watch(&self.read_watch()) {
            log::error!("the event loop did not accept the read watch of the bus socket");
        }
        self.write_watch_enabled = !self.outbound.is_empty();
        if !sources.add_watch(&self.write_watch()) {
            log::error!("the event loop did not accept the write watch of the bus socket");
        }
        Ok(())
    }

    fn handle_watch(&mut self, _watch: WatchId, flags: WatchFlags, sources: &mut dyn SourceHandler) -> Result<()> {
        if flags.intersects(WatchFlags::READABLE | WatchFlags::HANGUP) {
            self.read_available()?;
        }
        if flags.contains(WatchFlags::ERROR) {
            if let Ok(Some(e)) = self.stream.take_error() {
                log::error!("bus socket error: {}", e);
            }
            return Err(Error::Disconnected);
        }
        if flags.contains(WatchFlags::WRITABLE) {
            self.write_available()?;
        }
        self.sync_write_watch(sources);
        Ok(())
    }

    fn handle_timeout(&mut self, timeout: TimeoutId, sources: &mut dyn SourceHandler) -> Result<()> {
        let Some(serial) = self.timeout_calls.remove(&timeout) else {
            return Ok(());
        };
        if let Some(call) = self.pending.get_mut(&serial) {
            if let Some(timeout) = call.timeout.take() {
                sources.remove_timeout(&Timeout { enabled: false, ..timeout });
            }
            let text = format!("Did not receive a reply to {}", call.member);
            self.dispatch_queue.push_back(Message::local_error(serial, names::ERROR_NO_REPLY, &text)?);
        }
        Ok(())
    }

    fn dispatch_status(&self) -> DispatchStatus {
        if self.dispatch_queue.is_empty() {
            DispatchStatus::Complete
        } else {
            DispatchStatus::DataRemains
        }
    }

    fn dispatch(&mut self, sources: &mut dyn SourceHandler, handler: &mut dyn MessageHandler) -> Result<DispatchStatus> {
        let Some(msg) = self.dispatch_queue.pop_front() else {
            return Ok(DispatchStatus::Complete);
        };

        match msg.message_type() {
            MessageType::MethodReturn | MessageType::Error => {
                match msg.reply_serial().and_then(|serial| self.pending.remove(&serial)) {
                    Some(call) => self.finish_pending_call(call, &msg, sources),
                    None => log::trace!("ignoring unexpected {}", msg),
                }
            }
            MessageType::MethodCall => self.dispatch_call(msg, sources, handler)?,
            MessageType::Signal => {
                let registered = msg.path().map_or(false, |path| self.object_paths.contains(path.as_str()));
                if registered {
                    handler.handle_message(&msg)?;
                } else {
                    log::trace!("ignoring {}", msg);
                }
            }
            MessageType::Invalid => log::debug!("dropping message of unknown type"),
        }
        Ok(self.dispatch_status())
    }

    fn send(&mut self, msg: Message, sources: &mut dyn SourceHandler) -> Result<u32> {
        let member = msg.expects_reply().then(|| msg.member().map(|member| member.to_string()).unwrap_or_default());
        let serial = self.enqueue(msg)?;
        if let Some(member) = member {
            self.start_pending_call(serial, member, sources);
        }
        self.sync_write_watch(sources);
        Ok(serial)
    }

    fn has_messages_to_send(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn flush(&mut self, sources: &mut dyn SourceHandler) -> Result<()> {
        self.flush_blocking()?;
        self.sync_write_watch(sources);
        Ok(())
    }
}
