//! D-Bus messages as they travel over the socket.
//!
//! A message is a header of signature `(yyyyuua(yv))`, padding up to the next multiple of 8, and the body.
//! Everything we send is written in our native byte order; messages in the other byte order are rejected,
//! the bus daemon always talks to us in the order we use.

use std::fmt;

use byteorder::{ByteOrder, NativeEndian};
use serde::Serialize;
use zbus::{
    names::{BusName, ErrorName, InterfaceName, MemberName, UniqueName},
    zvariant::{self, DynamicDeserialize, DynamicType, EncodingContext, ObjectPath, Signature, Value},
    MessageFlags, MessageType,
};

use crate::{Error, Result};

macro_rules! dbus_context {
    () => {
        EncodingContext::<NativeEndian>::new_dbus(0)
    };
}

#[cfg(target_endian = "little")]
const NATIVE_ENDIAN_SIG: u8 = b'l';
#[cfg(target_endian = "big")]
const NATIVE_ENDIAN_SIG: u8 = b'B';

const PROTOCOL_VERSION: u8 = 1;

/// Length of the part of the header that has a fixed layout, including the length of the header field array.
pub const FIXED_HEADER_LEN: usize = 16;

/// Maximum message size allowed by the protocol.
pub const MAX_MESSAGE_LEN: usize = 1 << 27;

/// Header field codes. Receivers must ignore codes they do not know.
const FIELD_PATH: u8 = 1;
const FIELD_INTERFACE: u8 = 2;
const FIELD_MEMBER: u8 = 3;
const FIELD_ERROR_NAME: u8 = 4;
const FIELD_REPLY_SERIAL: u8 = 5;
const FIELD_DESTINATION: u8 = 6;
const FIELD_SENDER: u8 = 7;
const FIELD_SIGNATURE: u8 = 8;
const FIELD_UNIX_FDS: u8 = 9;

type HeaderFields<'m> = Vec<(u8, Value<'m>)>;
type RawHeader<'m> = (u8, u8, u8, u8, u32, u32, HeaderFields<'m>);

fn pad_to_8(len: usize) -> usize {
    (len + 7) & !7
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    msg_type: MessageType,
    flags: u8,
    serial: u32,
    path: Option<ObjectPath<'static>>,
    interface: Option<InterfaceName<'static>>,
    member: Option<MemberName<'static>>,
    error_name: Option<ErrorName<'static>>,
    reply_serial: Option<u32>,
    destination: Option<BusName<'static>>,
    sender: Option<UniqueName<'static>>,
    signature: Signature<'static>,
    body: Vec<u8>,
}

impl Message {
    fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            flags: 0,
            serial: 0,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: Signature::from_static_str_unchecked(""),
            body: Vec::new(),
        }
    }

    pub fn method_call(destination: &str, path: &str, interface: &str, member: &str) -> Result<Self> {
        let mut msg = Self::new(MessageType::MethodCall);
        msg.destination = Some(BusName::try_from(destination)?.into_owned());
        msg.path = Some(ObjectPath::try_from(path)?.into_owned());
        msg.interface = Some(InterfaceName::try_from(interface)?.into_owned());
        msg.member = Some(MemberName::try_from(member)?.into_owned());
        Ok(msg)
    }

    pub fn signal(path: &str, interface: &str, member: &str) -> Result<Self> {
        let mut msg = Self::new(MessageType::Signal);
        msg.path = Some(ObjectPath::try_from(path)?.into_owned());
        msg.interface = Some(InterfaceName::try_from(interface)?.into_owned());
        msg.member = Some(MemberName::try_from(member)?.into_owned());
        Ok(msg)
    }

    /// An empty method return for `call`, addressed back to its sender.
    pub fn method_return(call: &Message) -> Self {
        let mut msg = Self::new(MessageType::MethodReturn);
        msg.flags = MessageFlags::NoReplyExpected as u8;
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone().map(BusName::Unique);
        msg
    }

    pub fn error(call: &Message, name: &str, text: &str) -> Result<Self> {
        let mut msg = Self::new(MessageType::Error);
        msg.flags = MessageFlags::NoReplyExpected as u8;
        msg.error_name = Some(ErrorName::try_from(name)?.into_owned());
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone().map(BusName::Unique);
        msg.with_body(&(text,))
    }

    /// An error standing in for a reply that never arrived.
    pub(crate) fn local_error(reply_serial: u32, name: &str, text: &str) -> Result<Self> {
        let mut msg = Self::new(MessageType::Error);
        msg.error_name = Some(ErrorName::try_from(name)?.into_owned());
        msg.reply_serial = Some(reply_serial);
        msg.with_body(&(text,))
    }

    /// The name and text of an error message, as an [`Error`].
    pub fn to_error(&self) -> Error {
        let name = self.error_name.as_ref().map(|name| name.to_string()).unwrap_or_default();
        let text = self.body::<(String,)>().map(|(text,)| text).unwrap_or_default();
        Error::MethodError { name, text }
    }

    /// Replace the body. `body` is a tuple of the message arguments.
    pub fn with_body<B: Serialize + DynamicType>(mut self, body: &B) -> Result<Self> {
        let signature = body.dynamic_signature();
        let signature = signature.as_str();
        let signature = match signature.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            Some(inner) => inner,
            None => signature,
        };
        self.signature = Signature::try_from(signature)?.into_owned();
        self.body = zvariant::to_bytes(dbus_context!(), body)?;
        Ok(self)
    }

    pub fn with_sender(mut self, sender: &str) -> Result<Self> {
        self.sender = Some(UniqueName::try_from(sender)?.into_owned());
        Ok(self)
    }

    pub fn with_no_reply_expected(mut self) -> Self {
        self.flags |= MessageFlags::NoReplyExpected as u8;
        self
    }

    /// Deserialize the body against the signature recorded in the header.
    pub fn body<'m, B: DynamicDeserialize<'m>>(&'m self) -> Result<B> {
        Ok(zvariant::from_slice_for_dynamic_signature(&self.body, dbus_context!(), &self.signature)?)
    }

    pub fn message_type(&self) -> MessageType {
        self.msg_type
    }

    /// Serial number, `0` until the message was sent.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub(crate) fn set_serial(&mut self, serial: u32) {
        self.serial = serial;
    }

    pub fn path(&self) -> Option<&ObjectPath<'static>> {
        self.path.as_ref()
    }

    pub fn interface(&self) -> Option<&InterfaceName<'static>> {
        self.interface.as_ref()
    }

    pub fn member(&self) -> Option<&MemberName<'static>> {
        self.member.as_ref()
    }

    pub fn error_name(&self) -> Option<&ErrorName<'static>> {
        self.error_name.as_ref()
    }

    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }

    pub fn destination(&self) -> Option<&BusName<'static>> {
        self.destination.as_ref()
    }

    pub fn sender(&self) -> Option<&UniqueName<'static>> {
        self.sender.as_ref()
    }

    pub fn signature(&self) -> &Signature<'static> {
        &self.signature
    }

    pub fn expects_reply(&self) -> bool {
        self.msg_type == MessageType::MethodCall && self.flags & MessageFlags::NoReplyExpected as u8 == 0
    }

    /// Total length of the first message in `buf`, once enough of it has arrived to tell.
    pub fn frame_len(buf: &[u8]) -> Result<Option<usize>> {
        if buf.len() < FIXED_HEADER_LEN {
            return Ok(None);
        }
        if buf[0] != NATIVE_ENDIAN_SIG {
            return Err(Error::InvalidEndianness);
        }
        let body_len = NativeEndian::read_u32(&buf[4..8]) as usize;
        let fields_len = NativeEndian::read_u32(&buf[12..16]) as usize;
        let len = pad_to_8(FIXED_HEADER_LEN + fields_len) + body_len;
        if len > MAX_MESSAGE_LEN {
            return Err(Error::MessageTooLong(len));
        }
        Ok(Some(len))
    }

    /// Parse one complete message from the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let len = Self::frame_len(buf)?.ok_or(Error::Truncated)?;
        if buf.len() < len {
            return Err(Error::Truncated);
        }
        let (_, msg_type, flags, version, body_len, serial, fields): RawHeader<'_> =
            zvariant::from_slice(buf, dbus_context!())?;
        if version != PROTOCOL_VERSION {
            return Err(Error::InvalidProtocol(version));
        }

        let mut msg = Self::new(MessageType::from(msg_type));
        msg.flags = flags;
        msg.serial = serial;
        for (code, value) in fields {
            msg.set_field(code, value)?;
        }

        msg.check_required_fields()?;

        let body_start = len - body_len as usize;
        msg.body = buf[body_start..len].to_vec();
        Ok(msg)
    }

    fn set_field(&mut self, code: u8, value: Value<'_>) -> Result<()> {
        match (code, value) {
            (FIELD_PATH, Value::ObjectPath(path)) => self.path = Some(path.into_owned()),
            (FIELD_INTERFACE, Value::Str(s)) => self.interface = Some(InterfaceName::try_from(s.as_str())?.into_owned()),
            (FIELD_MEMBER, Value::Str(s)) => self.member = Some(MemberName::try_from(s.as_str())?.into_owned()),
            (FIELD_ERROR_NAME, Value::Str(s)) => self.error_name = Some(ErrorName::try_from(s.as_str())?.into_owned()),
            (FIELD_REPLY_SERIAL, Value::U32(serial)) => self.reply_serial = Some(serial),
            (FIELD_DESTINATION, Value::Str(s)) => self.destination = Some(BusName::try_from(s.as_str())?.into_owned()),
            (FIELD_SENDER, Value::Str(s)) => self.sender = Some(UniqueName::try_from(s.as_str())?.into_owned()),
            (FIELD_SIGNATURE, Value::Signature(signature)) => self.signature = signature.into_owned(),
            (FIELD_UNIX_FDS, Value::U32(_)) => {}
            (FIELD_PATH..=FIELD_UNIX_FDS, _) => return Err(Error::InvalidHeaderField(code)),
            (code, _) => log::trace!("ignoring unknown header field {}", code),
        }
        Ok(())
    }

    /// Every message type carries a fixed set of header fields.
    fn check_required_fields(&self) -> Result<()> {
        let missing = match self.msg_type {
            MessageType::MethodCall if self.path.is_none() => Some("PATH"),
            MessageType::MethodCall if self.member.is_none() => Some("MEMBER"),
            MessageType::Signal if self.path.is_none() => Some("PATH"),
            MessageType::Signal if self.interface.is_none() => Some("INTERFACE"),
            MessageType::Signal if self.member.is_none() => Some("MEMBER"),
            MessageType::Error if self.error_name.is_none() => Some("ERROR_NAME"),
            MessageType::Error | MessageType::MethodReturn if self.reply_serial.is_none() => Some("REPLY_SERIAL"),
            _ => None,
        };
        match missing {
            Some(field) => Err(Error::MissingHeader(field)),
            None => Ok(()),
        }
    }

    /// The header fields this message is sent with, in the order they are written.
    pub(crate) fn header_fields(&self) -> HeaderFields<'_> {
        let mut fields = Vec::new();
        if let Some(path) = &self.path {
            fields.push((FIELD_PATH, Value::from(path.clone())));
        }
        if let Some(interface) = &self.interface {
            fields.push((FIELD_INTERFACE, Value::from(interface.as_str())));
        }
        if let Some(member) = &self.member {
            fields.push((FIELD_MEMBER, Value::from(member.as_str())));
        }
        if let Some(name) = &self.error_name {
            fields.push((FIELD_ERROR_NAME, Value::from(name.as_str())));
        }
        if let Some(serial) = self.reply_serial {
            fields.push((FIELD_REPLY_SERIAL, Value::from(serial)));
        }
        if let Some(destination) = &self.destination {
            fields.push((FIELD_DESTINATION, Value::from(destination.as_str())));
        }
        if let Some(sender) = &self.sender {
            fields.push((FIELD_SENDER, Value::from(sender.as_str())));
        }
        if !self.signature.as_str().is_empty() {
            fields.push((FIELD_SIGNATURE, Value::from(self.signature.clone())));
        }
        fields
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.encode(self.header_fields())
    }

    /// Serialize with an explicit set of header fields.
    pub(crate) fn encode(&self, fields: HeaderFields<'_>) -> Result<Vec<u8>> {
        let header: RawHeader<'_> = (
            NATIVE_ENDIAN_SIG,
            self.msg_type as u8,
            self.flags,
            PROTOCOL_VERSION,
            self.body.len() as u32,
            self.serial,
            fields,
        );
        let mut bytes = zvariant::to_bytes(dbus_context!(), &header)?;
        bytes.resize(pad_to_8(bytes.len()), 0);
        bytes.extend_from_slice(&self.body);
        if bytes.len() > MAX_MESSAGE_LEN {
            return Err(Error::MessageTooLong(bytes.len()));
        }
        Ok(bytes)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.msg_type {
            MessageType::MethodCall => "method call",
            MessageType::MethodReturn => "method return",
            MessageType::Error => "error",
            MessageType::Signal => "signal",
            MessageType::Invalid => "invalid message",
        };
        write!(f, "{} serial={}", kind, self.serial)?;
        if let Some(sender) = &self.sender {
            write!(f, " sender={}", sender)?;
        }
        if let Some(path) = &self.path {
            write!(f, " path={}", path)?;
        }
        match (&self.interface, &self.member) {
            (Some(interface), Some(member)) => write!(f, " {}.{}", interface, member)?,
            (None, Some(member)) => write!(f, " {}", member)?,
            _ => {}
        }
        if let Some(name) = &self.error_name {
            write!(f, " {}", name)?;
        }
        if let Some(serial) = self.reply_serial {
            write!(f, " reply_serial={}", serial)?;
        }
        Ok(())
    }
}
