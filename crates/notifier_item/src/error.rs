use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus error")]
    DbusError(#[from] zbus::Error),
    #[error("Failed to (de)serialize message body")]
    VariantError(#[from] zbus::zvariant::Error),
    #[error("Invalid bus name, interface or member")]
    NameError(#[from] zbus::names::Error),
    #[error("System call failed")]
    Errno(#[from] nix::errno::Errno),
    #[error("I/O error on the bus socket")]
    Io(#[from] std::io::Error),
    #[error("Bus address {0} is not supported")]
    AddressUnsupported(String),
    #[error("Server did not accept our authentication")]
    Auth,
    #[error("Message has a different endianness than ourselves")]
    InvalidEndianness,
    #[error("Message speaks protocol version {0}, expected 1")]
    InvalidProtocol(u8),
    #[error("Message is missing the {0} header")]
    MissingHeader(&'static str),
    #[error("Header field {0} has the wrong type")]
    InvalidHeaderField(u8),
    #[error("Message is truncated")]
    Truncated,
    #[error("Message of {0} bytes exceeds the protocol limit")]
    MessageTooLong(usize),
    #[error("Connection to the bus was closed")]
    Disconnected,
    #[error("Outbound queue is full")]
    OutboundFull,
    #[error("{name}: {text}")]
    MethodError { name: String, text: String },
}

pub type Result<T> = std::result::Result<T, Error>;
