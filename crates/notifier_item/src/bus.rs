//! The seam between the bus connection and the event loop.
//!
//! The connection decides when it wants to watch a socket or run a timer and announces that through a
//! [`SourceHandler`]. The event loop owns the only blocking `poll` and reports readiness back through [`Bus`].

use std::{os::unix::io::RawFd, time::Duration};

use crate::{message::Message, Result};

/// Identity of a watch, minted by the bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u32);

/// Identity of a timeout, minted by the bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(pub u32);

bitflags::bitflags! {
    /// Readiness conditions in the vocabulary of the bus connection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WatchFlags: u8 {
        const READABLE = 0b0001;
        const WRITABLE = 0b0010;
        const ERROR    = 0b0100;
        const HANGUP   = 0b1000;
    }
}

/// A descriptor the bus connection wants watched.
///
/// `fd` stays owned by the connection, whoever receives a `Watch` must never close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watch {
    pub id: WatchId,
    pub fd: RawFd,
    /// Conditions of interest. Only [`WatchFlags::READABLE`] and [`WatchFlags::WRITABLE`] are meaningful here.
    pub flags: WatchFlags,
    pub enabled: bool,
}

/// A periodic timer the bus connection wants run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub id: TimeoutId,
    pub interval: Duration,
    pub enabled: bool,
}

/// Callbacks through which a bus connection registers its event sources.
///
/// These may be invoked from inside any [`Bus`] method that receives the handler, never concurrently.
pub trait SourceHandler {
    /// Returns `false` if the watch could not be set up.
    fn add_watch(&mut self, watch: &Watch) -> bool;
    fn remove_watch(&mut self, watch: &Watch);
    fn toggle_watch(&mut self, watch: &Watch);

    /// Returns `false` if the timeout could not be set up.
    fn add_timeout(&mut self, timeout: &Timeout) -> bool;
    fn remove_timeout(&mut self, timeout: &Timeout);
    fn toggle_timeout(&mut self, timeout: &Timeout);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// More messages are queued for dispatch.
    DataRemains,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    /// The message was consumed, optionally producing a reply that should be sent.
    Handled(Option<Message>),
    NotYetHandled,
}

/// Receives the messages the bus connection dispatches to registered object paths.
pub trait MessageHandler {
    fn handle_message(&mut self, msg: &Message) -> Result<HandlerResult>;
}

/// A bus connection, driven by an external event loop.
pub trait Bus {
    /// Announce the initial event sources to `sources`. Called once, before anything else.
    fn attach(&mut self, sources: &mut dyn SourceHandler) -> Result<()>;

    /// `flags` is the readiness observed on the watch's descriptor.
    fn handle_watch(&mut self, watch: WatchId, flags: WatchFlags, sources: &mut dyn SourceHandler) -> Result<()>;

    /// Called once per expiration of the timeout's interval.
    fn handle_timeout(&mut self, timeout: TimeoutId, sources: &mut dyn SourceHandler) -> Result<()>;

    fn dispatch_status(&self) -> DispatchStatus;

    /// Dispatch at most one queued message.
    fn dispatch(&mut self, sources: &mut dyn SourceHandler, handler: &mut dyn MessageHandler) -> Result<DispatchStatus>;

    /// Queue `msg` for sending and return the serial it was assigned.
    fn send(&mut self, msg: Message, sources: &mut dyn SourceHandler) -> Result<u32>;

    fn has_messages_to_send(&self) -> bool;

    /// Write out everything that is queued, blocking if the socket is not writable.
    fn flush(&mut self, sources: &mut dyn SourceHandler) -> Result<()>;
}
