//! A StatusNotifierItem that serves its properties from a single-threaded `poll` loop.
//!
//! The [`Reactor`] owns the only blocking wait. The bus [`Connection`] asks it for watches and timeouts through
//! the [`SourceHandler`] callbacks, which the [`Registry`] implements, and the [`StatusNotifierItem`] answers
//! the messages the connection dispatches.

pub mod bus;
pub use bus::*;

mod connection;
pub use connection::*;

mod error;
pub use error::*;

pub mod item;
pub use item::StatusNotifierItem;

pub mod list;

pub mod message;
pub use message::Message;

pub mod names;

mod reactor;
pub use reactor::*;

mod registry;
pub use registry::*;

mod timer;
pub use timer::IntervalTimer;
