//! The event loop: one `poll` over the icon timer and every source the bus connection registered.

use std::{
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
};

use crate::{
    bus::{Bus, DispatchStatus, TimeoutId, WatchId},
    item::StatusNotifierItem,
    message::Message,
    registry::{poll_to_readiness, Registry},
    timer::IntervalTimer,
    Error, Result,
};

/// Period of the timer that makes hosts refetch the icon.
pub const ICON_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 120);

/// What a position in the poll set stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    IconTimer,
    Watch(WatchId),
    Timeout(TimeoutId),
}

pub struct Reactor<B: Bus> {
    bus: B,
    registry: Registry,
    item: StatusNotifierItem,
    icon_timer: IntervalTimer,
    stop: Arc<AtomicBool>,
}

impl<B: Bus> Reactor<B> {
    /// Take ownership of `bus` and let it register its initial event sources.
    pub fn new(mut bus: B, item: StatusNotifierItem) -> Result<Self> {
        let mut registry = Registry::new();
        bus.attach(&mut registry)?;
        let icon_timer = IntervalTimer::new(ICON_INTERVAL)?;
        Ok(Self { bus, registry, item, icon_timer, stop: Arc::new(AtomicBool::new(false)) })
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn item(&self) -> &StatusNotifierItem {
        &self.item
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A flag that makes [`Reactor::run_forever`] return once set. Safe to set from a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn send(&mut self, msg: Message) -> Result<u32> {
        self.bus.send(msg, &mut self.registry)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.bus.flush(&mut self.registry)
    }

    pub fn run_forever(&mut self) -> Result<()> {
        while !self.stop.load(Ordering::SeqCst) {
            self.turn()?;
        }
        log::info!("event loop stopped");
        Ok(())
    }

    /// Wait for readiness once and handle everything that became ready.
    pub fn turn(&mut self) -> Result<()> {
        let mut slots = vec![Slot::IconTimer];
        let mut fds = vec![(self.icon_timer.as_fd().as_raw_fd(), PollFlags::POLLIN)];
        for (id, watch) in self.registry.watches() {
            slots.push(Slot::Watch(id));
            fds.push((watch.fd, watch.interest));
        }
        for (id, timeout) in self.registry.timeouts() {
            slots.push(Slot::Timeout(id));
            fds.push((timeout.timer.as_fd().as_raw_fd(), PollFlags::POLLIN));
        }
        log::trace!("polling {} descriptors", fds.len());

        let Some(ready) = wait(&fds)? else {
            return Ok(());
        };

        for ((slot, &(fd, _)), revents) in slots.into_iter().zip(&fds).zip(ready) {
            if revents.is_empty() {
                continue;
            }
            match slot {
                Slot::IconTimer => self.icon_timer_expired()?,
                Slot::Watch(id) => {
                    // handling an earlier slot may have removed or replaced this watch
                    if self.registry.watch(id).map(|watch| watch.fd) != Some(fd) {
                        continue;
                    }
                    self.bus.handle_watch(id, poll_to_readiness(revents), &mut self.registry)?;
                }
                Slot::Timeout(id) => {
                    let Some(timeout) = self.registry.timeout(id) else {
                        continue;
                    };
                    if timeout.timer.as_fd().as_raw_fd() != fd {
                        continue;
                    }
                    for _ in 0..timeout.timer.expirations()? {
                        self.bus.handle_timeout(id, &mut self.registry)?;
                    }
                }
            }
        }

        while self.bus.dispatch_status() == DispatchStatus::DataRemains {
            self.bus.dispatch(&mut self.registry, &mut self.item)?;
        }
        if self.bus.has_messages_to_send() {
            self.bus.flush(&mut self.registry)?;
        }
        Ok(())
    }

    fn icon_timer_expired(&mut self) -> Result<()> {
        let expirations = self.icon_timer.expirations()?;
        if expirations == 0 {
            return Ok(());
        }
        if expirations > 1 {
            log::trace!("icon timer expired {} times since the last turn", expirations);
        }
        let signal = self.item.new_icon_signal()?;
        match self.bus.send(signal, &mut self.registry) {
            Ok(_) => Ok(()),
            Err(Error::OutboundFull) => {
                log::warn!("outbound queue is full, skipping NewIcon");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Block until one of `fds` is ready. Returns the observed events per entry, or `None` if interrupted.
fn wait(fds: &[(RawFd, PollFlags)]) -> Result<Option<Vec<PollFlags>>> {
    let mut poll_fds: Vec<PollFd> = fds
        .iter()
        // SAFETY: every descriptor belongs to a timer owned by the reactor or to the bus connection, both of
        // which outlive this call.
        .map(|&(fd, events)| PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, events))
        .collect();
    match poll(&mut poll_fds, PollTimeout::NONE) {
        Ok(_) => Ok(Some(poll_fds.iter().map(|fd| fd.revents().unwrap_or(PollFlags::empty())).collect())),
        Err(Errno::EINTR) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
