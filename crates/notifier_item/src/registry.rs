//! Bookkeeping for the event sources a bus connection asked us to watch.

use std::os::unix::io::RawFd;

use nix::poll::PollFlags;

use crate::{
    bus::{SourceHandler, Timeout, TimeoutId, Watch, WatchFlags, WatchId},
    list::SourceList,
    timer::IntervalTimer,
};

/// An enabled watch. The descriptor belongs to the bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEntry {
    pub fd: RawFd,
    pub interest: PollFlags,
}

/// An enabled timeout, together with the timer that drives it.
#[derive(Debug)]
pub struct TimeoutEntry {
    pub timer: IntervalTimer,
}

/// Translate the conditions a watch is interested in into poll events.
pub fn interest_to_poll(flags: WatchFlags) -> PollFlags {
    let mut events = PollFlags::empty();
    if flags.contains(WatchFlags::READABLE) {
        events |= PollFlags::POLLIN;
    }
    if flags.contains(WatchFlags::WRITABLE) {
        events |= PollFlags::POLLOUT;
    }
    events
}

/// Translate the events `poll` reported back into watch conditions.
///
/// Errors and hangups are reported even though they are never requested. A closed descriptor counts as an
/// error.
pub fn poll_to_readiness(revents: PollFlags) -> WatchFlags {
    let mut flags = WatchFlags::empty();
    if revents.contains(PollFlags::POLLIN) {
        flags |= WatchFlags::READABLE;
    }
    if revents.contains(PollFlags::POLLOUT) {
        flags |= WatchFlags::WRITABLE;
    }
    if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        flags |= WatchFlags::ERROR;
    }
    if revents.contains(PollFlags::POLLHUP) {
        flags |= WatchFlags::HANGUP;
    }
    flags
}

/// Every watch and timeout that is currently enabled, in the order they were enabled.
#[derive(Default)]
pub struct Registry {
    watches: SourceList<WatchId, WatchEntry>,
    timeouts: SourceList<TimeoutId, TimeoutEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watches(&self) -> impl Iterator<Item = (WatchId, &WatchEntry)> {
        self.watches.iter()
    }

    pub fn timeouts(&self) -> impl Iterator<Item = (TimeoutId, &TimeoutEntry)> {
        self.timeouts.iter()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    pub fn timeout_count(&self) -> usize {
        self.timeouts.len()
    }

    pub fn watch(&self, id: WatchId) -> Option<&WatchEntry> {
        self.watches.get(&id)
    }

    pub fn timeout(&self, id: TimeoutId) -> Option<&TimeoutEntry> {
        self.timeouts.get(&id)
    }
}

impl SourceHandler for Registry {
    fn add_watch(&mut self, watch: &Watch) -> bool {
        if !watch.enabled {
            return true;
        }
        let entry = WatchEntry { fd: watch.fd, interest: interest_to_poll(watch.flags) };
        if self.watches.insert(watch.id, entry).is_some() {
            log::debug!("watch {:?} was already tracked, refreshed it", watch.id);
        }
        true
    }

    fn remove_watch(&mut self, watch: &Watch) {
        self.watches.remove(&watch.id);
    }

    fn toggle_watch(&mut self, watch: &Watch) {
        if watch.enabled {
            self.add_watch(watch);
        } else {
            self.remove_watch(watch);
        }
    }

    fn add_timeout(&mut self, timeout: &Timeout) -> bool {
        if !timeout.enabled || self.timeouts.contains(&timeout.id) {
            return true;
        }
        match IntervalTimer::new(timeout.interval) {
            Ok(timer) => {
                self.timeouts.insert(timeout.id, TimeoutEntry { timer });
                true
            }
            Err(e) => {
                log::error!("failed to create timer for timeout {:?}: {}", timeout.id, e);
                false
            }
        }
    }

    fn remove_timeout(&mut self, timeout: &Timeout) {
        self.timeouts.remove(&timeout.id);
    }

    fn toggle_timeout(&mut self, timeout: &Timeout) {
        if timeout.enabled {
            self.add_timeout(timeout);
        } else {
            self.remove_timeout(timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        os::unix::io::{AsFd, AsRawFd},
        time::Duration,
    };

    fn watch(id: u32, enabled: bool) -> Watch {
        Watch { id: WatchId(id), fd: 100 + id as RawFd, flags: WatchFlags::READABLE, enabled }
    }

    fn timeout(id: u32, enabled: bool) -> Timeout {
        Timeout { id: TimeoutId(id), interval: Duration::from_secs(25), enabled }
    }

    #[test]
    fn test_disabled_watch_is_not_tracked() {
        let mut registry = Registry::new();
        assert!(registry.add_watch(&watch(1, false)));
        assert_eq!(registry.watch_count(), 0);
    }

    #[test]
    fn test_watch_lifecycle() {
        let mut registry = Registry::new();
        registry.add_watch(&watch(1, true));
        registry.add_watch(&watch(2, true));
        assert_eq!(registry.watch(WatchId(1)), Some(&WatchEntry { fd: 101, interest: PollFlags::POLLIN }));

        registry.toggle_watch(&watch(1, false));
        assert_eq!(registry.watches().map(|(id, _)| id).collect::<Vec<_>>(), vec![WatchId(2)]);

        registry.toggle_watch(&watch(1, true));
        assert_eq!(registry.watches().map(|(id, _)| id).collect::<Vec<_>>(), vec![WatchId(2), WatchId(1)]);
        assert_eq!(registry.watch(WatchId(1)).map(|w| w.fd), Some(101));
    }

    #[test]
    fn test_remove_without_add_and_twice() {
        let mut registry = Registry::new();
        registry.remove_watch(&watch(7, false));
        registry.add_watch(&watch(1, true));
        registry.remove_watch(&watch(1, true));
        registry.remove_watch(&watch(1, true));
        registry.remove_timeout(&timeout(3, true));
        assert_eq!(registry.watch_count(), 0);
        assert_eq!(registry.timeout_count(), 0);
        registry.watches.assert_consistent();
        registry.timeouts.assert_consistent();
    }

    #[test]
    fn test_one_entry_per_handle() {
        let mut registry = Registry::new();
        let mut writable = watch(1, true);
        registry.add_watch(&writable);
        writable.flags = WatchFlags::READABLE | WatchFlags::WRITABLE;
        registry.toggle_watch(&writable);
        assert_eq!(registry.watch_count(), 1);
        assert_eq!(registry.watch(WatchId(1)).map(|w| w.interest), Some(PollFlags::POLLIN | PollFlags::POLLOUT));
    }

    /// Replays random-looking operation sequences and checks the registry against the last reported state.
    #[test]
    fn test_watch_sequences_track_last_state() {
        let ops = [
            (1, 'a', true),
            (2, 't', true),
            (1, 't', false),
            (3, 'a', false),
            (3, 't', true),
            (2, 'r', true),
            (1, 'a', true),
            (3, 'r', false),
            (1, 't', true),
            (2, 't', false),
        ];
        let mut registry = Registry::new();
        let mut expected = std::collections::HashMap::new();
        for (id, op, enabled) in ops {
            let w = watch(id, enabled);
            match op {
                'a' => {
                    registry.add_watch(&w);
                    if enabled {
                        expected.insert(id, ());
                    }
                }
                'r' => {
                    registry.remove_watch(&w);
                    expected.remove(&id);
                }
                _ => {
                    registry.toggle_watch(&w);
                    if enabled {
                        expected.insert(id, ());
                    } else {
                        expected.remove(&id);
                    }
                }
            }
            for id in 1..=3 {
                assert_eq!(registry.watch(WatchId(id)).is_some(), expected.contains_key(&id), "watch {}", id);
            }
            registry.watches.assert_consistent();
        }
    }

    #[test]
    fn test_timeout_owns_a_timer() {
        let mut registry = Registry::new();
        assert!(registry.add_timeout(&timeout(1, true)));
        assert!(registry.add_timeout(&timeout(2, false)));
        assert_eq!(registry.timeout_count(), 1);

        let entry = registry.timeout(TimeoutId(1)).unwrap();
        assert!(entry.timer.as_fd().as_raw_fd() >= 0);
        assert_eq!(entry.timer.interval(), Duration::from_secs(25));
        assert_eq!(registry.timeouts().map(|(id, _)| id).collect::<Vec<_>>(), vec![TimeoutId(1)]);

        registry.toggle_timeout(&timeout(1, false));
        assert_eq!(registry.timeout_count(), 0);
        assert!(registry.timeout(TimeoutId(1)).is_none());
    }

    #[test]
    fn test_readiness_translation() {
        assert_eq!(poll_to_readiness(PollFlags::POLLIN | PollFlags::POLLHUP), WatchFlags::READABLE | WatchFlags::HANGUP);
        assert_eq!(poll_to_readiness(PollFlags::POLLOUT | PollFlags::POLLERR), WatchFlags::WRITABLE | WatchFlags::ERROR);
        assert_eq!(poll_to_readiness(PollFlags::POLLNVAL), WatchFlags::ERROR);
        assert_eq!(interest_to_poll(WatchFlags::READABLE | WatchFlags::WRITABLE), PollFlags::POLLIN | PollFlags::POLLOUT);
    }
}
