use std::{
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd},
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::{
        time::TimeSpec,
        timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags},
    },
};

use crate::Result;

/// Shortest interval a timer can be armed with. A zero interval would disarm the timerfd instead.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A periodic timer backed by a timerfd on the monotonic clock.
///
/// The first expiration happens one interval after creation. The descriptor becomes readable whenever at
/// least one expiration has not been consumed yet, and is closed when the timer is dropped.
#[derive(Debug)]
pub struct IntervalTimer {
    fd: TimerFd,
    interval: Duration,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Result<Self> {
        let interval = interval.max(MIN_INTERVAL);
        let fd = TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC)?;
        fd.set(Expiration::Interval(TimeSpec::from(interval)), TimerSetTimeFlags::empty())?;
        Ok(Self { fd, interval })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consume and return the number of expirations since the last call.
    ///
    /// Returns `0` if the timer has not expired, or if the counter could not be read in full.
    pub fn expirations(&self) -> Result<u64> {
        let mut buf = [0u8; 8];
        let read = read_full(self.fd.as_fd().as_raw_fd(), &mut buf)?;
        if read == buf.len() {
            Ok(u64::from_ne_bytes(buf))
        } else {
            Ok(0)
        }
    }

    /// Re-arm the timer so that it behaves as if it had been started `ago` in the past.
    #[cfg(test)]
    pub(crate) fn backdate(&self, ago: Duration) -> Result<()> {
        let now = nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC)?;
        let start = now - TimeSpec::from(ago);
        self.fd.set(
            Expiration::IntervalDelayed(start + TimeSpec::from(self.interval), TimeSpec::from(self.interval)),
            TimerSetTimeFlags::TFD_TIMER_ABSTIME,
        )?;
        Ok(())
    }
}

impl AsFd for IntervalTimer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Read until `buf` is full, the descriptor has no more data right now, or it reached end of file.
///
/// Interrupted reads are retried. Returns the number of bytes read.
pub(crate) fn read_full(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match nix::unistd::read(fd, &mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fresh_timer_has_no_expirations() {
        let timer = IntervalTimer::new(Duration::from_secs(10)).unwrap();
        assert_eq!(timer.expirations().unwrap(), 0);
    }

    #[test]
    fn test_backdated_timer_reports_missed_intervals() {
        let timer = IntervalTimer::new(Duration::from_secs(10)).unwrap();
        timer.backdate(Duration::from_secs(35)).unwrap();
        assert_eq!(timer.expirations().unwrap(), 3);
        // reading consumes the counter
        assert_eq!(timer.expirations().unwrap(), 0);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let timer = IntervalTimer::new(Duration::ZERO).unwrap();
        assert_eq!(timer.interval(), MIN_INTERVAL);
    }

    #[test]
    fn test_read_full_stops_at_end_of_file() {
        let (mut writer, reader) = std::os::unix::net::UnixStream::pair().unwrap();
        std::io::Write::write_all(&mut writer, &[1, 2, 3]).unwrap();
        drop(writer);
        let mut buf = [0u8; 8];
        assert_eq!(read_full(reader.as_raw_fd(), &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }
}
