//! The scheduler interface.
//!
//! The interpreter never blocks: it saves its registers into the frame,
//! reports a [`YieldReason`], and returns. Parked frames live in a
//! [`TimeQueue`] until their wake condition arrives; re-entering the loop on
//! the same frame picks up exactly where it left off.

use crate::frame::{Frame, Pid};

/// Why a frame left the interpreter loop without terminating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YieldReason {
    /// `sleep` for the given number of seconds.
    Sleeping(i32),
    /// End-of-slice yield from a foreground frame.
    Foreground,
    /// End-of-slice yield from a background frame.
    Background,
    /// Parked in `read` until the player types a line.
    ReadWait,
    /// Parked in `event_waitfor` until a matching event arrives.
    EventWait,
    /// A breakpoint tripped; the debugger owns the frame until resumed.
    Breakpoint,
}

impl YieldReason {
    /// The event-queue label for this suspension, as shown in process
    /// listings.
    pub fn label(&self) -> &'static str {
        match self {
            YieldReason::Sleeping(_) => "SLEEPING",
            YieldReason::Foreground => "FOREGROUND",
            YieldReason::Background => "BACKGROUND",
            YieldReason::ReadWait => "READ",
            YieldReason::EventWait => "EVENT_WAITFOR",
            YieldReason::Breakpoint => "DEBUGGER",
        }
    }
}

/// A parked process.
#[derive(Debug)]
pub struct QueueEntry {
    /// Logical second the entry becomes runnable; `u64::MAX` parks it
    /// until something external wakes it.
    pub wake_at: u64,
    /// Tie-breaker preserving FIFO order among same-second entries.
    seq: u64,
    pub reason: YieldReason,
    pub frame: Box<Frame>,
}

/// The time-ordered ready/parked queue.
///
/// One engine owns one queue; time is a logical seconds counter the
/// embedder advances.
#[derive(Debug, Default)]
pub struct TimeQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

impl TimeQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a frame to wake `delay` seconds from `now`.
    pub fn schedule(&mut self, now: u64, delay: u64, reason: YieldReason, frame: Box<Frame>) {
        let wake_at = now.saturating_add(delay);
        self.park(wake_at, reason, frame);
    }

    /// Parks a frame until something explicitly wakes it.
    pub fn park_indefinitely(&mut self, reason: YieldReason, frame: Box<Frame>) {
        self.park(u64::MAX, reason, frame);
    }

    fn park(&mut self, wake_at: u64, reason: YieldReason, frame: Box<Frame>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry {
            wake_at,
            seq,
            reason,
            frame,
        });
    }

    /// Pops the earliest entry due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<QueueEntry> {
        let at = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.wake_at <= now)
            .min_by_key(|(_, e)| (e.wake_at, e.seq))
            .map(|(at, _)| at)?;
        Some(self.entries.remove(at))
    }

    /// Seconds until the next timed entry is due, if any.
    pub fn next_due_in(&self, now: u64) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| e.wake_at != u64::MAX)
            .map(|e| e.wake_at.saturating_sub(now))
            .min()
    }

    /// Whether the pid is parked here.
    pub fn contains(&self, pid: Pid) -> bool {
        self.entries.iter().any(|e| e.frame.pid == pid)
    }

    /// Mutable access to a parked frame, for event delivery.
    pub fn frame_mut(&mut self, pid: Pid) -> Option<&mut Frame> {
        self.entries
            .iter_mut()
            .find(|e| e.frame.pid == pid)
            .map(|e| e.frame.as_mut())
    }

    /// Mutable access to a whole queue entry, reason included.
    pub fn entry_mut(&mut self, pid: Pid) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.frame.pid == pid)
    }

    /// Makes a parked frame runnable now.
    pub fn wake(&mut self, pid: Pid, now: u64) -> bool {
        for entry in self.entries.iter_mut() {
            if entry.frame.pid == pid {
                entry.wake_at = now;
                return true;
            }
        }
        false
    }

    /// Removes a parked frame from the queue entirely.
    pub fn remove(&mut self, pid: Pid) -> Option<QueueEntry> {
        let at = self.entries.iter().position(|e| e.frame.pid == pid)?;
        Some(self.entries.remove(at))
    }

    /// Pids of every parked frame.
    pub fn pids(&self) -> Vec<Pid> {
        self.entries.iter().map(|e| e.frame.pid).collect()
    }

    /// Number of parked frames.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Multitask;
    use muf_core::{Dbref, ProgramPin, NOTHING};

    fn frame(pid: Pid) -> Box<Frame> {
        Box::new(Frame::new(
            pid,
            0,
            Dbref(1),
            NOTHING,
            Dbref(2),
            ProgramPin::new(),
            0,
            Multitask::Foreground,
        ))
    }

    #[test]
    fn due_entries_pop_in_time_then_fifo_order() {
        let mut queue = TimeQueue::new();
        queue.schedule(0, 5, YieldReason::Sleeping(5), frame(1));
        queue.schedule(0, 0, YieldReason::Foreground, frame(2));
        queue.schedule(0, 0, YieldReason::Foreground, frame(3));

        assert!(queue.pop_due(0).map(|e| e.frame.pid) == Some(2));
        assert!(queue.pop_due(0).map(|e| e.frame.pid) == Some(3));
        assert!(queue.pop_due(0).is_none());
        assert_eq!(queue.next_due_in(0), Some(5));
        assert!(queue.pop_due(5).map(|e| e.frame.pid) == Some(1));
    }

    #[test]
    fn parked_frames_need_an_explicit_wake() {
        let mut queue = TimeQueue::new();
        queue.park_indefinitely(YieldReason::EventWait, frame(7));
        assert!(queue.pop_due(u64::MAX - 1).is_none());
        assert!(queue.wake(7, 3));
        assert_eq!(queue.pop_due(3).map(|e| e.frame.pid), Some(7));
    }

    #[test]
    fn remove_takes_the_frame_out() {
        let mut queue = TimeQueue::new();
        queue.schedule(0, 1, YieldReason::Sleeping(1), frame(9));
        assert!(queue.contains(9));
        assert!(queue.remove(9).is_some());
        assert!(!queue.contains(9));
        assert!(queue.remove(9).is_none());
    }
}
