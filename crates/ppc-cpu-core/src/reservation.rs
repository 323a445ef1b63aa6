//! Cross-core reservations for `lwarx`/`stwcx.`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

pub const DEFAULT_LINE_SIZE: u64 = 32;

/// Machine-wide table of reserved cache lines, one ownership claim per line.
///
/// Only active claims are kept: a line maps to the core that holds it and is removed
/// when the claim goes away. All mutation happens under a single table lock. `active`
/// mirrors the number of claims so ordinary stores can skip the lock when nothing is
/// reserved.
#[derive(Debug)]
pub struct ReservationTable {
    line_size: u64,
    lines: Mutex<FxHashMap<u64, u32>>,
    active: AtomicUsize,
}

impl Default for ReservationTable {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_SIZE)
    }
}

impl ReservationTable {
    /// `line_size` must be a power of two.
    pub fn new(line_size: u64) -> Self {
        debug_assert!(line_size.is_power_of_two());
        Self {
            line_size,
            lines: Mutex::new(FxHashMap::default()),
            active: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn line_size(&self) -> u64 {
        self.line_size
    }

    #[inline]
    pub fn line_of(&self, ra: u64) -> u64 {
        ra & !(self.line_size - 1)
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<u64, u32>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, lines: &mut FxHashMap<u64, u32>, line: u64) {
        if lines.remove(&line).is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn cancel_span(&self, lines: &mut FxHashMap<u64, u32>, ra: u64, len: u64) {
        let first = self.line_of(ra);
        let last = self.line_of(ra.wrapping_add(len.max(1) - 1));
        let mut line = first;
        loop {
            self.remove(lines, line);
            if line >= last {
                break;
            }
            line += self.line_size;
        }
    }

    /// Claims the line containing `ra` for `owner`, taking it from any previous owner.
    pub fn reserve(&self, ra: u64, owner: u32) {
        let line = self.line_of(ra);
        let mut lines = self.lock();
        if lines.insert(line, owner).is_none() {
            self.active.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Whether `owner` holds the claim on the line containing `ra`. A held claim is
    /// released in the same critical section.
    pub fn check_and_release(&self, ra: u64, owner: u32) -> bool {
        self.store_conditional(ra, owner, || ()).is_some()
    }

    /// Runs `write` only if `owner` holds the claim on the line containing `ra`, and
    /// releases the claim afterwards. The table lock is held across `write`, so no
    /// ordinary store can land between the check and the write.
    pub fn store_conditional<R>(&self, ra: u64, owner: u32, write: impl FnOnce() -> R) -> Option<R> {
        let line = self.line_of(ra);
        let mut lines = self.lock();
        if lines.get(&line) != Some(&owner) {
            return None;
        }
        let result = write();
        self.remove(&mut lines, line);
        Some(result)
    }

    /// Drops `owner`'s claim on the line containing `ra`, if it has one.
    pub fn release(&self, ra: u64, owner: u32) {
        let line = self.line_of(ra);
        let mut lines = self.lock();
        if lines.get(&line) == Some(&owner) {
            self.remove(&mut lines, line);
        }
    }

    /// Performs an ordinary store of `len` bytes at `ra` through `write`, cancelling
    /// every claim on the touched lines. While any line is reserved the write runs
    /// under the table lock and is ordered against conditional stores.
    pub fn store<R>(&self, ra: u64, len: u64, write: impl FnOnce() -> R) -> R {
        if self.active.load(Ordering::SeqCst) == 0 {
            return write();
        }
        let mut lines = self.lock();
        let result = write();
        self.cancel_span(&mut lines, ra, len);
        result
    }

    /// Cancels every claim on the lines `[ra, ra+len)` touches, for writes that went
    /// to memory some other way.
    pub fn notify_store(&self, ra: u64, len: u64) {
        if self.active.load(Ordering::SeqCst) == 0 {
            return;
        }
        let mut lines = self.lock();
        self.cancel_span(&mut lines, ra, len);
    }

    /// The core holding the line containing `ra`.
    pub fn owner(&self, ra: u64) -> Option<u32> {
        self.lock().get(&self.line_of(ra)).copied()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of lines currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The reserving core's own view: the exact real address and size of its reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalReservation {
    pub ra: u64,
    pub size: u32,
    pub valid: bool,
}

impl LocalReservation {
    #[inline]
    pub fn matches(&self, ra: u64, size: u32) -> bool {
        self.valid && self.ra == ra && self.size == size
    }

    #[inline]
    pub fn clear(&mut self) {
        self.valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_global_per_line() {
        let t = ReservationTable::default();
        t.reserve(0x1004, 0);
        assert_eq!(t.owner(0x101c), Some(0));
        t.reserve(0x1000, 1);
        assert!(!t.check_and_release(0x1004, 0));
        assert!(t.check_and_release(0x1004, 1));
        assert!(!t.check_and_release(0x1004, 1));
        assert_eq!(t.active_count(), 0);
    }

    #[test]
    fn failed_check_leaves_other_owner_intact() {
        let t = ReservationTable::default();
        t.reserve(0x2000, 1);
        assert!(!t.check_and_release(0x2000, 0));
        assert_eq!(t.owner(0x2000), Some(1));
        t.release(0x2000, 0);
        assert_eq!(t.owner(0x2000), Some(1));
        t.release(0x2000, 1);
        assert_eq!(t.owner(0x2000), None);
    }

    #[test]
    fn stores_cancel_overlapping_lines() {
        let t = ReservationTable::default();
        t.reserve(0x3000, 0);
        t.reserve(0x3020, 1);
        t.notify_store(0x2ffe, 2);
        assert_eq!(t.active_count(), 2);
        t.notify_store(0x301e, 4);
        assert_eq!(t.active_count(), 0);
    }

    #[test]
    fn released_lines_leave_the_table() {
        let t = ReservationTable::default();
        for n in 0..64 {
            t.reserve(0x1_0000 + n * 32, (n % 3) as u32);
        }
        assert_eq!(t.len(), 64);
        for n in 0..32 {
            t.check_and_release(0x1_0000 + n * 32, (n % 3) as u32);
        }
        t.store(0x1_0000 + 32 * 32, 16 * 32, || ());
        for n in 48..64 {
            t.release(0x1_0000 + n * 32, (n % 3) as u32);
        }
        assert!(t.is_empty());
        assert_eq!(t.active_count(), 0);
    }

    #[test]
    fn store_conditional_writes_only_for_the_owner() {
        let t = ReservationTable::default();
        let mut written = Vec::new();
        t.reserve(0x4000, 2);
        assert_eq!(t.store_conditional(0x4008, 1, || written.push(1)), None);
        assert_eq!(t.store_conditional(0x4008, 2, || written.push(2)), Some(()));
        assert_eq!(t.store_conditional(0x4008, 2, || written.push(3)), None);
        assert_eq!(written, vec![2]);
        assert!(t.is_empty());
    }

    #[test]
    fn plain_store_waits_for_an_in_flight_conditional_store() {
        use std::sync::{mpsc, Arc};
        use std::thread;
        use std::time::Duration;

        let t = Arc::new(ReservationTable::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        t.reserve(0x5000, 0);

        let (started_tx, started_rx) = mpsc::channel();
        let conditional = {
            let (t, order) = (Arc::clone(&t), Arc::clone(&order));
            thread::spawn(move || {
                t.store_conditional(0x5000, 0, || {
                    started_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    order.lock().unwrap().push("conditional");
                })
            })
        };
        started_rx.recv().unwrap();
        t.store(0x5000, 4, || order.lock().unwrap().push("plain"));

        assert_eq!(conditional.join().unwrap(), Some(()));
        assert_eq!(*order.lock().unwrap(), vec!["conditional", "plain"]);
        assert!(t.is_empty());
    }
}
