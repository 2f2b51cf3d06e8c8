//! # Monitor
//!
//! A mutex + condition-variable pair behind one handle, in the classic
//! monitor shape: scoped lock acquisition with guaranteed release, plain and
//! predicate-guarded waits, and notify-one/all.
//!
//! The runtime itself uses a monitor in exactly one place: serializing the
//! address-space reservation each thread performs the first time it touches
//! the defer runtime. The timed wait exists for external callers and is not
//! exercised by that path.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// A mutual-exclusion lock paired with a condition variable.
pub struct Monitor<T> {
    /// Unique monitor ID for debugging.
    id: u64,
    /// The guarded value.
    lock: Mutex<T>,
    /// Condition variable for waits against the guarded value.
    cond: Condvar,
    /// Whether the lock is currently held.
    held: AtomicBool,
}

impl<T> Monitor<T> {
    /// Create a new monitor guarding `value`.
    pub fn new(value: T) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            lock: Mutex::new(value),
            cond: Condvar::new(),
            held: AtomicBool::new(false),
        }
    }

    /// Get the monitor ID for debugging.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Acquire the lock, blocking until it is available.
    ///
    /// The returned guard releases the lock when dropped.
    pub fn lock(&self) -> MonitorGuard<'_, T> {
        let inner = self.lock.lock();
        self.held.store(true, Ordering::Release);
        MonitorGuard {
            inner,
            held: &self.held,
        }
    }

    /// Attempt to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<MonitorGuard<'_, T>> {
        let inner = self.lock.try_lock()?;
        self.held.store(true, Ordering::Release);
        Some(MonitorGuard {
            inner,
            held: &self.held,
        })
    }

    /// Block on the condition variable until notified.
    ///
    /// The lock is released while waiting and reacquired before returning.
    pub fn wait(&self, guard: &mut MonitorGuard<'_, T>) {
        self.held.store(false, Ordering::Release);
        self.cond.wait(&mut guard.inner);
        self.held.store(true, Ordering::Release);
    }

    /// Block until `condition` returns false for the guarded value.
    ///
    /// The condition is rechecked after every wakeup, so spurious wakeups are
    /// absorbed here.
    pub fn wait_while(&self, guard: &mut MonitorGuard<'_, T>, condition: impl FnMut(&mut T) -> bool) {
        self.held.store(false, Ordering::Release);
        self.cond.wait_while(&mut guard.inner, condition);
        self.held.store(true, Ordering::Release);
    }

    /// Block until notified or until `timeout` elapses.
    ///
    /// Returns `true` if the wait timed out.
    pub fn wait_for(&self, guard: &mut MonitorGuard<'_, T>, timeout: Duration) -> bool {
        self.held.store(false, Ordering::Release);
        let result = self.cond.wait_for(&mut guard.inner, timeout);
        self.held.store(true, Ordering::Release);
        result.timed_out()
    }

    /// Wake one waiting thread. Returns `true` if a thread was woken.
    pub fn notify_one(&self) -> bool {
        self.cond.notify_one()
    }

    /// Wake every waiting thread. Returns the number of threads woken.
    pub fn notify_all(&self) -> usize {
        self.cond.notify_all()
    }
}

impl<T: Default> Default for Monitor<T> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Monitor").field("data", &&*guard).finish(),
            None => f.debug_struct("Monitor").field("data", &"<locked>").finish(),
        }
    }
}

/// An RAII guard holding a [`Monitor`] locked.
pub struct MonitorGuard<'a, T> {
    inner: MutexGuard<'a, T>,
    held: &'a AtomicBool,
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for MonitorGuard<'_, T> {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for MonitorGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_guards_mutation() {
        let monitor = Monitor::new(0u32);
        {
            let mut guard = monitor.lock();
            *guard += 5;
            assert!(monitor.is_locked());
        }
        assert!(!monitor.is_locked());
        assert_eq!(*monitor.lock(), 5);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let monitor = Monitor::new(());
        let _guard = monitor.lock();
        assert!(monitor.try_lock().is_none());
    }

    #[test]
    fn monitors_have_distinct_ids() {
        let a = Monitor::new(());
        let b = Monitor::new(());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn wait_while_blocks_until_predicate_clears() {
        let monitor = Arc::new(Monitor::new(false));
        let waiter = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                let mut guard = monitor.lock();
                monitor.wait_while(&mut guard, |ready| !*ready);
                *guard
            })
        };
        // Give the waiter a chance to park, then flip the flag.
        thread::sleep(Duration::from_millis(20));
        *monitor.lock() = true;
        monitor.notify_all();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_for_times_out_without_notification() {
        let monitor = Monitor::new(());
        let mut guard = monitor.lock();
        let timed_out = monitor.wait_for(&mut guard, Duration::from_millis(10));
        assert!(timed_out);
    }

    #[test]
    fn notify_one_reports_whether_anyone_was_woken() {
        let monitor = Monitor::new(());
        assert!(!monitor.notify_one());
    }
}
