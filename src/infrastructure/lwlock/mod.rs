// LWLock - Lightweight Lock implementations
// Two lock classes back the buffer cache:
// * SpinLock: short-hold bookkeeping lock, waiters busy-wait
// * SleepLock: long-hold content lock, waiters are suspended and the
//   holding thread is recorded so callers can assert ownership

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

/// Number of failed spins after which a SpinLock waiter yields its time slice
const SPINS_BEFORE_YIELD: u32 = 64;

/// A trait that defines a unified interface for basic locks
pub trait LockInterface<T> {
    /// The guard type for exclusive locks
    type Guard<'a>: DerefMut<Target = T>
    where
        Self: 'a,
        T: 'a;

    /// Creates a new lock with the given initial value
    fn new(data: T) -> Self;

    /// Acquires an exclusive lock
    fn lock(&self) -> Self::Guard<'_>;
}

/// Busy-waiting mutual exclusion for short critical sections
///
/// Never held across blocking operations. Built on `parking_lot::Mutex`, but
/// acquisition spins on `try_lock` instead of parking the thread.
pub struct SpinLock<T> {
    inner: Mutex<T>,
    name: &'static str,
}

impl<T> SpinLock<T> {
    /// Creates a new spin lock protecting `data`
    pub fn new(data: T, name: &'static str) -> Self {
        SpinLock {
            inner: Mutex::new(data),
            name,
        }
    }

    /// Spins until the lock is acquired
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let mut spins: u32 = 0;
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            spins = spins.wrapping_add(1);
            if spins % SPINS_BEFORE_YIELD == 0 {
                // The holder may have been preempted
                if spins == SPINS_BEFORE_YIELD {
                    log::trace!("spinlock {}: contended, yielding", self.name);
                }
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning
    #[cfg(test)]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Returns true if some thread currently holds the lock
    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    #[cfg(test)]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> LockInterface<T> for SpinLock<T> {
    type Guard<'a>
        = MutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        SpinLock::new(data, "spinlock")
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

/// Blocking mutual exclusion for long critical sections (may span device I/O)
///
/// Waiters sleep on a condition variable. The lock remembers which thread
/// holds it, so `holding()` can answer whether the *calling* thread owns it.
pub struct SleepLock<T: ?Sized> {
    holder: Mutex<Option<ThreadId>>,
    wakeup: Condvar,
    name: &'static str,
    data: UnsafeCell<T>,
}

// Access to `data` is serialized by `holder`
unsafe impl<T: ?Sized + Send> Send for SleepLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    /// Creates a new sleep lock protecting `data`
    pub fn new(data: T, name: &'static str) -> Self {
        SleepLock {
            holder: Mutex::new(None),
            wakeup: Condvar::new(),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// Acquires the lock, suspending the calling thread while another holds it
    ///
    /// # Panics
    /// Panics if the calling thread already holds this lock.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        if *holder == Some(me) {
            drop(holder);
            panic!("sleeplock {}: relock by holding thread", self.name);
        }
        while holder.is_some() {
            self.wakeup.wait(&mut holder);
        }
        *holder = Some(me);
        SleepLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Acquires the lock only if it is free
    #[cfg(test)]
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let mut holder = self.holder.lock();
        if holder.is_some() {
            return None;
        }
        *holder = Some(thread::current().id());
        Some(SleepLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Returns true if the calling thread holds the lock
    pub fn holding(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }

    /// Returns true if any thread holds the lock
    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.holder.lock().is_some()
    }

    #[cfg(test)]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn unlock(&self) {
        let mut holder = self.holder.lock();
        *holder = None;
        self.wakeup.notify_one();
    }
}

impl<T> LockInterface<T> for SleepLock<T> {
    type Guard<'a>
        = SleepLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        SleepLock::new(data, "sleeplock")
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

/// RAII guard for a held SleepLock
///
/// Not `Send`: the lock must be released by the thread that acquired it.
pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized> SleepLockGuard<'_, T> {
    /// Returns the lock this guard holds
    #[cfg(test)]
    pub fn lock(&self) -> &SleepLock<T> {
        self.lock
    }
}

impl<T: ?Sized> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
