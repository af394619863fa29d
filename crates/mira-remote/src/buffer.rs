//! Ping-pong buffers
//!
//! Producers write the back slot while consumers keep reading the front one.
//! [`PingPong::flip`] publishes the back slot.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Pair of slots selected by a parity index
#[derive(Debug, Default)]
pub struct PingPong<T> {
    slots: [RwLock<T>; 2],
    front: AtomicUsize,
}

impl<T> PingPong<T> {
    pub fn new(front: T, back: T) -> Self {
        Self {
            slots: [RwLock::new(front), RwLock::new(back)],
            front: AtomicUsize::new(0),
        }
    }

    /// Index of the slot currently published
    pub fn front_index(&self) -> usize {
        self.front.load(Ordering::Acquire)
    }

    fn back_index(&self) -> usize {
        1 - self.front_index()
    }

    pub fn read_front(&self) -> RwLockReadGuard<'_, T> {
        self.slots[self.front_index()].read()
    }

    pub fn read_back(&self) -> RwLockReadGuard<'_, T> {
        self.slots[self.back_index()].read()
    }

    pub fn write_back(&self) -> RwLockWriteGuard<'_, T> {
        self.slots[self.back_index()].write()
    }

    /// Lock both slots for writing, front first
    pub fn write_both(&self) -> (RwLockWriteGuard<'_, T>, RwLockWriteGuard<'_, T>) {
        // Lock in slot order so concurrent callers cannot deadlock
        let [a, b] = &self.slots;
        let (first, second) = (a.write(), b.write());
        if self.front_index() == 0 {
            (first, second)
        } else {
            (second, first)
        }
    }

    /// Publish the back slot
    pub fn flip(&self) {
        self.front.fetch_xor(1, Ordering::AcqRel);
    }
}
