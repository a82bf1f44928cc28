//! Fixed-capacity connection slot pool.
//!
//! Every slot is allocated once at startup, so accepting a connection never
//! touches the heap. A slot's `Conn` sits behind its own mutex: the oneshot
//! re-arm discipline keeps it uncontended, the mutex just makes the
//! reactor/worker hand-off safe and lets the sweep detect an in-flight worker
//! with `try_lock`.

use crate::conn::Conn;
use std::sync::{Arc, Mutex};

pub struct ConnectionSlab {
    entries: Box<[Arc<Mutex<Conn>>]>,
    live: Box<[bool]>,
    free: Vec<usize>,
    active: usize,
}

impl ConnectionSlab {
    /// Allocate the whole slot array up front.
    pub fn new(capacity: usize) -> Self {
        let entries = (0..capacity)
            .map(|_| Arc::new(Mutex::new(Conn::empty())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            entries,
            live: vec![false; capacity].into_boxed_slice(),
            free: (0..capacity).rev().collect(),
            active: 0,
        }
    }

    /// O(1) claim of a free slot index; `None` at capacity. The caller resets
    /// the slot's `Conn` under its lock.
    pub fn allocate(&mut self) -> Option<usize> {
        let idx = self.free.pop()?;
        self.live[idx] = true;
        self.active += 1;
        Some(idx)
    }

    /// O(1) return of a slot to the free list, guarded against double free.
    pub fn free(&mut self, idx: usize) {
        if idx >= self.live.len() || !self.live[idx] {
            return;
        }
        self.live[idx] = false;
        self.free.push(idx);
        self.active -= 1;
    }

    pub fn get(&self, idx: usize) -> Option<&Arc<Mutex<Conn>>> {
        self.entries.get(idx)
    }

    pub fn len(&self) -> usize {
        self.active
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Indices of currently claimed slots (teardown sweep at shutdown).
    pub fn live_slots(&self) -> Vec<usize> {
        (0..self.live.len()).filter(|&i| self.live[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free() {
        let mut slab = ConnectionSlab::new(2);
        assert_eq!(slab.capacity(), 2);

        let a = slab.allocate().unwrap();
        let b = slab.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(slab.len(), 2);
        assert!(slab.allocate().is_none(), "capacity must reject");

        slab.free(a);
        assert_eq!(slab.len(), 1);
        slab.free(a);
        assert_eq!(slab.len(), 1, "double free must be a no-op");

        // The freed slot is reused.
        assert_eq!(slab.allocate().unwrap(), a);
    }

    #[test]
    fn test_generation_bumps_on_release() {
        let mut slab = ConnectionSlab::new(1);
        let idx = slab.allocate().unwrap();
        let peer = "127.0.0.1:4000".parse().unwrap();

        let entry = slab.get(idx).unwrap().clone();
        let gen_before = {
            let mut conn = entry.lock().unwrap();
            conn.claim(10, peer);
            conn.generation
        };
        {
            let mut conn = entry.lock().unwrap();
            conn.release();
        }
        slab.free(idx);

        slab.allocate().unwrap();
        let gen_after = entry.lock().unwrap().generation;
        assert_eq!(gen_after, gen_before + 1, "stale queue entries must miss");
    }
}
