//! Sorted idle-eviction timer list.
//!
//! An arena of doubly linked nodes ordered by ascending expiration. Handles
//! carry a node generation so a stale handle (already swept or deleted) is a
//! no-op rather than a corruption. Traversing head to tail always yields
//! non-decreasing expirations.

use std::time::Instant;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    idx: usize,
    r#gen: u64,
}

struct Node<T> {
    expire: Instant,
    payload: Option<T>,
    r#gen: u64,
    prev: usize,
    next: usize,
}

pub struct TimerList<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> TimerList<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a timer, keeping the list sorted by expiration.
    ///
    /// The scan runs tail-to-head: fresh and refreshed timers expire after
    /// almost everything already queued, so insertion is amortized near-tail.
    /// Equal expirations keep insertion order.
    pub fn insert(&mut self, expire: Instant, payload: T) -> TimerHandle {
        let idx = self.alloc(expire, payload);

        let mut after = self.tail;
        while after != NIL && self.nodes[after].expire > expire {
            after = self.nodes[after].prev;
        }
        self.link_after(idx, after);

        TimerHandle {
            idx,
            r#gen: self.nodes[idx].r#gen,
        }
    }

    /// Push a live timer to a later expiration.
    ///
    /// Precondition: `new_expire` is not earlier than the timer's current
    /// expiration. The reinsertion scan starts at the timer's old successor,
    /// which is only correct under that assumption.
    pub fn adjust(&mut self, handle: TimerHandle, new_expire: Instant) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        let idx = handle.idx;
        debug_assert!(new_expire >= self.nodes[idx].expire);
        self.nodes[idx].expire = new_expire;

        let next = self.nodes[idx].next;
        if next == NIL || self.nodes[next].expire >= new_expire {
            return true; // Already in position.
        }

        self.unlink(idx);
        let mut after = next;
        while self.nodes[after].next != NIL && self.nodes[self.nodes[after].next].expire < new_expire
        {
            after = self.nodes[after].next;
        }
        self.link_after(idx, after);
        true
    }

    /// Remove a timer by identity. Returns `false` for a stale handle.
    pub fn delete(&mut self, handle: TimerHandle) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        self.unlink(handle.idx);
        self.release(handle.idx);
        true
    }

    /// Fire every timer with expiration ≤ `now`, in ascending order.
    ///
    /// Each expired head is detached and released before its payload is handed
    /// to `f`, so the handle held by the payload's owner is stale by the time
    /// the eviction action runs.
    pub fn sweep(&mut self, now: Instant, mut f: impl FnMut(T)) {
        while self.head != NIL && self.nodes[self.head].expire <= now {
            let idx = self.head;
            self.unlink(idx);
            let payload = self.nodes[idx].payload.take();
            self.release(idx);
            if let Some(p) = payload {
                f(p);
            }
        }
    }

    fn is_live(&self, handle: TimerHandle) -> bool {
        handle.idx < self.nodes.len()
            && self.nodes[handle.idx].r#gen == handle.r#gen
            && self.nodes[handle.idx].payload.is_some()
    }

    fn alloc(&mut self, expire: Instant, payload: T) -> usize {
        if let Some(idx) = self.free.pop() {
            let node = &mut self.nodes[idx];
            node.expire = expire;
            node.payload = Some(payload);
            node.prev = NIL;
            node.next = NIL;
            idx
        } else {
            self.nodes.push(Node {
                expire,
                payload: Some(payload),
                r#gen: 0,
                prev: NIL,
                next: NIL,
            });
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.payload = None;
        node.r#gen += 1;
        node.prev = NIL;
        node.next = NIL;
        self.free.push(idx);
    }

    /// Link `idx` directly after `after` (`NIL` means link at the head).
    fn link_after(&mut self, idx: usize, after: usize) {
        if after == NIL {
            let old_head = self.head;
            self.nodes[idx].prev = NIL;
            self.nodes[idx].next = old_head;
            if old_head != NIL {
                self.nodes[old_head].prev = idx;
            } else {
                self.tail = idx;
            }
            self.head = idx;
        } else {
            let next = self.nodes[after].next;
            self.nodes[idx].prev = after;
            self.nodes[idx].next = next;
            self.nodes[after].next = idx;
            if next != NIL {
                self.nodes[next].prev = idx;
            } else {
                self.tail = idx;
            }
        }
        self.len += 1;
    }

    fn unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
        self.len -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn expirations<T>(list: &TimerList<T>) -> Vec<Instant> {
        let mut out = Vec::new();
        let mut cur = list.head;
        while cur != NIL {
            out.push(list.nodes[cur].expire);
            cur = list.nodes[cur].next;
        }
        out
    }

    fn assert_sorted<T>(list: &TimerList<T>) {
        let exp = expirations(list);
        assert!(exp.windows(2).all(|w| w[0] <= w[1]), "list out of order");
    }

    #[test]
    fn test_insert_keeps_order() {
        let base = Instant::now();
        let mut list = TimerList::new();
        for &secs in &[5u64, 1, 3, 3, 9, 2] {
            list.insert(base + Duration::from_secs(secs), secs);
            assert_sorted(&list);
        }
        assert_eq!(list.len(), 6);
    }

    #[test]
    fn test_sweep_fires_expired_in_ascending_order() {
        let base = Instant::now();
        let mut list = TimerList::new();
        for &secs in &[4u64, 1, 8, 2, 6] {
            list.insert(base + Duration::from_secs(secs), secs);
        }

        let mut fired = Vec::new();
        list.sweep(base + Duration::from_secs(4), |v| fired.push(v));
        assert_eq!(fired, vec![1, 2, 4]);
        assert_eq!(list.len(), 2);
        assert_sorted(&list);

        // A second sweep at the same instant fires nothing again.
        let mut again = Vec::new();
        list.sweep(base + Duration::from_secs(4), |v| again.push(v));
        assert!(again.is_empty());
    }

    #[test]
    fn test_adjust_pushes_later() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let h1 = list.insert(base + Duration::from_secs(1), 1);
        list.insert(base + Duration::from_secs(2), 2);
        list.insert(base + Duration::from_secs(3), 3);

        assert!(list.adjust(h1, base + Duration::from_secs(5)));
        assert_sorted(&list);

        let mut fired = Vec::new();
        list.sweep(base + Duration::from_secs(5), |v| fired.push(v));
        assert_eq!(fired, vec![2, 3, 1]);
    }

    #[test]
    fn test_delete_positions() {
        let base = Instant::now();
        let mut list = TimerList::new();

        // Singleton.
        let h = list.insert(base, 0);
        assert!(list.delete(h));
        assert!(list.is_empty());
        assert!(!list.delete(h), "stale handle must be a no-op");

        // Head, tail and interior.
        let hs: Vec<_> = (0..4u64)
            .map(|s| list.insert(base + Duration::from_secs(s), s))
            .collect();
        assert!(list.delete(hs[0]));
        assert!(list.delete(hs[3]));
        assert!(list.delete(hs[2]));
        assert_sorted(&list);
        assert_eq!(list.len(), 1);

        let mut fired = Vec::new();
        list.sweep(base + Duration::from_secs(10), |v| fired.push(v));
        assert_eq!(fired, vec![1]);
    }

    #[test]
    fn test_handle_reuse_does_not_alias() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let h1 = list.insert(base, 1);
        assert!(list.delete(h1));
        // The slot is recycled for a new timer; the old handle must stay dead.
        let h2 = list.insert(base + Duration::from_secs(1), 2);
        assert!(!list.delete(h1));
        assert!(list.delete(h2));
        assert!(list.is_empty());
    }
}
