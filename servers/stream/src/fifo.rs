use std::sync::Mutex;

use rtp_formats::{codec::h264::NaluDescriptor, packet::RtpPacket};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Items with a drop-if-not-sent-by deadline. Zero means no deadline.
pub trait Deadline {
    fn timeout_timestamp(&self) -> u64;
}

impl Deadline for RtpPacket {
    fn timeout_timestamp(&self) -> u64 {
        self.timeout_timestamp
    }
}

impl Deadline for NaluDescriptor {
    fn timeout_timestamp(&self) -> u64 {
        self.timeout_timestamp
    }
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct FifoState<T> {
    slots: Vec<Slot<T>>,
    /// stack of free slot indices
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    count: usize,
}

impl<T> FifoState<T> {
    fn unlink(&mut self, idx: usize) -> Option<T> {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
        self.count -= 1;
        self.free.push(idx);
        self.slots[idx].value.take()
    }
}

/// A bounded FIFO over a pre-allocated slot pool. Slots move between a
/// free stack and a doubly linked in-use list by index; nothing is
/// allocated after construction and `free + in-use = capacity` always
/// holds. All operations are linearizable under one internal mutex;
/// consumers can await the not-empty signal.
#[derive(Debug)]
pub struct PooledFifo<T> {
    state: Mutex<FifoState<T>>,
    not_empty: Notify,
    capacity: usize,
}

impl<T> PooledFifo<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                value: None,
                prev: None,
                next: None,
            });
        }
        Self {
            state: Mutex::new(FifoState {
                slots,
                free: (0..capacity).rev().collect(),
                head: None,
                tail: None,
                count: 0,
            }),
            not_empty: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("fifo mutex poisoned").count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free_len(&self) -> usize {
        self.state.lock().expect("fifo mutex poisoned").free.len()
    }

    /// Append to the tail. A full pool is a normal outcome: the rejected
    /// value comes back so the caller can apply its drop policy.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        {
            let mut state = self.state.lock().expect("fifo mutex poisoned");
            let Some(idx) = state.free.pop() else {
                return Err(value);
            };
            let prev_tail = state.tail;
            state.slots[idx] = Slot {
                value: Some(value),
                prev: prev_tail,
                next: None,
            };
            match prev_tail {
                Some(t) => state.slots[t].next = Some(idx),
                None => state.head = Some(idx),
            }
            state.tail = Some(idx);
            state.count += 1;
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the head, or `None` when the in-use list is empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.state.lock().expect("fifo mutex poisoned");
        let head = state.head?;
        state.unlink(head)
    }

    /// Like [`Self::dequeue`], but awaits the not-empty signal. Returns
    /// `None` once the cancellation token fires.
    pub async fn dequeue_or_wait(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if let Some(value) = self.dequeue() {
                return Some(value);
            }
            tokio::select! {
                _ = self.not_empty.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }
}

impl<T: Deadline> PooledFifo<T> {
    /// Return every queued item whose deadline has passed to the free
    /// list. Called by senders just before transmission so obsolete
    /// frames never hit the wire.
    pub fn clean_from_timeout(&self, now: u64) -> usize {
        let mut state = self.state.lock().expect("fifo mutex poisoned");
        let mut removed = 0;
        let mut cursor = state.head;
        while let Some(idx) = cursor {
            cursor = state.slots[idx].next;
            let expired = state.slots[idx]
                .value
                .as_ref()
                .is_some_and(|v| v.timeout_timestamp() != 0 && v.timeout_timestamp() < now);
            if expired {
                state.unlink(idx);
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug)]
    struct Timed(u64);

    impl Deadline for Timed {
        fn timeout_timestamp(&self) -> u64 {
            self.0
        }
    }

    fn assert_invariant<T>(fifo: &PooledFifo<T>) {
        assert_eq!(fifo.len() + fifo.free_len(), fifo.capacity());
    }

    #[test]
    fn test_fifo_order_and_invariant() {
        let fifo = PooledFifo::new(4);
        assert_invariant(&fifo);
        for v in 0..4 {
            fifo.enqueue(v).unwrap();
            assert_invariant(&fifo);
        }
        for v in 0..4 {
            assert_eq!(fifo.dequeue(), Some(v));
            assert_invariant(&fifo);
        }
        assert_eq!(fifo.dequeue(), None);
    }

    #[test]
    fn test_exhaustion_returns_value_and_keeps_invariant() {
        let fifo = PooledFifo::new(2);
        fifo.enqueue(1).unwrap();
        fifo.enqueue(2).unwrap();
        assert_eq!(fifo.enqueue(3), Err(3));
        assert_invariant(&fifo);
        assert_eq!(fifo.dequeue(), Some(1));
        fifo.enqueue(4).unwrap();
        assert_eq!(fifo.dequeue(), Some(2));
        assert_eq!(fifo.dequeue(), Some(4));
    }

    #[test]
    fn test_slots_are_reused_across_cycles() {
        let fifo = PooledFifo::new(2);
        for round in 0..100 {
            fifo.enqueue(round).unwrap();
            assert_eq!(fifo.dequeue(), Some(round));
        }
        assert_invariant(&fifo);
    }

    #[test]
    fn test_clean_from_timeout() {
        let fifo = PooledFifo::new(8);
        fifo.enqueue(Timed(100)).unwrap();
        fifo.enqueue(Timed(0)).unwrap(); // no deadline
        fifo.enqueue(Timed(300)).unwrap();
        fifo.enqueue(Timed(50)).unwrap();

        assert_eq!(fifo.clean_from_timeout(200), 2);
        assert_invariant(&fifo);
        assert_eq!(fifo.dequeue().map(|t| t.0), Some(0));
        assert_eq!(fifo.dequeue().map(|t| t.0), Some(300));
        assert_eq!(fifo.dequeue().map(|t| t.0), None);
    }

    #[tokio::test]
    async fn test_dequeue_or_wait_cancellation() {
        let fifo: PooledFifo<u32> = PooledFifo::new(2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(fifo.dequeue_or_wait(&cancel).await, None);
    }
}
