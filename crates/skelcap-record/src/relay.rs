//! Bounded single-producer / single-consumer frame relay.
//!
//! The queue itself is a lock-free `crossbeam` ring.  Each relay also keeps
//! a pool of spare buffers the consumer hands back after use, so the
//! producer can copy the next sensor frame without allocating.
//!
//! * `push` never gives up while the consumer is alive: a full queue is
//!   backpressure and the producer retries (spinning, then yielding).
//! * `pop` never blocks.  [`RelayReceiver::wait`] parks the consumer until
//!   the producer signals new work or the timeout elapses.
//! * Dropping either half closes the relay for the other one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::Backoff;

/// Frames in flight per stream.
pub const DEFAULT_CAPACITY: usize = 200;

struct Shared<T> {
    queue: ArrayQueue<T>,
    spare: ArrayQueue<T>,
    sender_gone: AtomicBool,
    receiver_gone: AtomicBool,
    wake: Unparker,
}

/// Producer half.  Not `Clone`: there is exactly one producer.
pub struct RelaySender<T> {
    shared: Arc<Shared<T>>,
    stalls: u64,
}

/// Consumer half.  Not `Clone`: there is exactly one consumer.
pub struct RelayReceiver<T> {
    shared: Arc<Shared<T>>,
    parker: Parker,
}

/// Why a non-blocking push did not enqueue; the frame is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
}

/// Create a relay holding at most `capacity` frames.
///
/// # Panics
/// If `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> (RelaySender<T>, RelayReceiver<T>) {
    assert!(capacity > 0, "relay capacity must be non-zero");
    let parker = Parker::new();
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity),
        spare: ArrayQueue::new(capacity),
        sender_gone: AtomicBool::new(false),
        receiver_gone: AtomicBool::new(false),
        wake: parker.unparker().clone(),
    });
    (
        RelaySender {
            shared: shared.clone(),
            stalls: 0,
        },
        RelayReceiver { shared, parker },
    )
}

/// Whether the relay's atomics are lock-free on this target.
pub fn is_lock_free() -> bool {
    AtomicCell::<usize>::is_lock_free()
}

impl<T> RelaySender<T> {
    pub fn try_push(&mut self, frame: T) -> Result<(), PushError<T>> {
        if self.is_closed() {
            return Err(PushError::Closed(frame));
        }
        match self.shared.queue.push(frame) {
            Ok(()) => {
                self.shared.wake.unpark();
                Ok(())
            }
            Err(frame) => Err(PushError::Full(frame)),
        }
    }

    /// Enqueue, retrying while the queue is full.
    ///
    /// Only fails, handing the frame back, once the consumer has gone away.
    pub fn push(&mut self, mut frame: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut stalled = false;
        loop {
            match self.try_push(frame) {
                Ok(()) => return Ok(()),
                Err(PushError::Closed(f)) => return Err(f),
                Err(PushError::Full(f)) => {
                    if !stalled {
                        stalled = true;
                        self.stalls += 1;
                    }
                    frame = f;
                    self.shared.wake.unpark();
                    backoff.snooze();
                }
            }
        }
    }

    /// A buffer previously recycled by the consumer, if any.
    pub fn take_spare(&mut self) -> Option<T> {
        self.shared.spare.pop()
    }

    /// The consumer dropped its half.
    pub fn is_closed(&self) -> bool {
        self.shared.receiver_gone.load(Ordering::Acquire)
    }

    /// Number of pushes that found the queue full at least once.
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }
}

impl<T> Drop for RelaySender<T> {
    fn drop(&mut self) {
        self.shared.sender_gone.store(true, Ordering::Release);
        self.shared.wake.unpark();
    }
}

impl<T> RelayReceiver<T> {
    /// Non-blocking dequeue.
    pub fn pop(&mut self) -> Option<T> {
        self.shared.queue.pop()
    }

    /// Park until the producer pushes, drops its half, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) {
        if self.shared.queue.is_empty() && !self.is_disconnected() {
            self.parker.park_timeout(timeout);
        }
    }

    /// Hand a drained buffer back to the producer.  Dropped if the pool is full.
    pub fn recycle(&self, frame: T) {
        let _ = self.shared.spare.push(frame);
    }

    /// The producer dropped its half.
    pub fn is_disconnected(&self) -> bool {
        self.shared.sender_gone.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }
}

impl<T> Drop for RelayReceiver<T> {
    fn drop(&mut self) {
        self.shared.receiver_gone.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn fifo_and_nonblocking_pop() {
        let (mut tx, mut rx) = bounded(4);
        assert_eq!(rx.pop(), None::<u32>);
        for i in 0..4 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.try_push(99), Err(PushError::Full(99)));
        assert_eq!((0..4).map(|_| rx.pop().unwrap()).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn push_fails_once_receiver_dropped() {
        let (mut tx, rx) = bounded(1);
        tx.push(1u8).unwrap();
        drop(rx);
        assert!(tx.is_closed());
        // Would otherwise spin forever on the full queue.
        assert_eq!(tx.push(2), Err(2));
    }

    #[test]
    fn receiver_sees_sender_drop() {
        let (tx, rx) = bounded::<u8>(1);
        assert!(!rx.is_disconnected());
        drop(tx);
        assert!(rx.is_disconnected());
        // Must not park once the producer is gone.
        rx.wait(Duration::from_secs(60));
    }

    #[test]
    fn spares_are_recycled() {
        let (mut tx, mut rx) = bounded(2);
        assert!(tx.take_spare().is_none());
        tx.push(vec![1u8; 16]).unwrap();
        let buf = rx.pop().unwrap();
        rx.recycle(buf);
        assert_eq!(tx.take_spare().map(|b| b.len()), Some(16));
    }

    #[test]
    fn blocked_producer_resumes_when_consumer_drains() {
        let (mut tx, mut rx) = bounded(2);
        let producer = thread::spawn(move || {
            for i in 0..100u32 {
                tx.push(i).unwrap();
            }
            tx.stalls()
        });

        let mut got = Vec::new();
        while got.len() < 100 {
            match rx.pop() {
                Some(v) => got.push(v),
                None => rx.wait(Duration::from_millis(1)),
            }
        }
        producer.join().unwrap();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn default_capacity() {
        let (tx, rx) = bounded::<()>(DEFAULT_CAPACITY);
        assert_eq!(tx.capacity(), 200);
        assert_eq!(rx.capacity(), 200);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push,
        Pop,
    }

    proptest! {
        #[test]
        fn bounded_and_ordered(ops in proptest::collection::vec(
            prop_oneof![Just(Op::Push), Just(Op::Pop)], 0..600)
        ) {
            let (mut tx, mut rx) = bounded(DEFAULT_CAPACITY);
            let mut next = 0u32;
            let mut expect = 0u32;
            for op in ops {
                match op {
                    Op::Push => {
                        if tx.try_push(next).is_ok() {
                            next += 1;
                        }
                    }
                    Op::Pop => {
                        if let Some(v) = rx.pop() {
                            prop_assert_eq!(v, expect);
                            expect += 1;
                        }
                    }
                }
                prop_assert!(rx.len() <= DEFAULT_CAPACITY);
            }
            while let Some(v) = rx.pop() {
                prop_assert_eq!(v, expect);
                expect += 1;
            }
            prop_assert_eq!(expect, next);
        }
    }
}
