//! Loom model of the region's ring publication protocol.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! The real rings live inside a raw shared allocation, which loom cannot
//! instrument, so the protocol is modeled in miniature: 32-bit head/tail
//! sequence numbers, a four-slot buffer, Release on the owned index and
//! Acquire on the foreign one. Loom then explores every interleaving of
//! one producer and one consumer to check that published slots are always
//! fully visible.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU32, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

const CAP: u32 = 4;

struct ProtocolRing {
    head: AtomicU32,
    tail: AtomicU32,
    slots: UnsafeCell<[u32; CAP as usize]>,
}

unsafe impl Send for ProtocolRing {}
unsafe impl Sync for ProtocolRing {}

impl ProtocolRing {
    fn new() -> Self {
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            slots: UnsafeCell::new([0; CAP as usize]),
        }
    }

    fn try_push(&self, value: u32) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= CAP {
            return false;
        }
        // SAFETY: slot at `tail` is outside [head, tail); only the producer
        // writes it before the Release below publishes it.
        unsafe {
            (*self.slots.get())[(tail % CAP) as usize] = value;
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    fn try_pop(&self) -> Option<u32> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == 0 {
            return None;
        }
        // SAFETY: slot at `head` is inside [head, tail), published by the
        // producer's Release which the Acquire above synchronizes with.
        let value = unsafe { (*self.slots.get())[(head % CAP) as usize] };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

#[test]
fn published_slots_are_fully_visible() {
    loom::model(|| {
        let ring = Arc::new(ProtocolRing::new());

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for v in 1..=3u32 {
                    while !ring.try_push(v) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 3 {
            if let Some(v) = ring.try_pop() {
                seen.push(v);
            } else {
                thread::yield_now();
            }
        }

        producer.join().unwrap();
        // FIFO and no torn/zero reads.
        assert_eq!(seen, vec![1, 2, 3]);
    });
}

#[test]
fn occupancy_never_exceeds_capacity() {
    loom::model(|| {
        let ring = Arc::new(ProtocolRing::new());

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for v in 0..5u32 {
                    if !ring.try_push(v) {
                        break;
                    }
                }
            })
        };

        let _ = ring.try_pop();
        let tail = ring.tail.load(Ordering::Acquire);
        let head = ring.head.load(Ordering::Acquire);
        assert!(tail.wrapping_sub(head) <= CAP);

        producer.join().unwrap();
    });
}
