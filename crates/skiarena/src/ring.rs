use crate::invariants::{
    debug_assert_bounded_count, debug_assert_head_not_past_tail, debug_assert_monotonic,
};
use crate::layout::SharedRegion;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Every ring in the region is single-producer/single-consumer: the host
// produces into SQ/stdin and consumes CQ/stdout/stdin-wait; the slot's
// worker does the mirror image. Head and tail are free-running 32-bit
// sequence numbers living at fixed header offsets; the buffer index is
// `seq & mask`.
//
// Producer (enqueue path):
// 1. Load `tail` with Relaxed (only the producer writes tail)
// 2. Load `head` with Acquire (synchronizes with the consumer's Release)
// 3. Write the slot data (plain writes; protected by the protocol)
// 4. Store `tail` with Release (publishes the slot to the consumer)
//
// Consumer (dequeue path):
// 1. Load `head` with Relaxed (only the consumer writes head)
// 2. Load `tail` with Acquire (synchronizes with the producer's Release)
// 3. Read the slot data (plain reads; protected by the protocol)
// 4. Store `head` with Release (returns the slot to the producer)
//
// The Release on the producer's tail is also what makes *arena* writes
// performed before a submission or completion visible to the other side:
// the host lowers a term into the arena, then publishes the work unit; the
// worker's Acquire on the same tail orders the arena reads after the
// writes. The same argument covers worker rewrites published through CQ.
//
// Unlike a heap ring that owns its storage, these views borrow regions of
// one shared allocation; all offsets come from `Layout`, never recomputed.
//
// =============================================================================

/// View of a fixed-slot-width ring inside a shared region.
///
/// Cheap to clone; a clone is the same ring. The SPSC discipline is per
/// endpoint: at most one thread may enqueue and one may dequeue at a time.
#[derive(Clone)]
pub struct SlotRing {
    region: Arc<SharedRegion>,
    head_off: usize,
    tail_off: usize,
    data_off: usize,
    slot_words: usize,
}

impl SlotRing {
    pub(crate) fn new(
        region: Arc<SharedRegion>,
        head_off: usize,
        tail_off: usize,
        data_off: usize,
        slot_words: usize,
    ) -> Self {
        Self {
            region,
            head_off,
            tail_off,
            data_off,
            slot_words,
        }
    }

    #[inline]
    pub fn entries(&self) -> u32 {
        self.region.layout().ring_entries()
    }

    #[inline]
    fn mask(&self) -> u32 {
        self.region.layout().ring_mask()
    }

    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.region.atomic(self.tail_off).load(Ordering::Relaxed);
        let head = self.region.atomic(self.head_off).load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.entries() as usize
    }

    /// Non-blocking enqueue of one slot. Returns `false` when full.
    ///
    /// `words.len()` must equal the ring's slot width.
    pub fn try_enqueue(&self, words: &[u32]) -> bool {
        debug_assert_eq!(words.len(), self.slot_words);

        let tail = self.region.atomic(self.tail_off).load(Ordering::Relaxed);
        let head = self.region.atomic(self.head_off).load(Ordering::Acquire);

        let used = tail.wrapping_sub(head);
        if used >= self.entries() {
            return false;
        }

        let idx = (tail & self.mask()) as usize;
        let slot = self
            .region
            .words_at(self.data_off + idx * self.slot_words * 4, self.slot_words);
        // SAFETY: the slot at `tail` is outside [head, tail) so the consumer
        // is not reading it; only this producer writes between the occupancy
        // check and the Release below.
        unsafe {
            for (i, w) in words.iter().enumerate() {
                slot.add(i).write(*w);
            }
        }

        let new_tail = tail.wrapping_add(1);
        debug_assert_monotonic!("tail", tail, new_tail);
        debug_assert_bounded_count!(
            new_tail.wrapping_sub(head) as usize,
            self.entries() as usize
        );
        self.region
            .atomic(self.tail_off)
            .store(new_tail, Ordering::Release);
        true
    }

    /// Non-blocking dequeue of one slot. Returns `false` when empty.
    pub fn try_dequeue(&self, out: &mut [u32]) -> bool {
        debug_assert_eq!(out.len(), self.slot_words);

        let head = self.region.atomic(self.head_off).load(Ordering::Relaxed);
        let tail = self.region.atomic(self.tail_off).load(Ordering::Acquire);

        if tail.wrapping_sub(head) == 0 {
            return false;
        }

        let idx = (head & self.mask()) as usize;
        let slot = self
            .region
            .words_at(self.data_off + idx * self.slot_words * 4, self.slot_words);
        // SAFETY: the slot at `head` is inside [head, tail), fully written
        // by the producer and published by its Release on tail, which the
        // Acquire above synchronizes with.
        unsafe {
            for (i, w) in out.iter_mut().enumerate() {
                *w = slot.add(i).read();
            }
        }

        let new_head = head.wrapping_add(1);
        debug_assert_head_not_past_tail!(new_head, tail);
        debug_assert_monotonic!("head", head, new_head);
        self.region
            .atomic(self.head_off)
            .store(new_head, Ordering::Release);
        true
    }
}

impl std::fmt::Debug for SlotRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRing")
            .field("entries", &self.entries())
            .field("slot_words", &self.slot_words)
            .field("len", &self.len())
            .finish()
    }
}

/// View of a byte-granular ring (stdin/stdout) inside a shared region.
///
/// Same index protocol as [`SlotRing`], but reads and writes move byte
/// runs and may be partial: `write` returns how many bytes fit, `read`
/// how many were available.
#[derive(Clone)]
pub struct ByteRing {
    region: Arc<SharedRegion>,
    head_off: usize,
    tail_off: usize,
    data_off: usize,
}

impl ByteRing {
    pub(crate) fn new(
        region: Arc<SharedRegion>,
        head_off: usize,
        tail_off: usize,
        data_off: usize,
    ) -> Self {
        Self {
            region,
            head_off,
            tail_off,
            data_off,
        }
    }

    /// The stdin ring: host writes, worker reads.
    pub fn stdin(region: &Arc<SharedRegion>) -> Self {
        let l = region.layout();
        Self::new(
            Arc::clone(region),
            crate::layout::OFF_STDIN_HEAD,
            crate::layout::OFF_STDIN_TAIL,
            l.stdin_data(),
        )
    }

    /// The stdout ring: worker writes, host reads.
    pub fn stdout(region: &Arc<SharedRegion>) -> Self {
        let l = region.layout();
        Self::new(
            Arc::clone(region),
            crate::layout::OFF_STDOUT_HEAD,
            crate::layout::OFF_STDOUT_TAIL,
            l.stdout_data(),
        )
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.layout().ring_entries() as usize
    }

    #[inline]
    fn mask(&self) -> u32 {
        self.region.layout().ring_mask()
    }

    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.region.atomic(self.tail_off).load(Ordering::Relaxed);
        let head = self.region.atomic(self.head_off).load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes as many bytes as fit, returning the count written.
    pub fn write(&self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }

        let tail = self.region.atomic(self.tail_off).load(Ordering::Relaxed);
        let head = self.region.atomic(self.head_off).load(Ordering::Acquire);

        let free = self.capacity() - tail.wrapping_sub(head) as usize;
        let n = bytes.len().min(free);
        if n == 0 {
            return 0;
        }

        let base = self.region.bytes_at(self.data_off, self.capacity());
        let start = (tail & self.mask()) as usize;
        let first = n.min(self.capacity() - start);
        // SAFETY: the byte range [tail, tail+n) is outside [head, tail) so
        // the consumer is not reading it; split into at most two contiguous
        // runs at the wrap boundary.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(start), first);
            if first < n {
                std::ptr::copy_nonoverlapping(bytes.as_ptr().add(first), base, n - first);
            }
        }

        let new_tail = tail.wrapping_add(n as u32);
        debug_assert_monotonic!("tail", tail, new_tail);
        debug_assert_bounded_count!(new_tail.wrapping_sub(head) as usize, self.capacity());
        self.region
            .atomic(self.tail_off)
            .store(new_tail, Ordering::Release);
        n
    }

    /// Reads up to `out.len()` bytes, returning the count read.
    pub fn read(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }

        let head = self.region.atomic(self.head_off).load(Ordering::Relaxed);
        let tail = self.region.atomic(self.tail_off).load(Ordering::Acquire);

        let avail = tail.wrapping_sub(head) as usize;
        let n = out.len().min(avail);
        if n == 0 {
            return 0;
        }

        let base = self.region.bytes_at(self.data_off, self.capacity());
        let start = (head & self.mask()) as usize;
        let first = n.min(self.capacity() - start);
        // SAFETY: the byte range [head, head+n) is inside [head, tail),
        // published by the producer's Release on tail.
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
            if first < n {
                std::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), n - first);
            }
        }

        let new_head = head.wrapping_add(n as u32);
        debug_assert_head_not_past_tail!(new_head, tail);
        debug_assert_monotonic!("head", head, new_head);
        self.region
            .atomic(self.head_off)
            .store(new_head, Ordering::Release);
        n
    }

    /// Pops a single byte.
    pub fn pop(&self) -> Option<u8> {
        let mut buf = [0u8; 1];
        if self.read(&mut buf) == 1 {
            Some(buf[0])
        } else {
            None
        }
    }

    /// Pushes a single byte. Returns `false` when full.
    pub fn push(&self, byte: u8) -> bool {
        self.write(&[byte]) == 1
    }
}

impl std::fmt::Debug for ByteRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRing")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Layout, OFF_SQ_HEAD, OFF_SQ_TAIL, OFF_STDIN_HEAD, OFF_STDIN_TAIL};

    fn region() -> Arc<SharedRegion> {
        SharedRegion::create(Layout::new(8, 64).unwrap(), 0).unwrap()
    }

    fn slot_ring(region: &Arc<SharedRegion>) -> SlotRing {
        let l = region.layout();
        SlotRing::new(Arc::clone(region), OFF_SQ_HEAD, OFF_SQ_TAIL, l.sq_data(), 3)
    }

    fn byte_ring(region: &Arc<SharedRegion>) -> ByteRing {
        let l = region.layout();
        ByteRing::new(Arc::clone(region), OFF_STDIN_HEAD, OFF_STDIN_TAIL, l.stdin_data())
    }

    #[test]
    fn slot_ring_fifo() {
        let region = region();
        let ring = slot_ring(&region);

        assert!(ring.try_enqueue(&[1, 2, 3]));
        assert!(ring.try_enqueue(&[4, 5, 6]));
        assert_eq!(ring.len(), 2);

        let mut out = [0u32; 3];
        assert!(ring.try_dequeue(&mut out));
        assert_eq!(out, [1, 2, 3]);
        assert!(ring.try_dequeue(&mut out));
        assert_eq!(out, [4, 5, 6]);
        assert!(!ring.try_dequeue(&mut out));
    }

    #[test]
    fn slot_ring_full_rejects() {
        let region = region();
        let ring = slot_ring(&region);

        for i in 0..8 {
            assert!(ring.try_enqueue(&[i, i, i]));
        }
        assert!(ring.is_full());
        assert!(!ring.try_enqueue(&[99, 99, 99]));

        let mut out = [0u32; 3];
        assert!(ring.try_dequeue(&mut out));
        assert!(ring.try_enqueue(&[99, 99, 99]));
    }

    #[test]
    fn slot_ring_survives_index_wrap() {
        let region = region();
        let ring = slot_ring(&region);
        let mut out = [0u32; 3];

        // Many laps around the 8-slot buffer.
        for lap in 0..100u32 {
            assert!(ring.try_enqueue(&[lap, lap + 1, lap + 2]));
            assert!(ring.try_dequeue(&mut out));
            assert_eq!(out, [lap, lap + 1, lap + 2]);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn byte_ring_round_trip_with_wrap() {
        let region = region();
        let ring = byte_ring(&region);

        assert_eq!(ring.write(b"abcde"), 5);
        let mut out = [0u8; 5];
        assert_eq!(ring.read(&mut out), 5);
        assert_eq!(&out, b"abcde");

        // Second write straddles the 8-byte wrap boundary.
        assert_eq!(ring.write(b"fghijk"), 6);
        let mut out = [0u8; 6];
        assert_eq!(ring.read(&mut out), 6);
        assert_eq!(&out, b"fghijk");
    }

    #[test]
    fn byte_ring_partial_write_when_full() {
        let region = region();
        let ring = byte_ring(&region);

        assert_eq!(ring.write(b"0123456789"), 8);
        assert_eq!(ring.write(b"x"), 0);

        let mut out = [0u8; 3];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(&out, b"012");
        assert_eq!(ring.write(b"xyz"), 3);

        let mut rest = [0u8; 16];
        assert_eq!(ring.read(&mut rest), 8);
        assert_eq!(&rest[..8], b"34567xyz");
    }

    #[test]
    fn single_byte_push_pop() {
        let region = region();
        let ring = byte_ring(&region);

        assert_eq!(ring.pop(), None);
        assert!(ring.push(65));
        assert_eq!(ring.pop(), Some(65));
        assert_eq!(ring.pop(), None);
    }
}
