//! Frame buffers between the application and the controller.
//!
//! Storage is provided by the caller through [`FrameMemory`] so that the
//! driver never allocates. Its size is fixed at compile time by a
//! [`Capacities`] implementation; the number of frames a buffer actually
//! uses is chosen at configuration time.

use crate::message::Frame;
use core::mem::MaybeUninit;
use generic_array::{ArrayLength, GenericArray};

/// Bounded FIFO of frames over borrowed storage
pub struct FrameRingBuffer<'a> {
    storage: &'a mut [Frame],
    capacity: usize,
    head: usize,
    tail: usize,
    count: usize,
    peak: usize,
}

impl<'a> FrameRingBuffer<'a> {
    /// Uses the first `capacity` frames of `storage`. Fails if `capacity` is
    /// zero or larger than the storage.
    pub fn init_with_capacity(storage: &'a mut [Frame], capacity: usize) -> Option<Self> {
        if capacity == 0 || capacity > storage.len() {
            return None;
        }
        Some(Self {
            storage,
            capacity,
            head: 0,
            tail: 0,
            count: 0,
            peak: 0,
        })
    }

    /// Appends `frame` at the back. Returns `false`, leaving the buffer
    /// untouched, if it is full.
    pub fn append(&mut self, frame: Frame) -> bool {
        if self.count == self.capacity {
            return false;
        }
        self.storage[self.tail] = frame;
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
        self.peak = self.peak.max(self.count);
        true
    }

    /// Removes the oldest frame.
    pub fn remove(&mut self) -> Option<Frame> {
        if self.count == 0 {
            return None;
        }
        let frame = self.storage[self.head];
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
        Some(frame)
    }

    /// Capacity
    pub fn size(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently held
    pub fn count(&self) -> usize {
        self.count
    }

    /// Highest number of frames ever held at once
    pub fn peak_count(&self) -> usize {
        self.peak
    }

    /// Gives the whole storage back, dropping any frame still queued.
    pub fn into_storage(self) -> &'a mut [Frame] {
        self.storage
    }
}

/// Storage capacities, in frames
pub trait Capacities {
    /// Frames available to the receive buffer
    type RxFrames: ArrayLength<Frame>;
    /// Frames available to the transmit buffer
    type TxFrames: ArrayLength<Frame>;
}

pub(crate) struct FrameMemoryInner<C: Capacities> {
    pub(crate) rx: GenericArray<Frame, C::RxFrames>,
    pub(crate) tx: GenericArray<Frame, C::TxFrames>,
}

/// Backing storage of the receive and transmit buffers. Provide a struct `C`
/// that implements [`Capacities`] to select the sizes, then construct this
/// using `FrameMemory::<C>::new()`.
pub struct FrameMemory<C: Capacities>(MaybeUninit<FrameMemoryInner<C>>);

impl<C: Capacities> FrameMemory<C> {
    /// All initialization is handled by the driver, so this can be placed in
    /// a `static` or an uninitialized link section.
    pub const fn new() -> Self {
        Self(MaybeUninit::uninit())
    }

    pub(crate) fn init(&mut self) -> &mut FrameMemoryInner<C> {
        self.0.write(FrameMemoryInner {
            rx: GenericArray::default(),
            tx: GenericArray::default(),
        })
    }
}

impl<C: Capacities> Default for FrameMemory<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::standard_id;
    use embedded_can::Frame as _;
    use generic_array::typenum::consts::*;

    fn frame(tag: u8) -> Frame {
        Frame::new(standard_id(u16::from(tag)), &[tag]).unwrap()
    }

    #[test]
    fn init_rejects_unusable_capacity() {
        let mut storage = [Frame::default(); 4];
        assert!(FrameRingBuffer::init_with_capacity(&mut storage, 0).is_none());
        assert!(FrameRingBuffer::init_with_capacity(&mut storage, 5).is_none());
        let ring = FrameRingBuffer::init_with_capacity(&mut storage, 3).unwrap();
        assert_eq!(ring.size(), 3);
        assert_eq!(ring.count(), 0);
        assert_eq!(ring.into_storage().len(), 4);
    }

    #[test]
    fn frames_leave_in_arrival_order() {
        let mut storage = [Frame::default(); 8];
        let mut ring = FrameRingBuffer::init_with_capacity(&mut storage, 8).unwrap();
        for round in 0..3 {
            for tag in 0..8 {
                assert!(ring.append(frame(round * 8 + tag)));
            }
            for tag in 0..8 {
                assert_eq!(ring.remove(), Some(frame(round * 8 + tag)));
            }
            assert_eq!(ring.remove(), None);
        }
        assert_eq!(ring.peak_count(), 8);
    }

    #[test]
    fn full_buffer_rejects_and_keeps_contents() {
        let (a, b, c, d, e) = (frame(0xA), frame(0xB), frame(0xC), frame(0xD), frame(0xE));
        let mut storage = [Frame::default(); 4];
        let mut ring = FrameRingBuffer::init_with_capacity(&mut storage, 4).unwrap();

        assert!(ring.append(a));
        assert!(ring.append(b));
        assert!(ring.append(c));
        assert!(ring.append(d));
        assert!(!ring.append(e));
        assert_eq!(ring.count(), 4);

        assert_eq!(ring.remove(), Some(a));
        assert!(ring.append(e));

        assert_eq!(ring.remove(), Some(b));
        assert_eq!(ring.remove(), Some(c));
        assert_eq!(ring.remove(), Some(d));
        assert_eq!(ring.remove(), Some(e));
        assert_eq!(ring.remove(), None);
        assert_eq!(ring.count(), 0);
        assert_eq!(ring.peak_count(), 4);
    }

    #[test]
    fn peak_count_tracks_high_water_mark() {
        let mut storage = [Frame::default(); 4];
        let mut ring = FrameRingBuffer::init_with_capacity(&mut storage, 4).unwrap();
        ring.append(frame(1));
        ring.append(frame(2));
        ring.remove();
        ring.append(frame(3));
        assert_eq!(ring.count(), 2);
        assert_eq!(ring.peak_count(), 2);
    }

    struct Small;
    impl Capacities for Small {
        type RxFrames = U4;
        type TxFrames = U2;
    }

    #[test]
    fn memory_is_sized_by_capacities() {
        let mut memory = FrameMemory::<Small>::new();
        let inner = memory.init();
        assert_eq!(inner.rx.len(), 4);
        assert_eq!(inner.tx.len(), 2);
        assert!(inner.rx.iter().all(|f| *f == Frame::default()));
    }
}
