//! Fixed-capacity sample ring shared by the sampler and the uploader
//!
//! The ring is a single-producer/single-consumer log. The sampler owns the
//! write sequence through a [`RingWriter`]; the uploader owns the commit
//! sequence through a [`RingReader`]. Both handles come from one
//! [`SampleRing::split`] call, so the type system keeps each task to its own
//! index.
//!
//! ## Sequences
//!
//! Both indices are free-running `usize` sequence numbers and a slot is
//! addressed by `seq % N`. The number of unconfirmed samples is therefore
//! `write - commit` (wrapping), which lets a full ring (`N` pending) be told
//! apart from an empty one without sacrificing a slot.
//!
//! ## Overflow
//!
//! A push into a full ring is rejected with [`RingError::Overflow`] and the
//! sample is dropped. Unconfirmed samples are never overwritten; the caller
//! counts the loss.
//!
//! ## Memory ordering
//!
//! The writer stores the sample into its slot, then publishes the new write
//! sequence with `Release`. The reader loads the write sequence with `Acquire`
//! before touching any slot. In the other direction the reader publishes the
//! commit sequence with `Release` only after it has finished reading, and the
//! writer loads it with `Acquire` before reusing a slot.

mod sample;

pub use sample::{Sample, Tenths};

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror_no_std::Error;

/// Errors reported by the sample ring and its handles
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("Sample ring is full, newest sample dropped")]
    Overflow,
    #[error("Commit to sequence {requested} is outside the pending window of {pending} samples")]
    CommitOutOfRange { requested: usize, pending: usize },
    #[error("Window no longer starts at the commit sequence")]
    StaleWindow,
    #[error("Sample ring has already been split into writer and reader")]
    AlreadySplit,
}

/// Bounded circular log of [`Sample`]s
///
/// Allocated once with a compile-time capacity and shared by reference;
/// it is never resized. Typically placed in a `static`:
///
/// ```rust,ignore
/// static RING: SampleRing<1024> = SampleRing::new();
///
/// let (writer, reader) = RING.split()?;
/// ```
pub struct SampleRing<const N: usize> {
    slots: [UnsafeCell<Sample>; N],
    /// Next sequence the writer will populate
    write_seq: AtomicUsize,
    /// Oldest sequence not yet confirmed delivered
    commit_seq: AtomicUsize,
    split: AtomicBool,
}

// SAFETY: slots are only written by the single `RingWriter` at sequences outside
// `[commit, write)` and only read by the single `RingReader` inside that range.
// Sequence hand-over uses Release/Acquire, so a slot is never read and written
// concurrently.
unsafe impl<const N: usize> Sync for SampleRing<N> {}

impl<const N: usize> SampleRing<N> {
    /// Create an empty ring.
    ///
    /// # Panics
    /// Panics (at compile time in a `static`) if `N == 0`.
    pub const fn new() -> Self {
        assert!(N > 0, "SampleRing capacity must be non-zero");
        Self {
            slots: [const { UnsafeCell::new(Sample::EMPTY) }; N],
            write_seq: AtomicUsize::new(0),
            commit_seq: AtomicUsize::new(0),
            split: AtomicBool::new(false),
        }
    }

    /// Hand out the producer and consumer handles. Succeeds only once.
    pub fn split(&self) -> Result<(RingWriter<'_, N>, RingReader<'_, N>), RingError> {
        if self.split.swap(true, Ordering::AcqRel) {
            return Err(RingError::AlreadySplit);
        }
        Ok((RingWriter { ring: self }, RingReader { ring: self }))
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of samples captured but not yet committed.
    ///
    /// Safe to call from any context; the value may be stale by the time it
    /// is used.
    pub fn pending(&self) -> usize {
        // Commit first: it never passes write, so the difference cannot go negative.
        let commit = self.commit_seq.load(Ordering::Acquire);
        let write = self.write_seq.load(Ordering::Acquire);
        write.wrapping_sub(commit).min(N)
    }

    /// Total number of samples ever accepted into the ring.
    pub fn total_captured(&self) -> usize {
        self.write_seq.load(Ordering::Relaxed)
    }

    fn slot(&self, seq: usize) -> &UnsafeCell<Sample> {
        &self.slots[seq % N]
    }
}

impl<const N: usize> Default for SampleRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer handle, owned by the sampler task
pub struct RingWriter<'a, const N: usize> {
    ring: &'a SampleRing<N>,
}

impl<const N: usize> RingWriter<'_, N> {
    /// Append a sample at the write sequence.
    ///
    /// Returns [`RingError::Overflow`] without touching the ring when `N`
    /// samples are already pending. Never blocks on the reader.
    pub fn push(&mut self, sample: Sample) -> Result<(), RingError> {
        let write = self.ring.write_seq.load(Ordering::Relaxed);
        let commit = self.ring.commit_seq.load(Ordering::Acquire);

        if write.wrapping_sub(commit) >= N {
            return Err(RingError::Overflow);
        }

        // SAFETY: `write` is outside `[commit, write)`, so the reader is not
        // reading this slot, and `&mut self` makes this the only writer.
        unsafe {
            *self.ring.slot(write).get() = sample;
        }

        self.ring
            .write_seq
            .store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.ring.pending()
    }
}

/// Consumer handle, owned by the uploader task
pub struct RingReader<'a, const N: usize> {
    ring: &'a SampleRing<N>,
}

impl<const N: usize> RingReader<'_, N> {
    /// Snapshot of the unconfirmed range `[commit, write)`.
    ///
    /// The write sequence is read once; samples pushed afterwards are simply
    /// not part of this window.
    pub fn peek_window(&self) -> Window {
        let start = self.ring.commit_seq.load(Ordering::Relaxed);
        let end = self.ring.write_seq.load(Ordering::Acquire);
        Window { start, end }
    }

    /// Copy the samples of `window` out of the ring, oldest first.
    ///
    /// The window must still start at the commit sequence; a window taken
    /// before a later commit is rejected with [`RingError::StaleWindow`].
    pub fn samples(&self, window: Window) -> Result<WindowSamples<'_, N>, RingError> {
        if window.start != self.ring.commit_seq.load(Ordering::Relaxed) {
            return Err(RingError::StaleWindow);
        }
        Ok(WindowSamples {
            ring: self.ring,
            next: window.start,
            end: window.end,
        })
    }

    /// Advance the commit sequence to `up_to`, releasing every sample before it.
    ///
    /// Returns how many samples were released. Committing the current commit
    /// sequence again is a no-op returning `0`. Sequences behind the commit
    /// sequence or past the write sequence are rejected.
    pub fn commit(&mut self, up_to: usize) -> Result<usize, RingError> {
        let commit = self.ring.commit_seq.load(Ordering::Relaxed);
        let write = self.ring.write_seq.load(Ordering::Acquire);

        let pending = write.wrapping_sub(commit);
        let advance = up_to.wrapping_sub(commit);
        if advance > pending {
            return Err(RingError::CommitOutOfRange {
                requested: up_to,
                pending,
            });
        }
        if advance > 0 {
            self.ring.commit_seq.store(up_to, Ordering::Release);
        }
        Ok(advance)
    }

    pub fn pending(&self) -> usize {
        self.ring.pending()
    }
}

/// Contiguous range of sequences between the commit and write sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    start: usize,
    end: usize,
}

impl Window {
    /// First sequence in the window (the commit sequence when taken).
    pub const fn start(&self) -> usize {
        self.start
    }

    /// One past the last sequence in the window.
    pub const fn end(&self) -> usize {
        self.end
    }

    pub const fn len(&self) -> usize {
        self.end.wrapping_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Keep only the oldest `max` samples of this window.
    pub const fn truncated(self, max: usize) -> Self {
        if self.len() <= max {
            self
        } else {
            Self {
                start: self.start,
                end: self.start.wrapping_add(max),
            }
        }
    }
}

/// Iterator over copies of the samples in a [`Window`]
pub struct WindowSamples<'a, const N: usize> {
    ring: &'a SampleRing<N>,
    next: usize,
    end: usize,
}

impl<const N: usize> Iterator for WindowSamples<'_, N> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.next == self.end {
            return None;
        }
        // SAFETY: `next` lies in `[commit, write)` as validated by
        // `RingReader::samples`; the commit sequence cannot move while this
        // iterator borrows the reader, so the writer will not reuse the slot.
        let sample = unsafe { *self.ring.slot(self.next).get() };
        self.next = self.next.wrapping_add(1);
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.wrapping_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl<const N: usize> ExactSizeIterator for WindowSamples<'_, N> {}
