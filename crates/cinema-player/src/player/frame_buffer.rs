//! Reallocatable picture memory shared with the decoder thread.
//!
//! The decoder writes through a raw address, so the bytes live in a [`Slab`]
//! whose address never moves for the slab's whole life. Resizing builds the new
//! slab first, swaps it in under the lock, and releases the old one only after
//! the swap. Anyone holding a lease (an `Arc<Slab>`) keeps that slab alive even
//! if the buffer has since been reallocated or freed, so a decoder mid-write or
//! a render-side copy never sees its memory disappear.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Output pixels are always 4 bytes (R, G, B, A).
pub const BYTES_PER_PIXEL: usize = 4;

/// One fixed-size, heap-pinned block of picture memory.
///
/// The bytes are only ever touched through raw pointers, never through Rust
/// references. With a single slab the decoder may start the next picture while
/// the render thread is still copying the previous one out (`ReadyWriting`).
/// That overlap is an unsynchronized concurrent access to the same bytes and
/// can tear the copied picture. It is a known limitation of the single-buffer
/// contract; engines that lock only after the previous picture was drained
/// never hit it.
pub struct Slab {
    ptr: NonNull<u8>,
    len: usize,
    generation: u64,
}

// SAFETY: the slab exclusively owns its allocation and never hands out Rust
// references to the bytes, only raw pointers, so moving or sharing the handle
// across threads cannot create aliasing references.
unsafe impl Send for Slab {}
// SAFETY: see `Send` above; all shared access goes through raw-pointer copies.
unsafe impl Sync for Slab {}

impl Slab {
    fn zeroed(len: usize, generation: u64) -> Self {
        let raw = Box::into_raw(vec![0u8; len].into_boxed_slice());
        // SAFETY: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw.cast::<u8>()) };
        Self {
            ptr,
            len,
            generation,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stable start address handed to the decoder.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Which allocation of its [`FrameBuffer`] this slab came from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    /// Returns false without copying if the range falls outside the slab.
    fn read_into(&self, offset: usize, dst: &mut [u8]) -> bool {
        let Some(end) = offset.checked_add(dst.len()) else {
            return false;
        };
        if end > self.len {
            return false;
        }
        // SAFETY: `offset..end` lies inside the allocation (checked above) and
        // `dst` is a distinct Rust-owned buffer, so the ranges cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        true
    }

    /// Copy the picture in this slab into a tightly packed `dest` of
    /// `dest_width * dest_height * 4` bytes, dropping the source row pitch.
    ///
    /// Returns false (and copies nothing) when either side is too small for
    /// the requested geometry.
    pub fn copy_with_pitch(
        &self,
        dest: &mut [u8],
        dest_width: u32,
        dest_height: u32,
        source_width: u32,
        source_height: u32,
        source_pitch: u32,
    ) -> bool {
        let Some(plan) = plan_copy(
            self.len,
            dest.len(),
            dest_width as usize,
            dest_height as usize,
            source_width as usize,
            source_height as usize,
            source_pitch as usize,
        ) else {
            log::trace!(
                "Skipping copy: source {source_width}x{source_height} pitch {source_pitch} \
                 ({} bytes) vs destination {dest_width}x{dest_height} ({} bytes)",
                self.len,
                dest.len()
            );
            return false;
        };

        match plan {
            CopyPlan::Bulk { bytes } => self.read_into(0, &mut dest[..bytes]),
            CopyPlan::Rows {
                rows,
                row_bytes,
                src_stride,
                dst_stride,
            } => (0..rows).all(|row| {
                let dst_start = row * dst_stride;
                self.read_into(row * src_stride, &mut dest[dst_start..dst_start + row_bytes])
            }),
        }
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        let raw = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: `raw` is exactly the pointer/length pair produced by
        // `Box::into_raw` in `zeroed`, and drop runs once.
        drop(unsafe { Box::from_raw(raw) });
    }
}

/// Owner of the current picture slab.
///
/// Every operation that swaps or exposes the slab goes through one mutex, and
/// the critical sections only move `Arc`s: allocation and copying happen
/// outside the lock so the decoder's lock callback never waits on them.
#[derive(Default)]
pub struct FrameBuffer {
    slab: Mutex<Option<Arc<Slab>>>,
    allocations: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slab(&self) -> MutexGuard<'_, Option<Arc<Slab>>> {
        self.slab.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the slab with a zeroed one of `size` bytes and return its
    /// generation, or `None` when `size` is zero.
    ///
    /// The new slab is fully allocated before the old one is released, so the
    /// exposed address never passes through the "not ready" state.
    pub fn allocate(&self, size: usize) -> Option<u64> {
        if size == 0 {
            log::warn!("Frame buffer allocate called with invalid size: {size}");
            return None;
        }

        let generation = self.allocations.fetch_add(1, Ordering::AcqRel) + 1;
        let slab = Arc::new(Slab::zeroed(size, generation));
        log::debug!(
            "Frame buffer allocated: {size} bytes at {:p} (generation {generation})",
            slab.as_ptr()
        );
        let previous = self.slab().replace(slab);
        // Old slab goes away after the swap, or later if still leased.
        drop(previous);
        Some(generation)
    }

    /// Release the slab and reset the exposed address to the sentinel.
    /// Safe to call repeatedly.
    pub fn free(&self) {
        let previous = self.slab().take();
        if previous.is_some() {
            log::debug!("Frame buffer freed");
        }
    }

    /// Current decoder-facing address, or `None` when not ready.
    pub fn address(&self) -> Option<NonNull<u8>> {
        self.slab().as_ref().map(|s| s.as_ptr())
    }

    /// Borrow the current slab, keeping it alive for as long as the lease is held.
    pub fn lease(&self) -> Option<Arc<Slab>> {
        self.slab().clone()
    }

    pub fn capacity(&self) -> usize {
        self.slab().as_ref().map_or(0, |s| s.len())
    }

    pub fn is_allocated(&self) -> bool {
        self.slab().is_some()
    }

    /// Number of successful allocations so far.
    pub fn generation(&self) -> u64 {
        self.allocations.load(Ordering::Acquire)
    }

    /// Copy the current picture into a tightly packed `dest`; see
    /// [`Slab::copy_with_pitch`]. Also false when the buffer is not allocated.
    /// Mismatches are expected while a resize is in flight.
    pub fn copy_with_pitch(
        &self,
        dest: &mut [u8],
        dest_width: u32,
        dest_height: u32,
        source_width: u32,
        source_height: u32,
        source_pitch: u32,
    ) -> bool {
        self.lease().is_some_and(|slab| {
            slab.copy_with_pitch(
                dest,
                dest_width,
                dest_height,
                source_width,
                source_height,
                source_pitch,
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyPlan {
    /// Pitch matches the packed row size: one contiguous copy.
    Bulk { bytes: usize },
    /// Row-by-row copy stripping the source padding.
    Rows {
        rows: usize,
        row_bytes: usize,
        src_stride: usize,
        dst_stride: usize,
    },
}

/// Work out how to copy, or `None` if either side is too small.
fn plan_copy(
    src_len: usize,
    dst_len: usize,
    dst_width: usize,
    dst_height: usize,
    src_width: usize,
    src_height: usize,
    src_pitch: usize,
) -> Option<CopyPlan> {
    let dst_row = dst_width.checked_mul(BYTES_PER_PIXEL)?;
    let rows = dst_height.min(src_height);
    if rows == 0 || dst_row == 0 {
        return None;
    }

    if src_pitch == dst_row {
        let bytes = rows.checked_mul(dst_row)?;
        return (bytes <= src_len && bytes <= dst_len).then_some(CopyPlan::Bulk { bytes });
    }

    let row_bytes = dst_width.min(src_width).checked_mul(BYTES_PER_PIXEL)?;
    let src_needed = rows.checked_mul(src_pitch)?;
    let dst_needed = rows.checked_mul(dst_row)?;
    if row_bytes == 0 || row_bytes > src_pitch || src_needed > src_len || dst_needed > dst_len {
        return None;
    }

    Some(CopyPlan::Rows {
        rows,
        row_bytes,
        src_stride: src_pitch,
        dst_stride: dst_row,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fill the current slab with `f(offset)` through the decoder-facing address.
    fn fill(buffer: &FrameBuffer, f: impl Fn(usize) -> u8) {
        let slab = buffer.lease().unwrap();
        for i in 0..slab.len() {
            // SAFETY: `i < len` and the lease keeps the slab alive.
            unsafe { slab.as_ptr().as_ptr().add(i).write(f(i)) };
        }
    }

    #[test]
    fn new_buffer_is_not_ready() {
        let b = FrameBuffer::new();
        assert!(b.address().is_none());
        assert!(!b.is_allocated());
        assert_eq!(b.capacity(), 0);
    }

    #[test]
    fn allocate_zero_is_noop() {
        let b = FrameBuffer::new();
        b.allocate(0);
        assert!(b.address().is_none());
        assert_eq!(b.generation(), 0);

        b.allocate(16);
        let addr = b.address();
        b.allocate(0);
        assert_eq!(b.address(), addr);
        assert_eq!(b.capacity(), 16);
    }

    #[test]
    fn allocate_replaces_and_old_lease_stays_readable() {
        let b = FrameBuffer::new();
        b.allocate(8);
        fill(&b, |_| 7);
        let old = b.lease().unwrap();

        b.allocate(32);
        assert!(b.address().is_some());
        assert_ne!(b.address().unwrap(), old.as_ptr());
        assert_eq!(b.capacity(), 32);
        assert_eq!(b.generation(), 2);
        assert_eq!(old.generation(), 1);
        assert_eq!(b.lease().unwrap().generation(), 2);

        let mut out = [0u8; 8];
        assert!(old.read_into(0, &mut out));
        assert_eq!(out, [7u8; 8]);
    }

    #[test]
    fn allocate_reports_generation() {
        let b = FrameBuffer::new();
        assert_eq!(b.allocate(0), None);
        assert_eq!(b.allocate(8), Some(1));
        assert_eq!(b.allocate(8), Some(2));
        assert_eq!(b.allocate(0), None);
        assert_eq!(b.generation(), 2);
    }

    #[test]
    fn leased_slab_copies_its_own_picture() {
        let b = FrameBuffer::new();
        b.allocate(2 * 2 * 4);
        fill(&b, |_| 5);
        let old = b.lease().unwrap();
        b.allocate(4 * 4 * 4);

        let mut dest = vec![0u8; 16];
        assert!(old.copy_with_pitch(&mut dest, 2, 2, 2, 2, 8));
        assert!(dest.iter().all(|&v| v == 5));
        // The current slab is the new, still blank one.
        assert!(b.copy_with_pitch(&mut dest, 2, 2, 2, 2, 8));
        assert!(dest.iter().all(|&v| v == 0));
    }

    #[test]
    fn address_never_null_across_reallocations() {
        let b = Arc::new(FrameBuffer::new());
        b.allocate(64);
        let reader = {
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    assert!(b.address().is_some());
                }
            })
        };
        for i in 1..500 {
            b.allocate(64 + i);
        }
        reader.join().unwrap();
    }

    #[test]
    fn free_is_idempotent() {
        let b = FrameBuffer::new();
        b.allocate(16);
        b.free();
        assert!(b.address().is_none());
        b.free();
        assert!(b.address().is_none());
        assert!(!b.is_allocated());
    }

    #[test]
    fn copy_fast_path_when_pitch_is_packed() {
        let b = FrameBuffer::new();
        b.allocate(2 * 2 * 4);
        fill(&b, |i| i as u8);
        let mut dest = vec![0u8; 16];
        assert!(b.copy_with_pitch(&mut dest, 2, 2, 2, 2, 8));
        assert_eq!(dest, (0..16).collect::<Vec<u8>>());
    }

    #[test]
    fn copy_strips_row_padding() {
        // 2x2 picture with a 12-byte pitch (4 bytes of padding per row).
        let b = FrameBuffer::new();
        b.allocate(12 * 2);
        fill(&b, |i| if i % 12 >= 8 { 0xEE } else { i as u8 });
        let mut dest = vec![0u8; 16];
        assert!(b.copy_with_pitch(&mut dest, 2, 2, 2, 2, 12));
        assert_eq!(&dest[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(&dest[8..], &[12, 13, 14, 15, 16, 17, 18, 19]);
        assert!(!dest.contains(&0xEE));
    }

    #[test]
    fn copy_clips_to_smaller_destination() {
        let b = FrameBuffer::new();
        b.allocate(4 * 4 * 4);
        fill(&b, |i| (i / 16) as u8 + 1);
        // 2x2 destination out of a 4x4 source: first two pixels of first two rows.
        let mut dest = vec![0u8; 16];
        assert!(b.copy_with_pitch(&mut dest, 2, 2, 4, 4, 16));
        assert_eq!(&dest[..8], &[1u8; 8]);
        assert_eq!(&dest[8..], &[2u8; 8]);
    }

    #[test]
    fn copy_skips_when_source_too_small() {
        let b = FrameBuffer::new();
        b.allocate(640 * 360 * 4);
        let mut dest = vec![0xAAu8; 1280 * 720 * 4];
        assert!(!b.copy_with_pitch(&mut dest, 1280, 720, 1280, 720, 1280 * 4));
        assert!(dest.iter().all(|&v| v == 0xAA));
    }

    #[test]
    fn copy_skips_when_destination_too_small() {
        let b = FrameBuffer::new();
        b.allocate(64);
        let mut dest = vec![0u8; 8];
        assert!(!b.copy_with_pitch(&mut dest, 2, 2, 2, 2, 8));
        assert!(!b.copy_with_pitch(&mut dest, 2, 2, 2, 2, 16));
    }

    #[test]
    fn copy_without_allocation_is_noop() {
        let b = FrameBuffer::new();
        let mut dest = vec![0u8; 16];
        assert!(!b.copy_with_pitch(&mut dest, 2, 2, 2, 2, 8));
    }

    #[test]
    fn plan_never_exceeds_either_side() {
        let dims = [0usize, 1, 2, 3, 7, 16];
        let pitches = [0usize, 4, 8, 12, 28, 64, 65];
        let lens = [0usize, 16, 48, 100, 1024];
        for &dw in &dims {
            for &dh in &dims {
                for &sw in &dims {
                    for &sh in &dims {
                        for &pitch in &pitches {
                            for &src_len in &lens {
                                for &dst_len in &lens {
                                    match plan_copy(src_len, dst_len, dw, dh, sw, sh, pitch) {
                                        None => {}
                                        Some(CopyPlan::Bulk { bytes }) => {
                                            assert!(bytes <= src_len && bytes <= dst_len);
                                        }
                                        Some(CopyPlan::Rows {
                                            rows,
                                            row_bytes,
                                            src_stride,
                                            dst_stride,
                                        }) => {
                                            let last = rows - 1;
                                            assert!(last * src_stride + row_bytes <= src_len);
                                            assert!(last * dst_stride + row_bytes <= dst_len);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
