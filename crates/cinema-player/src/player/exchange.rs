//! Lock/display handshake between the decoder thread and the render loop.
//!
//! Signalling state is a single packed atomic so "dirty" and "lock failed"
//! can never be observed in an impossible combination, and draining the
//! dirty signal is one compare-and-swap.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::frame_buffer::{FrameBuffer, Slab};

/// Where the exchange stands for the current picture.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing pending.
    Idle = 0,
    /// Decoder holds a valid destination and is writing.
    Writing = 1,
    /// A complete picture is waiting for the render side.
    Ready = 2,
    /// A complete picture is waiting and the decoder is already writing the next one.
    ReadyWriting = 3,
    /// The last lock found no destination; the matching display is ignored.
    LockFailed = 4,
}

impl ExchangeState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Writing,
            2 => Self::Ready,
            3 => Self::ReadyWriting,
            4 => Self::LockFailed,
            _ => Self::Idle,
        }
    }

    fn on_lock(self, acquired: bool) -> Self {
        if !acquired {
            // A picture pending in a buffer that is gone is not worth presenting.
            return Self::LockFailed;
        }
        match self {
            Self::Ready | Self::ReadyWriting => Self::ReadyWriting,
            Self::Idle | Self::Writing | Self::LockFailed => Self::Writing,
        }
    }

    fn on_display(self) -> Self {
        match self {
            Self::Writing | Self::ReadyWriting => Self::Ready,
            other => other,
        }
    }

    fn on_drain(self) -> Self {
        match self {
            Self::Ready => Self::Idle,
            Self::ReadyWriting => Self::Writing,
            other => other,
        }
    }

    /// A fully written picture is waiting.
    pub fn is_dirty(self) -> bool {
        matches!(self, Self::Ready | Self::ReadyWriting)
    }

    pub fn lock_failed(self) -> bool {
        self == Self::LockFailed
    }
}

/// Decoder-side write handshake plus the render-side drain.
pub struct FrameExchange {
    buffer: Arc<FrameBuffer>,
    state: AtomicU8,
    /// Slab handed out by the last successful lock, held until display.
    lease: Mutex<Option<Arc<Slab>>>,
    /// Slab holding the last displayed picture. Filled before the ready flag
    /// is raised, so a drained flag always finds the slab it refers to.
    ready: Mutex<Option<Arc<Slab>>>,
}

impl FrameExchange {
    pub fn new(buffer: Arc<FrameBuffer>) -> Self {
        Self {
            buffer,
            state: AtomicU8::new(ExchangeState::Idle as u8),
            lease: Mutex::new(None),
            ready: Mutex::new(None),
        }
    }

    fn lease(&self) -> MutexGuard<'_, Option<Arc<Slab>>> {
        self.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ready(&self) -> MutexGuard<'_, Option<Arc<Slab>>> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, step: impl Fn(ExchangeState) -> ExchangeState) -> ExchangeState {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(step(ExchangeState::from_raw(raw)) as u8)
            });
        match previous {
            Ok(raw) | Err(raw) => ExchangeState::from_raw(raw),
        }
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    /// Decoder asks where to write the next picture.
    ///
    /// Returns the current buffer address, or `None` (the sentinel) when no
    /// buffer is allocated. The slab stays alive until the matching display,
    /// even if the buffer is reallocated or freed meanwhile.
    pub fn lock(&self) -> Option<NonNull<u8>> {
        let Some(slab) = self.buffer.lease() else {
            let stale = (self.lease().take(), self.ready().take());
            drop(stale);
            self.transition(|s| s.on_lock(false));
            log::debug!("Frame lock failed: buffer not ready");
            return None;
        };

        let ptr = slab.as_ptr();
        let previous = self.lease().replace(slab);
        self.transition(|s| s.on_lock(true));
        drop(previous);
        Some(ptr)
    }

    /// Decoder reports the picture it was given is complete.
    /// Ignored unless the preceding lock succeeded.
    pub fn display(&self) {
        // Only a successful lock leaves a lease behind.
        let written = self.lease().take();
        if let Some(written) = written {
            let previous = self.ready().replace(written);
            drop(previous);
        }
        let previous = self.transition(ExchangeState::on_display);
        if previous.lock_failed() {
            log::trace!("Display ignored: preceding lock failed");
        }
    }

    /// Read and clear the dirty signal in one step. Render thread only,
    /// at most once per tick.
    ///
    /// Returns the slab the pending picture was written into, which may no
    /// longer be the buffer's current one.
    pub fn take_ready(&self) -> Option<Arc<Slab>> {
        if self.transition(ExchangeState::on_drain).is_dirty() {
            self.ready().clone()
        } else {
            None
        }
    }

    /// Drop a pending picture without presenting it (used on geometry changes).
    pub fn discard_pending(&self) {
        self.transition(ExchangeState::on_drain);
        let discarded = self.ready().take();
        drop(discarded);
    }

    pub fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    pub fn lock_failed(&self) -> bool {
        self.state().lock_failed()
    }

    pub fn state(&self) -> ExchangeState {
        ExchangeState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Forget all signalling state and release every slab the exchange holds.
    /// Call only once the engine has stopped; a late display is ignored.
    pub fn reset(&self) {
        self.state.store(ExchangeState::Idle as u8, Ordering::Release);
        let lease = self.lease().take();
        let ready = self.ready().take();
        drop((lease, ready));
    }
}
