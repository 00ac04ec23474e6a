use std::ptr::NonNull;
use std::sync::Arc;

use super::exchange::FrameExchange;
use super::format::{FormatNegotiator, NegotiatedFormat};
use crate::engine::DecoderCallbacks;

/// The controller's side of the decoder callback contract.
///
/// Holds nothing but handles to the shared buffer state, so it can be cloned
/// into any engine thread.
#[derive(Clone)]
pub struct FrameCallbacks {
    format: Arc<FormatNegotiator>,
    exchange: Arc<FrameExchange>,
}

impl FrameCallbacks {
    pub fn new(format: Arc<FormatNegotiator>, exchange: Arc<FrameExchange>) -> Self {
        Self { format, exchange }
    }
}

impl DecoderCallbacks for FrameCallbacks {
    fn negotiate_format(&self, width: u32, height: u32) -> NegotiatedFormat {
        // A picture written at the old geometry must not be shown at the new
        // one, so it goes before the buffer is swapped.
        self.exchange.discard_pending();
        self.format.negotiate(width, height)
    }

    fn lock(&self) -> Option<NonNull<u8>> {
        self.exchange.lock()
    }

    fn display(&self) {
        self.exchange.display();
    }
}
