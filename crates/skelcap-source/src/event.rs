use crate::{Result, SkeletonSample, Timestamp};

/// One sensor callback.
///
/// Every slice is borrowed from the device layer and only lives for the
/// duration of the call; handlers copy what they keep.
#[derive(Debug, Clone, Copy)]
pub enum SourceEvent<'a> {
    Skeleton(&'a SkeletonSample),
    /// Raw YUY2 color buffer.
    Color { timestamp: Timestamp, data: &'a [u8] },
    /// 16-bit depth plane (millimeters) plus the 1-byte body-index mask.
    DepthAndMask {
        timestamp: Timestamp,
        depth: &'a [u16],
        mask: &'a [u8],
    },
}

impl SourceEvent<'_> {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            SourceEvent::Skeleton(s) => s.timestamp,
            SourceEvent::Color { timestamp, .. } => *timestamp,
            SourceEvent::DepthAndMask { timestamp, .. } => *timestamp,
        }
    }
}

/// Anything that produces sensor events on the calling thread.
pub trait FrameSource {
    /// Acquire the latest multi-source frame and hand each of its parts to
    /// `emit`.  Returns `Ok(false)` once the source is exhausted.
    fn poll(&mut self, emit: &mut dyn FnMut(SourceEvent<'_>)) -> Result<bool>;
}
