//! Splits a firmware image into writes that fit the link MTU.

use std::slice::Chunks;

use super::error::{DfuError, DfuResult};

/// Sequential, MTU-sized views into a firmware image.
///
/// A clone resumes from the same position; call [`firmware_chunks`] again to
/// walk the image from offset 0.
#[derive(Debug, Clone)]
pub struct FirmwareChunks<'a> {
    inner: Chunks<'a, u8>,
}

/// Split `image` into chunks of `max_payload` bytes; the last may be shorter.
pub fn firmware_chunks(image: &[u8], max_payload: usize) -> DfuResult<FirmwareChunks<'_>> {
    if max_payload == 0 {
        return Err(DfuError::InvalidSettings {
            reason: "chunk payload size must be at least 1 byte".into(),
        });
    }
    Ok(FirmwareChunks {
        inner: image.chunks(max_payload),
    })
}

/// Number of writes needed for `len` bytes at `max_payload` bytes each.
pub fn chunk_count(len: usize, max_payload: usize) -> usize {
    if max_payload == 0 {
        return 0;
    }
    len.div_ceil(max_payload)
}

impl<'a> Iterator for FirmwareChunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for FirmwareChunks<'_> {}
