// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The reusable outgoing-datagram buffer shared by a path's writer and its
//! retry loop.

use bytes::{Bytes, BytesMut};

/// Minimum capacity every packet buffer is grown to on first use.
const MINIMUM_CAPACITY: usize = 1500;

/// Why a packet buffer had to be reallocated, reported to telemetry so an
/// operator can see whether retries are thrashing the allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, displaydoc::Display)]
pub enum ReallocationReason {
    /// the incoming datagram exceeded the buffer's current capacity
    TooSmall,
    /// a previous packet was handed off to a recovery path and is still held elsewhere
    SharedElsewhere,
}

/// A ref-counted byte buffer for at most one in-flight outgoing datagram.
///
/// Held as a frozen [`Bytes`] between sets so `set` can cheaply detect
/// whether the previous packet is still referenced elsewhere (handed off to
/// a write-error recovery path): [`Bytes::try_into_mut`] only succeeds when
/// this is the sole owner, and only then is the buffer reused in place.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    buffer: Bytes,
}

impl Packet {
    pub fn new() -> Self {
        Self {
            buffer: Bytes::new(),
        }
    }

    /// Overwrites the packet's contents with `data`, in place when possible.
    /// Returns the reason a reallocation was needed, if one was.
    pub fn set(&mut self, data: &[u8]) -> Option<ReallocationReason> {
        let current = core::mem::take(&mut self.buffer);
        let (mut mutable, reason) = match current.try_into_mut() {
            Ok(mutable) if mutable.capacity() >= data.len() => (mutable, None),
            Ok(_) => (
                BytesMut::with_capacity(data.len().max(MINIMUM_CAPACITY)),
                Some(ReallocationReason::TooSmall),
            ),
            Err(_shared) => (
                BytesMut::with_capacity(data.len().max(MINIMUM_CAPACITY)),
                Some(ReallocationReason::SharedElsewhere),
            ),
        };
        mutable.clear();
        mutable.extend_from_slice(data);
        self.buffer = mutable.freeze();
        reason
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn bytes(&self) -> Bytes {
        self.buffer.clone()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
