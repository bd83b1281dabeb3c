//! Payload fragmentation and reassembly.
//!
//! A payload is cut into chunks of exactly `capacity` bytes (the last one may
//! be shorter), so chunk `n` always starts at byte `n * capacity`. That lets
//! the receiver place chunks in any order and recognize duplicates without
//! extra bookkeeping on the wire.

use crate::capacity::{CapacityPlanner, Direction};
use crate::error::{Result, TunnelError};
use crate::frame::{Command, TunnelFrame};
use crate::session::{Session, SessionId, SessionStore};
use std::sync::Arc;

/// Sequence numbers are one byte
pub const MAX_FRAMES: usize = u8::MAX as usize + 1;

/// Split `payload` into frames of at most `capacity` bytes.
pub fn fragment(session_id: SessionId, payload: &[u8], capacity: usize) -> Result<Vec<TunnelFrame>> {
    if capacity == 0 {
        return Err(TunnelError::CapacityExceeded {
            size: payload.len(),
            capacity,
        });
    }

    if payload.is_empty() {
        return Ok(vec![TunnelFrame::new(
            session_id,
            Command::SendLast,
            0,
            Vec::new(),
        )]);
    }

    let count = (payload.len() + capacity - 1) / capacity;
    if count > MAX_FRAMES {
        return Err(TunnelError::CapacityExceeded {
            size: payload.len(),
            capacity: capacity * MAX_FRAMES,
        });
    }

    let frames = payload
        .chunks(capacity)
        .enumerate()
        .map(|(index, chunk)| {
            let command = if index + 1 == count {
                Command::SendLast
            } else {
                Command::SendMore
            };
            TunnelFrame::new(session_id, command, index as u8, chunk.to_vec())
        })
        .collect();

    Ok(frames)
}

/// Fragments payloads using the planner's per-direction capacity
#[derive(Debug, Clone)]
pub struct Fragmenter {
    planner: Arc<CapacityPlanner>,
}

impl Fragmenter {
    pub fn new(planner: Arc<CapacityPlanner>) -> Self {
        Self { planner }
    }

    pub fn fragment(
        &self,
        direction: Direction,
        session_id: SessionId,
        payload: &[u8],
    ) -> Result<Vec<TunnelFrame>> {
        fragment(session_id, payload, self.planner.capacity(direction))
    }

    /// Largest payload that fits in one session exchange
    pub fn max_payload(&self, direction: Direction) -> usize {
        self.planner.capacity(direction) * MAX_FRAMES
    }
}

/// Places incoming chunks into their session's buffer.
#[derive(Debug, Clone, Copy)]
pub struct Reassembler {
    chunk_capacity: usize,
}

impl Reassembler {
    pub fn new(chunk_capacity: usize) -> Self {
        Self { chunk_capacity }
    }

    pub fn for_direction(planner: &CapacityPlanner, direction: Direction) -> Self {
        Self::new(planner.capacity(direction))
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Absorb `frame`; returns the whole payload once every chunk is in.
    pub fn reassemble(&self, store: &SessionStore, frame: TunnelFrame) -> Result<Option<Vec<u8>>> {
        if frame.command == Command::Retrieve {
            return Ok(None);
        }
        self.check_chunk(&frame)?;

        let offset = frame.sequence_number as usize * self.chunk_capacity;
        Ok(store.with_session(frame.session_id, |session| {
            Self::absorb(session, offset, &frame)
        }))
    }

    // append and mark_final under one lock so completion is observed once
    fn absorb(session: &mut Session, offset: usize, frame: &TunnelFrame) -> Option<Vec<u8>> {
        if session.is_replay(offset, &frame.payload, frame.is_last()) {
            log::debug!(
                "Session {:#04x} dropped resent chunk {} of a completed payload",
                session.id(),
                frame.sequence_number
            );
            return None;
        }

        session.append(offset, &frame.payload);
        if frame.is_last() {
            session.mark_final(offset + frame.payload.len());
        }

        let payload = session.take_buffer()?;
        log::debug!(
            "Session {:#04x} reassembled {} bytes",
            session.id(),
            payload.len()
        );
        Some(payload)
    }

    fn check_chunk(&self, frame: &TunnelFrame) -> Result<()> {
        let len = frame.payload.len();
        if len > self.chunk_capacity {
            return Err(TunnelError::CapacityExceeded {
                size: len,
                capacity: self.chunk_capacity,
            });
        }
        if frame.command == Command::SendMore && len != self.chunk_capacity {
            return Err(TunnelError::MalformedFrame(format!(
                "chunk {} of session {:#04x} is {} bytes, expected {}",
                frame.sequence_number, frame.session_id, len, self.chunk_capacity
            )));
        }
        Ok(())
    }
}
