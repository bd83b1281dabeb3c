//! Command dispatch for decoded uplink frames.
//!
//! Each command maps to one handler through [`handler_for`]; the table is
//! the only place that decides what a command does.

use crate::capacity::{CapacityPlanner, Direction};
use crate::error::{Result, TunnelError};
use crate::fragment::{Fragmenter, Reassembler};
use crate::frame::{Command, TunnelFrame};
use crate::session::{SessionId, SessionStore};
use std::sync::Arc;

/// Application logic behind the tunnel: one request payload in, one
/// response payload out. Runs synchronously on the datagram path.
pub trait PayloadHandler: Send + Sync {
    fn handle(&self, session_id: SessionId, request: Vec<u8>) -> Result<Vec<u8>>;
}

/// Returns every request unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl PayloadHandler for EchoHandler {
    fn handle(&self, _session_id: SessionId, request: Vec<u8>) -> Result<Vec<u8>> {
        Ok(request)
    }
}

impl<F> PayloadHandler for F
where
    F: Fn(SessionId, Vec<u8>) -> Result<Vec<u8>> + Send + Sync,
{
    fn handle(&self, session_id: SessionId, request: Vec<u8>) -> Result<Vec<u8>> {
        self(session_id, request)
    }
}

/// Handler signature: the frame goes in, the downlink frame to answer with
/// (if any) comes out.
pub type CommandHandler<H> = fn(&Dispatcher<H>, TunnelFrame) -> Result<Option<TunnelFrame>>;

/// The command table
pub fn handler_for<H: PayloadHandler>(command: Command) -> CommandHandler<H> {
    match command {
        Command::SendMore | Command::SendLast => handle_uplink::<H>,
        Command::Retrieve => handle_retrieve::<H>,
    }
}

/// Everything a command handler may touch
pub struct Dispatcher<H> {
    sessions: Arc<SessionStore>,
    reassembler: Reassembler,
    fragmenter: Fragmenter,
    handler: H,
}

impl<H: PayloadHandler> Dispatcher<H> {
    pub fn new(planner: Arc<CapacityPlanner>, sessions: Arc<SessionStore>, handler: H) -> Self {
        Self {
            sessions,
            reassembler: Reassembler::for_direction(&planner, Direction::Uplink),
            fragmenter: Fragmenter::new(planner),
            handler,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn dispatch(&self, frame: TunnelFrame) -> Result<Option<TunnelFrame>> {
        log::debug!(
            "Frame {} seq {} for session {:#04x} ({} bytes)",
            frame.command,
            frame.sequence_number,
            frame.session_id,
            frame.payload.len()
        );
        handler_for::<H>(frame.command)(self, frame)
    }
}

// SEND_MORE / SEND_LAST: absorb the chunk, run the application once the
// payload is whole and queue its answer for retrieval.
fn handle_uplink<H: PayloadHandler>(
    dispatcher: &Dispatcher<H>,
    frame: TunnelFrame,
) -> Result<Option<TunnelFrame>> {
    let session_id = frame.session_id;
    let request = match dispatcher.reassembler.reassemble(&dispatcher.sessions, frame)? {
        Some(request) => request,
        None => return Ok(None),
    };

    let response = match dispatcher.handler.handle(session_id, request) {
        Ok(response) => response,
        Err(e) => {
            // keep the payload so a resent final frame retries the handler
            dispatcher.sessions.reopen(session_id);
            return Err(e);
        }
    };
    let frames = dispatcher
        .fragmenter
        .fragment(Direction::Downlink, session_id, &response)?;

    log::debug!(
        "Session {:#04x} queued {} response bytes in {} frames",
        session_id,
        response.len(),
        frames.len()
    );
    dispatcher.sessions.queue_downlink(session_id, frames);

    Ok(None)
}

// RETRIEVE: hand back the queued downlink frame, or nothing yet.
fn handle_retrieve<H: PayloadHandler>(
    dispatcher: &Dispatcher<H>,
    frame: TunnelFrame,
) -> Result<Option<TunnelFrame>> {
    dispatcher
        .sessions
        .downlink_frame(frame.session_id, frame.sequence_number)
        .ok_or(TunnelError::UnknownSession(frame.session_id))
}
