//! Tunnel server
//!
//! [`TunnelServer`] turns one query datagram into one response datagram and
//! never blocks. [`DnsTunnelServer`] drives it from a datagram transport and
//! sweeps idle sessions in the background.

use crate::capacity::CapacityPlanner;
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, PayloadHandler};
use crate::dns::{Message, RCODE_FORMERR, RCODE_NXDOMAIN, RCODE_SERVFAIL};
use crate::error::{Result, TunnelError};
use crate::frame::FrameCodec;
use crate::session::SessionStore;
use crate::transport::DatagramTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

pub use crate::dispatch::EchoHandler;

/// Response code a rejected frame is answered with
pub fn rcode_for(error: &TunnelError) -> u8 {
    match error {
        TunnelError::MalformedFrame(_)
        | TunnelError::CapacityExceeded { .. }
        | TunnelError::Decoding(_)
        | TunnelError::TruncatedMessage { .. } => RCODE_FORMERR,
        TunnelError::UnknownSession(_) => RCODE_NXDOMAIN,
        _ => RCODE_SERVFAIL,
    }
}

/// Datagram-in, datagram-out core of the server
pub struct TunnelServer<H> {
    codec: FrameCodec,
    dispatcher: Dispatcher<H>,
}

impl<H: PayloadHandler> TunnelServer<H> {
    pub fn new(planner: Arc<CapacityPlanner>, handler: H) -> Self {
        let sessions = Arc::new(SessionStore::new());
        Self {
            codec: FrameCodec::new(planner.clone()),
            dispatcher: Dispatcher::new(planner, sessions, handler),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.dispatcher.sessions()
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Answer one query datagram.
    ///
    /// Fails only when the datagram is not a decodable DNS query; frame
    /// level problems are reported to the peer through the response code.
    pub fn handle_datagram(&self, datagram: &[u8]) -> Result<Vec<u8>> {
        let (query, _) = Message::decode(datagram, 0)?;
        if query.header().is_response() {
            return Err(TunnelError::Decoding("datagram is a response".into()));
        }

        let response = match self.answer(&query) {
            Ok(response) => response,
            Err(e) => {
                let rcode = rcode_for(&e);
                log::warn!("Rejecting query {:#06x}: {} (rcode {})", query.header().id, e, rcode);
                self.codec.error_response(&query, rcode)?
            }
        };

        response.encode()
    }

    /// Like [`handle_datagram`](Self::handle_datagram), dropping (and
    /// logging) datagrams that cannot be answered at all.
    pub fn respond(&self, datagram: &[u8]) -> Option<Vec<u8>> {
        match self.handle_datagram(datagram) {
            Ok(response) => Some(response),
            Err(e) => {
                log::warn!("Dropping {} byte datagram: {}", datagram.len(), e);
                None
            }
        }
    }

    fn answer(&self, query: &Message) -> Result<Message> {
        let frame = self.codec.from_query(query)?;
        let downlink = self.dispatcher.dispatch(frame)?;
        self.codec.to_response(query, downlink.as_ref())
    }
}

/// UDP DNS tunnel server
pub struct DnsTunnelServer<H> {
    core: Arc<TunnelServer<H>>,
    config: ServerConfig,
}

impl<H: PayloadHandler + 'static> DnsTunnelServer<H> {
    pub fn new(planner: Arc<CapacityPlanner>, handler: H, config: ServerConfig) -> Self {
        Self {
            core: Arc::new(TunnelServer::new(planner, handler)),
            config,
        }
    }

    pub fn core(&self) -> &Arc<TunnelServer<H>> {
        &self.core
    }

    /// Bind the configured UDP address and serve on it
    pub async fn listen(self) -> Result<()> {
        let socket = UdpSocket::bind(self.config.listen_addr).await?;
        log::info!("DNS tunnel server listening on {}", socket.local_addr()?);
        self.serve(socket).await
    }

    /// Answer datagrams from `transport` until it fails for good
    pub async fn serve<T: DatagramTransport + 'static>(self, transport: T) -> Result<()> {
        let sessions = self.core.sessions().clone();
        let cleanup = tokio::spawn(Self::cleanup_sessions(
            sessions,
            self.config.cleanup_interval,
            self.config.session_timeout,
        ));

        let result = self.receive_loop(&transport).await;
        cleanup.abort();
        result
    }

    async fn receive_loop<T: DatagramTransport>(&self, transport: &T) -> Result<()> {
        let mut consecutive_errors = 0u32;
        loop {
            let (datagram, peer) = match transport.recv_from().await {
                Ok(received) => {
                    consecutive_errors = 0;
                    received
                }
                Err(e) => {
                    log::error!("UDP recv_from error: {}", e);
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(e.into());
                    }
                    continue;
                }
            };

            if let Some(response) = self.core.respond(&datagram) {
                self.send_response(transport, &response, peer).await;
            }
        }
    }

    async fn send_response<T: DatagramTransport>(&self, transport: &T, response: &[u8], peer: SocketAddr) {
        if response.len() > transport.max_datagram_size() {
            log::warn!(
                "Response of {} bytes to {} exceeds transport limit {}",
                response.len(),
                peer,
                transport.max_datagram_size()
            );
        }
        if let Err(e) = transport.send_to(response, peer).await {
            log::error!("Error sending response to {}: {}", peer, e);
        }
    }

    async fn cleanup_sessions(sessions: Arc<SessionStore>, interval: Duration, timeout: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let expired = sessions.evict_idle(timeout);
            if !expired.is_empty() {
                log::debug!("{} sessions left after cleanup", sessions.len());
            }
        }
    }
}

const MAX_CONSECUTIVE_ERRORS: u32 = 16;
