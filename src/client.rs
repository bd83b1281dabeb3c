//! Tunnel client
//!
//! One [`exchange`](DnsTunnelClient::exchange) sends a request payload as a
//! run of TXT queries and collects the server's answer with retrieve queries.

use crate::capacity::{CapacityPlanner, Direction};
use crate::config::ClientConfig;
use crate::dns::{Message, RCODE_FORMERR, RCODE_NOERROR, RCODE_NXDOMAIN};
use crate::error::{Result, TunnelError};
use crate::fragment::{Fragmenter, Reassembler};
use crate::frame::{FrameCodec, TunnelFrame};
use crate::session::{SessionId, SessionStore};
use crate::transport::DatagramTransport;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// UDP DNS tunnel client
pub struct DnsTunnelClient<T> {
    transport: T,
    codec: FrameCodec,
    fragmenter: Fragmenter,
    downlink: Reassembler,
    sessions: SessionStore,
    config: ClientConfig,
}

impl DnsTunnelClient<UdpSocket> {
    /// Bind an ephemeral local socket for talking to `config.server_addr`
    pub async fn connect(planner: Arc<CapacityPlanner>, config: ClientConfig) -> Result<Self> {
        let local = if config.server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(local).await?;
        log::debug!(
            "DNS tunnel client bound to {} for {}",
            socket.local_addr()?,
            config.server_addr
        );
        Ok(Self::new(planner, config, socket))
    }
}

impl<T: DatagramTransport> DnsTunnelClient<T> {
    pub fn new(planner: Arc<CapacityPlanner>, config: ClientConfig, transport: T) -> Self {
        Self {
            transport,
            codec: FrameCodec::new(planner.clone()),
            downlink: Reassembler::for_direction(&planner, Direction::Downlink),
            fragmenter: Fragmenter::new(planner),
            sessions: SessionStore::new(),
            config,
        }
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Send `payload` under a fresh session id and return the response
    pub async fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let session_id: SessionId = rand::random();
        self.exchange_in(session_id, payload).await
    }

    /// Send `payload` in session `session_id` and return the response
    pub async fn exchange_in(&mut self, session_id: SessionId, payload: &[u8]) -> Result<Vec<u8>> {
        let frames = self
            .fragmenter
            .fragment(Direction::Uplink, session_id, payload)?;
        log::info!(
            "Session {:#04x}: sending {} bytes in {} frames",
            session_id,
            payload.len(),
            frames.len()
        );

        for frame in &frames {
            self.query(frame).await?;
        }

        let response = self.retrieve(session_id).await;
        self.sessions.remove(session_id);
        let response = response?;

        log::info!(
            "Session {:#04x}: received {} bytes",
            session_id,
            response.len()
        );
        Ok(response)
    }

    async fn retrieve(&self, session_id: SessionId) -> Result<Vec<u8>> {
        for sequence_number in 0..=u8::MAX {
            let frame = self.retrieve_frame(session_id, sequence_number).await?;
            if frame.sequence_number != sequence_number || frame.session_id != session_id {
                return Err(TunnelError::MalformedFrame(format!(
                    "asked for frame {} of session {:#04x}, got {} of {:#04x}",
                    sequence_number, session_id, frame.sequence_number, frame.session_id
                )));
            }

            let last = frame.is_last();
            if let Some(payload) = self.downlink.reassemble(&self.sessions, frame)? {
                return Ok(payload);
            }
            if last {
                return Err(TunnelError::MalformedFrame(format!(
                    "session {:#04x} ended with gaps",
                    session_id
                )));
            }
        }

        Err(TunnelError::CapacityExceeded {
            size: self.fragmenter.max_payload(Direction::Downlink) + 1,
            capacity: self.fragmenter.max_payload(Direction::Downlink),
        })
    }

    // Poll until the server has frame `sequence_number` queued.
    async fn retrieve_frame(&self, session_id: SessionId, sequence_number: u8) -> Result<TunnelFrame> {
        let request = TunnelFrame::retrieve(session_id, sequence_number);
        let mut polls = 0;
        loop {
            let response = self.query(&request).await?;
            if let Some(frame) = self.codec.from_response(&response)? {
                return Ok(frame);
            }

            polls += 1;
            if polls > self.config.poll_limit {
                return Err(TunnelError::Timeout(format!(
                    "no downlink frame {} for session {:#04x} after {} polls",
                    sequence_number, session_id, polls
                )));
            }
            log::debug!(
                "Session {:#04x}: frame {} not ready, polling again",
                session_id,
                sequence_number
            );
            sleep(self.config.poll_interval).await;
        }
    }

    /// Send one frame and wait for the matching response, resending on timeout.
    async fn query(&self, frame: &TunnelFrame) -> Result<Message> {
        let id: u16 = rand::random();
        let bytes = self.codec.to_query(frame, id)?.encode()?;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                log::debug!(
                    "Resending {} seq {} of session {:#04x} (attempt {})",
                    frame.command,
                    frame.sequence_number,
                    frame.session_id,
                    attempt + 1
                );
            }
            self.transport
                .send_to(&bytes, self.config.server_addr)
                .await?;

            match timeout(self.config.query_timeout, self.wait_for(id)).await {
                Ok(response) => return Self::check_rcode(response?, frame.session_id),
                Err(_) => continue,
            }
        }

        Err(TunnelError::Timeout(format!(
            "no response to query {:#06x} after {} attempts",
            id,
            self.config.max_retries + 1
        )))
    }

    async fn wait_for(&self, id: u16) -> Result<Message> {
        loop {
            let (datagram, peer) = self.transport.recv_from().await?;
            if peer != self.config.server_addr {
                log::debug!("Ignoring datagram from unexpected peer {}", peer);
                continue;
            }

            match Message::decode(&datagram, 0) {
                Ok((message, _)) if message.header().is_response() && message.header().id == id => {
                    return Ok(message)
                }
                Ok((message, _)) => {
                    log::debug!("Ignoring stale response {:#06x}", message.header().id);
                }
                Err(e) => log::warn!("Ignoring undecodable response: {}", e),
            }
        }
    }

    fn check_rcode(response: Message, session_id: SessionId) -> Result<Message> {
        match response.header().rcode {
            RCODE_NOERROR => Ok(response),
            RCODE_NXDOMAIN => Err(TunnelError::UnknownSession(session_id)),
            RCODE_FORMERR => Err(TunnelError::MalformedFrame(format!(
                "server rejected a frame of session {:#04x}",
                session_id
            ))),
            rcode => Err(TunnelError::Decoding(format!(
                "server answered with rcode {}",
                rcode
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Header, Question};

    #[test]
    fn test_check_rcode() {
        let query = Message::query(1, Question::txt("x"));
        let ok = Message::new(
            Header::response_to(query.header(), RCODE_NOERROR),
            query.questions().to_vec(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        assert!(DnsTunnelClient::<UdpSocket>::check_rcode(ok, 1).is_ok());

        let nx = Message::new(
            Header::response_to(query.header(), RCODE_NXDOMAIN),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        assert!(matches!(
            DnsTunnelClient::<UdpSocket>::check_rcode(nx, 4),
            Err(TunnelError::UnknownSession(4))
        ));
    }

    #[tokio::test]
    async fn test_query_times_out() {
        // a bound socket that never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let planner = Arc::new(CapacityPlanner::with_domain("t.example.com").unwrap());
        let config = ClientConfig {
            server_addr: silent.local_addr().unwrap(),
            query_timeout: std::time::Duration::from_millis(20),
            max_retries: 1,
            ..ClientConfig::default()
        };

        let mut client = DnsTunnelClient::connect(planner, config).await.unwrap();
        let result = client.exchange(b"hello").await;
        assert!(matches!(result, Err(TunnelError::Timeout(_))));
    }
}
