//! http-over-dns: a data tunnel carried in DNS queries and responses
//!
//! Application bytes travel client to server inside query hostnames and
//! server to client inside TXT record data. Every message stays within the
//! classic 512-byte UDP DNS limit, so payloads are cut into frames addressed
//! by a session id, a command and a sequence number.
//!
//! ## Quick Start
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use http_over_dns::{CapacityPlanner, ClientConfig, DnsTunnelClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let planner = Arc::new(CapacityPlanner::with_domain("t.example.com")?);
//!     let mut client = DnsTunnelClient::connect(planner, ClientConfig::default()).await?;
//!
//!     let response = client.exchange(b"GET / HTTP/1.1\r\n\r\n").await?;
//!     println!("{}", String::from_utf8_lossy(&response));
//!
//!     Ok(())
//! }
//! ```
//!
//! ### As a Command-Line Tool
//!
//! ```bash
//! # Run the echo server
//! http-over-dns server --bind 0.0.0.0:5353
//!
//! # Send a request through it
//! http-over-dns client --server 127.0.0.1:5353 --data "hello"
//!
//! # Show frame capacities for a domain
//! http-over-dns capacity --domain t.example.com
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  TXT queries   ┌──────────────┐
//! │   Client    │───────────────▶│    Server    │
//! │ (fragment)  │◀───────────────│ (reassemble) │
//! └─────────────┘  TXT answers   └──────────────┘
//!                                       │
//!                                       ▼
//!                               ┌──────────────┐
//!                               │PayloadHandler│
//!                               └──────────────┘
//! ```

pub mod capacity;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod dns;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod server;
pub mod session;
pub mod transport;

pub use capacity::{CapacityPlanner, Direction, MAX_MESSAGE_SIZE};
pub use client::DnsTunnelClient;
pub use config::{ClientConfig, ServerConfig, TunnelConfig};
pub use dispatch::{handler_for, Dispatcher, EchoHandler, PayloadHandler};
pub use dns::{decode_hostname, encode_hostname, Header, Message, Question, ResourceRecord};
pub use error::{Result, TunnelError};
pub use fragment::{fragment, Fragmenter, Reassembler};
pub use frame::{Command, FrameCodec, TunnelFrame};
pub use server::{DnsTunnelServer, TunnelServer};
pub use session::{SessionId, SessionStore};
pub use transport::DatagramTransport;
