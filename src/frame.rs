//! Tunnel frames and their embedding in DNS messages.
//!
//! A frame is addressed by a name of fixed shape:
//!
//! ```text
//! [payload labels...] . <session> . <command> . <sequence> . <domain>
//!   base32, <=63 each    8 chars     S|L|R       8 chars
//! ```
//!
//! Uplink frames travel as the question name of a TXT query with the payload
//! in the leading labels. Downlink frames travel as a TXT answer whose name is
//! the bare frame name and whose rdata is the raw payload.

use crate::capacity::{CapacityPlanner, Direction, ID_LABEL_WIDTH};
use crate::dns::{Header, Message, Question, ResourceRecord, MAX_LABEL_LEN, RCODE_NOERROR};
use crate::error::{Result, TunnelError};
use data_encoding::{BASE32, BASE32_NOPAD};
use std::fmt;
use std::sync::Arc;

/// TTL on downlink answers; tunnel data must never be served from a cache
pub const RESPONSE_TTL: u32 = 0;

/// Frame command, one letter on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Payload chunk, more follow
    SendMore,
    /// Final payload chunk
    SendLast,
    /// Request for queued downlink data
    Retrieve,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::SendMore, Command::SendLast, Command::Retrieve];

    pub fn label(self) -> &'static str {
        match self {
            Command::SendMore => "S",
            Command::SendLast => "L",
            Command::Retrieve => "R",
        }
    }

    /// Parse a command label; resolvers may have changed its case
    pub fn from_label(label: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.label().eq_ignore_ascii_case(label))
            .ok_or_else(|| TunnelError::MalformedFrame(format!("unknown command {:?}", label)))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One fragment of a session's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelFrame {
    pub session_id: u8,
    pub command: Command,
    pub sequence_number: u8,
    pub payload: Vec<u8>,
}

impl TunnelFrame {
    pub fn new(session_id: u8, command: Command, sequence_number: u8, payload: Vec<u8>) -> Self {
        Self {
            session_id,
            command,
            sequence_number,
            payload,
        }
    }

    /// Empty request for downlink frame `sequence_number`
    pub fn retrieve(session_id: u8, sequence_number: u8) -> Self {
        Self::new(session_id, Command::Retrieve, sequence_number, Vec::new())
    }

    pub fn is_last(&self) -> bool {
        self.command == Command::SendLast
    }
}

/// Render one byte as a fixed-width base32 label (`=` padding becomes `0`).
pub fn encode_id(value: u8) -> String {
    BASE32.encode(&[value]).replace('=', "0")
}

/// Inverse of [`encode_id`], case-insensitive.
pub fn decode_id(label: &str) -> Result<u8> {
    if label.len() != ID_LABEL_WIDTH {
        return Err(TunnelError::MalformedFrame(format!(
            "id label {:?} is not {} characters",
            label, ID_LABEL_WIDTH
        )));
    }

    let padded = label.to_ascii_uppercase().replace('0', "=");
    let bytes = BASE32
        .decode(padded.as_bytes())
        .map_err(|e| TunnelError::MalformedFrame(format!("id label {:?}: {}", label, e)))?;

    match bytes.as_slice() {
        [value] => Ok(*value),
        _ => Err(TunnelError::MalformedFrame(format!(
            "id label {:?} does not hold a single byte",
            label
        ))),
    }
}

/// Moves frames in and out of DNS messages under one domain suffix.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    planner: Arc<CapacityPlanner>,
}

impl FrameCodec {
    pub fn new(planner: Arc<CapacityPlanner>) -> Self {
        Self { planner }
    }

    pub fn planner(&self) -> &CapacityPlanner {
        &self.planner
    }

    /// `<session>.<command>.<sequence>[.<domain>]`
    pub fn frame_name(&self, frame: &TunnelFrame) -> String {
        let mut name = format!(
            "{}.{}.{}",
            encode_id(frame.session_id),
            frame.command,
            encode_id(frame.sequence_number)
        );
        if !self.planner.domain().is_empty() {
            name.push('.');
            name.push_str(self.planner.domain());
        }
        name
    }

    /// Wrap an uplink frame in a TXT query with transaction id `id`.
    pub fn to_query(&self, frame: &TunnelFrame, id: u16) -> Result<Message> {
        self.check_capacity(frame, Direction::Uplink)?;
        if frame.command == Command::Retrieve && !frame.payload.is_empty() {
            return Err(TunnelError::MalformedFrame(
                "retrieve frames carry no payload".into(),
            ));
        }

        let name = if frame.payload.is_empty() {
            self.frame_name(frame)
        } else {
            let frame_name = self.frame_name(frame);
            let encoded = BASE32_NOPAD.encode(&frame.payload);
            // base32 output is ASCII, so any byte index is a char boundary
            debug_assert!(encoded.is_ascii());
            let mut labels = Vec::with_capacity(encoded.len() / MAX_LABEL_LEN + 2);
            let mut rest = encoded.as_str();
            while !rest.is_empty() {
                let (label, tail) = rest.split_at(rest.len().min(MAX_LABEL_LEN));
                labels.push(label);
                rest = tail;
            }
            labels.push(frame_name.as_str());
            labels.join(".")
        };

        Ok(Message::query(id, Question::txt(name)))
    }

    /// Extract the uplink frame from a query's first question.
    pub fn from_query(&self, message: &Message) -> Result<TunnelFrame> {
        let question = message
            .question()
            .ok_or_else(|| TunnelError::MalformedFrame("query carries no question".into()))?;

        let frame = self.parse_name(&question.qname, true)?;
        if frame.command == Command::Retrieve && !frame.payload.is_empty() {
            return Err(TunnelError::MalformedFrame(
                "retrieve frames carry no payload".into(),
            ));
        }
        self.check_capacity(&frame, Direction::Uplink)?;

        Ok(frame)
    }

    /// Answer `query`, carrying `frame` in a TXT record when there is one.
    pub fn to_response(&self, query: &Message, frame: Option<&TunnelFrame>) -> Result<Message> {
        let answers = match frame {
            Some(frame) => {
                if frame.command == Command::Retrieve {
                    return Err(TunnelError::MalformedFrame(
                        "downlink frames are send frames".into(),
                    ));
                }
                self.check_capacity(frame, Direction::Downlink)?;
                vec![ResourceRecord::txt(
                    self.frame_name(frame),
                    RESPONSE_TTL,
                    frame.payload.clone(),
                )]
            }
            None => Vec::new(),
        };

        Message::new(
            Header::response_to(query.header(), RCODE_NOERROR),
            query.questions().to_vec(),
            answers,
            Vec::new(),
            Vec::new(),
        )
    }

    /// Extract the downlink frame from a response's first TXT answer.
    ///
    /// `None` means the server had nothing queued for the request.
    pub fn from_response(&self, message: &Message) -> Result<Option<TunnelFrame>> {
        let record = match message.answers().iter().find(|record| record.is_txt()) {
            Some(record) => record,
            None => return Ok(None),
        };

        let mut frame = self.parse_name(&record.name, false)?;
        if frame.command == Command::Retrieve {
            return Err(TunnelError::MalformedFrame(
                "downlink frames are send frames".into(),
            ));
        }
        frame.payload = record.rdata.clone();
        self.check_capacity(&frame, Direction::Downlink)?;

        Ok(Some(frame))
    }

    /// Header-only rejection of `query` with `rcode`
    pub fn error_response(&self, query: &Message, rcode: u8) -> Result<Message> {
        Message::new(
            Header::response_to(query.header(), rcode),
            query.questions().to_vec(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    fn check_capacity(&self, frame: &TunnelFrame, direction: Direction) -> Result<()> {
        let capacity = self.planner.capacity(direction);
        if frame.payload.len() > capacity {
            return Err(TunnelError::CapacityExceeded {
                size: frame.payload.len(),
                capacity,
            });
        }
        Ok(())
    }

    fn parse_name(&self, name: &str, allow_payload: bool) -> Result<TunnelFrame> {
        let labels: Vec<&str> = name.trim_end_matches('.').split('.').collect();
        let suffix: Vec<&str> = match self.planner.domain() {
            "" => Vec::new(),
            domain => domain.split('.').collect(),
        };

        if labels.len() < 3 + suffix.len() {
            return Err(TunnelError::MalformedFrame(format!(
                "name {:?} is too short for a frame",
                name
            )));
        }

        let (head, tail) = labels.split_at(labels.len() - suffix.len());
        if !tail
            .iter()
            .zip(&suffix)
            .all(|(label, expected)| label.eq_ignore_ascii_case(expected))
        {
            return Err(TunnelError::MalformedFrame(format!(
                "name {:?} is not under {:?}",
                name,
                self.planner.domain()
            )));
        }

        let (data_labels, frame_labels) = head.split_at(head.len() - 3);
        let session_id = decode_id(frame_labels[0])?;
        let command = Command::from_label(frame_labels[1])?;
        let sequence_number = decode_id(frame_labels[2])?;

        let payload = if data_labels.is_empty() {
            Vec::new()
        } else if !allow_payload {
            return Err(TunnelError::MalformedFrame(format!(
                "unexpected payload labels in {:?}",
                name
            )));
        } else {
            let encoded = data_labels.concat().to_ascii_uppercase();
            BASE32_NOPAD
                .decode(encoded.as_bytes())
                .map_err(|e| TunnelError::MalformedFrame(format!("payload labels: {}", e)))?
        };

        Ok(TunnelFrame::new(session_id, command, sequence_number, payload))
    }
}
