// DNS message codec
//
// Header, question, resource record and full message, each with a paired
// encode/decode. Decoders take the buffer and a start offset and hand back
// the offset the next decoder must start from.

use super::label::{read_hostname, write_hostname};
use super::{CLASS_IN, HEADER_SIZE, TYPE_TXT};
use crate::error::{Result, TunnelError};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;

/// Fixed part of a resource record after its name: type, class, ttl, rdlength
pub const RECORD_FIXED_SIZE: usize = 10;

/// Fixed part of a question after its name: qtype, qclass
pub const QUESTION_FIXED_SIZE: usize = 4;

fn ensure(buf: &Cursor<&[u8]>, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(TunnelError::TruncatedMessage {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn decode_at<T>(
    bytes: &[u8],
    offset: usize,
    read: impl FnOnce(&mut Cursor<&[u8]>) -> Result<T>,
) -> Result<(T, usize)> {
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(offset as u64);
    let value = read(&mut cursor)?;
    Ok((value, cursor.position() as usize))
}

fn encode_with(capacity: usize, write: impl FnOnce(&mut BytesMut) -> Result<()>) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(capacity);
    write(&mut buf)?;
    Ok(buf.to_vec())
}

fn section_count(len: usize, section: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        TunnelError::Encoding(format!("{} section has {} entries (max: 65535)", section, len))
    })
}

/// DNS message header (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    /// 4-bit operation code
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    /// 4-bit response code
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub const SIZE: usize = HEADER_SIZE;

    /// Standard query header, recursion desired
    pub fn query(id: u16) -> Self {
        Self {
            id,
            rd: true,
            ..Self::default()
        }
    }

    /// Authoritative response header answering `query`
    pub fn response_to(query: &Header, rcode: u8) -> Self {
        Self {
            id: query.id,
            qr: true,
            opcode: query.opcode,
            aa: true,
            rd: query.rd,
            rcode,
            ..Self::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.qr
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_with(Self::SIZE, |buf| self.write(buf))
    }

    pub fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize)> {
        decode_at(bytes, offset, Self::read)
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        if self.opcode > 0x0F {
            return Err(TunnelError::Encoding(format!(
                "opcode {} does not fit in 4 bits",
                self.opcode
            )));
        }
        if self.rcode > 0x0F {
            return Err(TunnelError::Encoding(format!(
                "rcode {} does not fit in 4 bits",
                self.rcode
            )));
        }

        let flags_hi = (self.qr as u8) << 7
            | self.opcode << 3
            | (self.aa as u8) << 2
            | (self.tc as u8) << 1
            | self.rd as u8;
        // Z bits stay zero
        let flags_lo = (self.ra as u8) << 7 | self.rcode;

        buf.put_u16(self.id);
        buf.put_u8(flags_hi);
        buf.put_u8(flags_lo);
        buf.put_u16(self.qdcount);
        buf.put_u16(self.ancount);
        buf.put_u16(self.nscount);
        buf.put_u16(self.arcount);
        Ok(())
    }

    pub(crate) fn read(buf: &mut Cursor<&[u8]>) -> Result<Self> {
        ensure(buf, Self::SIZE)?;

        let id = buf.get_u16();
        let flags_hi = buf.get_u8();
        let flags_lo = buf.get_u8();

        Ok(Self {
            id,
            qr: flags_hi & 0x80 != 0,
            opcode: (flags_hi >> 3) & 0x0F,
            aa: flags_hi & 0x04 != 0,
            tc: flags_hi & 0x02 != 0,
            rd: flags_hi & 0x01 != 0,
            ra: flags_lo & 0x80 != 0,
            rcode: flags_lo & 0x0F,
            qdcount: buf.get_u16(),
            ancount: buf.get_u16(),
            nscount: buf.get_u16(),
            arcount: buf.get_u16(),
        })
    }
}

/// DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    pub fn new(qname: impl Into<String>, qtype: u16, qclass: u16) -> Self {
        Self {
            qname: qname.into(),
            qtype,
            qclass,
        }
    }

    /// TXT question in class IN
    pub fn txt(qname: impl Into<String>) -> Self {
        Self::new(qname, TYPE_TXT, CLASS_IN)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_with(self.qname.len() + 2 + QUESTION_FIXED_SIZE, |buf| {
            self.write(buf)
        })
    }

    pub fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize)> {
        decode_at(bytes, offset, Self::read)
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        write_hostname(&self.qname, buf)?;
        buf.put_u16(self.qtype);
        buf.put_u16(self.qclass);
        Ok(())
    }

    pub(crate) fn read(buf: &mut Cursor<&[u8]>) -> Result<Self> {
        let qname = read_hostname(buf)?;
        ensure(buf, QUESTION_FIXED_SIZE)?;

        Ok(Self {
            qname,
            qtype: buf.get_u16(),
            qclass: buf.get_u16(),
        })
    }
}

/// DNS resource record
///
/// The wire `rdlength` is always `rdata.len()`; it is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, rtype: u16, rclass: u16, ttl: u32, rdata: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            rtype,
            rclass,
            ttl,
            rdata,
        }
    }

    /// TXT record in class IN carrying `rdata` verbatim
    pub fn txt(name: impl Into<String>, ttl: u32, rdata: Vec<u8>) -> Self {
        Self::new(name, TYPE_TXT, CLASS_IN, ttl, rdata)
    }

    pub fn rdlength(&self) -> usize {
        self.rdata.len()
    }

    pub fn is_txt(&self) -> bool {
        self.rtype == TYPE_TXT
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_with(
            self.name.len() + 2 + RECORD_FIXED_SIZE + self.rdata.len(),
            |buf| self.write(buf),
        )
    }

    pub fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize)> {
        decode_at(bytes, offset, Self::read)
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        let rdlength = u16::try_from(self.rdata.len()).map_err(|_| {
            TunnelError::Encoding(format!(
                "rdata of {} bytes does not fit in rdlength",
                self.rdata.len()
            ))
        })?;

        write_hostname(&self.name, buf)?;
        buf.put_u16(self.rtype);
        buf.put_u16(self.rclass);
        buf.put_u32(self.ttl);
        buf.put_u16(rdlength);
        buf.put_slice(&self.rdata);
        Ok(())
    }

    pub(crate) fn read(buf: &mut Cursor<&[u8]>) -> Result<Self> {
        let name = read_hostname(buf)?;
        ensure(buf, RECORD_FIXED_SIZE)?;

        let rtype = buf.get_u16();
        let rclass = buf.get_u16();
        let ttl = buf.get_u32();
        let rdlength = buf.get_u16() as usize;

        ensure(buf, rdlength)?;
        let mut rdata = vec![0u8; rdlength];
        buf.copy_to_slice(&mut rdata);

        Ok(Self {
            name,
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }
}

/// DNS message (complete query or response)
///
/// The header's four count fields always equal the lengths of the matching
/// sections: `qdcount` questions, `ancount` answers, `nscount` authority
/// records and `arcount` additional records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: Header,
    questions: Vec<Question>,
    answers: Vec<ResourceRecord>,
    authority: Vec<ResourceRecord>,
    additional: Vec<ResourceRecord>,
}

impl Message {
    /// Build a message; the header's count fields are taken from the sections.
    pub fn new(
        header: Header,
        questions: Vec<Question>,
        answers: Vec<ResourceRecord>,
        authority: Vec<ResourceRecord>,
        additional: Vec<ResourceRecord>,
    ) -> Result<Self> {
        let header = Header {
            qdcount: section_count(questions.len(), "question")?,
            ancount: section_count(answers.len(), "answer")?,
            nscount: section_count(authority.len(), "authority")?,
            arcount: section_count(additional.len(), "additional")?,
            ..header
        };

        Ok(Self {
            header,
            questions,
            answers,
            authority,
            additional,
        })
    }

    /// Query carrying a single question
    pub fn query(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                qdcount: 1,
                ..Header::query(id)
            },
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn answers(&self) -> &[ResourceRecord] {
        &self.answers
    }

    pub fn authority(&self) -> &[ResourceRecord] {
        &self.authority
    }

    pub fn additional(&self) -> &[ResourceRecord] {
        &self.additional
    }

    /// First question, if any
    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Serialize: header, questions, answers, authority, additional.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(512);

        self.header.write(&mut buf)?;
        for question in &self.questions {
            question.write(&mut buf)?;
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
        {
            record.write(&mut buf)?;
        }

        Ok(buf.to_vec())
    }

    /// Parse a message starting at `offset`.
    ///
    /// The header counts bound how many entries of each section are read.
    pub fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize)> {
        decode_at(bytes, offset, |buf| {
            let header = Header::read(buf)?;

            let questions = (0..header.qdcount)
                .map(|_| Question::read(buf))
                .collect::<Result<Vec<_>>>()?;
            let answers = Self::read_records(buf, header.ancount)?;
            let authority = Self::read_records(buf, header.nscount)?;
            let additional = Self::read_records(buf, header.arcount)?;

            Ok(Self {
                header,
                questions,
                answers,
                authority,
                additional,
            })
        })
    }

    fn read_records(buf: &mut Cursor<&[u8]>, count: u16) -> Result<Vec<ResourceRecord>> {
        (0..count).map(|_| ResourceRecord::read(buf)).collect()
    }
}
