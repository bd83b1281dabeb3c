// DNS wire format for the tunnel
//
// Label-encoded hostnames plus the header/question/record/message codec.
// Compression pointers are never produced and are rejected on input.

pub mod label;
pub mod protocol;

pub use label::{decode_hostname, encode_hostname};
pub use protocol::{Header, Message, Question, ResourceRecord};

/// Maximum DNS label length (RFC 1035)
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum encoded DNS name length, terminator included (RFC 1035)
pub const MAX_NAME_LEN: usize = 255;

/// Fixed DNS header size
pub const HEADER_SIZE: usize = 12;

/// TXT record type
pub const TYPE_TXT: u16 = 16;

/// Internet class
pub const CLASS_IN: u16 = 1;

/// Response codes used by the tunnel
pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_FORMERR: u8 = 1;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;
