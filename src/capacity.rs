//! Per-direction payload budgets derived from the DNS message ceiling.
//!
//! Every tunnel message spends a fixed amount of its budget on framing: the
//! header, the question's type/class, and the frame name
//! `<session>.<command>.<sequence>.<domain>` which has the same length for
//! every frame because session ids and sequence numbers are rendered as
//! fixed-width base32 labels. What is left is the payload capacity.
//!
//! ```text
//! downlink: 512 = header(12) + [name + 4] + [name + 10 + rdata]
//! uplink:   qname = [base32 payload labels] + name  (<= 255 bytes)
//! ```

use crate::dns::protocol::{QUESTION_FIXED_SIZE, RECORD_FIXED_SIZE};
use crate::dns::{encode_hostname, HEADER_SIZE, MAX_LABEL_LEN, MAX_NAME_LEN};
use crate::error::{Result, TunnelError};

/// Conventional unfragmented UDP DNS limit (RFC 1035)
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Width of a base32-rendered single byte (session id, sequence number)
pub const ID_LABEL_WIDTH: usize = 8;

/// Width of the command label
pub const COMMAND_LABEL_WIDTH: usize = 1;

/// Direction a frame travels in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server, payload in query name labels
    Uplink,
    /// Server to client, payload in TXT record data
    Downlink,
}

/// Sizes derived once from the domain suffix and message ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityPlanner {
    domain: String,
    message_size: usize,
    name_field_size: usize,
    uplink_capacity: usize,
    resource_record_capacity: usize,
}

impl CapacityPlanner {
    /// Derive capacities for frames under `domain` with a total message
    /// budget of `message_size` bytes.
    pub fn new(domain: &str, message_size: usize) -> Result<Self> {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();

        let template = [
            "X".repeat(ID_LABEL_WIDTH),
            "X".repeat(COMMAND_LABEL_WIDTH),
            "X".repeat(ID_LABEL_WIDTH),
            domain.clone(),
        ]
        .join(".");
        let name_field_size = encode_hostname(&template)
            .map_err(|e| TunnelError::Config(format!("domain {:?} unusable: {}", domain, e)))?
            .len();

        let question_field_size = QUESTION_FIXED_SIZE + name_field_size;
        let resource_record_capacity = message_size
            .checked_sub(HEADER_SIZE + question_field_size + RECORD_FIXED_SIZE + name_field_size)
            .filter(|capacity| *capacity > 0)
            .ok_or_else(|| {
                TunnelError::Config(format!(
                    "message size {} leaves no room for record data",
                    message_size
                ))
            })?
            .min(u16::MAX as usize);

        let uplink_capacity = Self::uplink_bytes(message_size, name_field_size);
        if uplink_capacity == 0 {
            return Err(TunnelError::Config(format!(
                "domain {:?} leaves no room for uplink payload",
                domain
            )));
        }

        Ok(Self {
            domain,
            message_size,
            name_field_size,
            uplink_capacity,
            resource_record_capacity,
        })
    }

    /// Planner for the standard 512-byte ceiling
    pub fn with_domain(domain: &str) -> Result<Self> {
        Self::new(domain, MAX_MESSAGE_SIZE)
    }

    // Bytes that fit as unpadded base32 in extra labels in front of the name field.
    fn uplink_bytes(message_size: usize, name_field_size: usize) -> usize {
        let name_budget = MAX_NAME_LEN.min(message_size.saturating_sub(HEADER_SIZE + QUESTION_FIXED_SIZE));
        let spare = name_budget.saturating_sub(name_field_size);

        // each full label costs 64 bytes, a partial one 1 + its length
        let full_labels = spare / (MAX_LABEL_LEN + 1);
        let rest = spare % (MAX_LABEL_LEN + 1);
        let chars = full_labels * MAX_LABEL_LEN + rest.saturating_sub(1);

        // base32: 8 characters per 5 bytes
        chars * 5 / 8
    }

    /// Domain suffix, lowercased, without trailing dot
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Encoded size of `<session>.<command>.<sequence>.<domain>`
    pub fn name_field_size(&self) -> usize {
        self.name_field_size
    }

    /// Question bytes when the question name is the bare name field
    pub fn question_field_size(&self) -> usize {
        QUESTION_FIXED_SIZE + self.name_field_size
    }

    /// Payload bytes per downlink frame (TXT rdata)
    pub fn resource_record_capacity(&self) -> usize {
        self.resource_record_capacity
    }

    /// Payload bytes per uplink frame (query name labels)
    pub fn uplink_capacity(&self) -> usize {
        self.uplink_capacity
    }

    pub fn capacity(&self, direction: Direction) -> usize {
        match direction {
            Direction::Uplink => self.uplink_capacity,
            Direction::Downlink => self.resource_record_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_without_domain() {
        let planner = CapacityPlanner::with_domain("").unwrap();

        // 9 + 2 + 9 + terminator
        assert_eq!(planner.name_field_size(), 21);
        assert_eq!(planner.question_field_size(), 25);
        assert_eq!(planner.resource_record_capacity(), 512 - 12 - 25 - 10 - 21);
        // 234 spare name bytes: 3 labels of 63 + one of 41 characters
        assert_eq!(planner.uplink_capacity(), 230 * 5 / 8);
    }

    #[test]
    fn test_sizes_with_domain() {
        let planner = CapacityPlanner::with_domain("t.example.com.").unwrap();

        assert_eq!(planner.domain(), "t.example.com");
        assert_eq!(planner.name_field_size(), 21 + 2 + 8 + 4);
        assert_eq!(
            planner.resource_record_capacity(),
            512 - 12 - (4 + 35) - 10 - 35
        );
        assert!(planner.uplink_capacity() < CapacityPlanner::with_domain("").unwrap().uplink_capacity());
    }

    #[test]
    fn test_capacity_by_direction() {
        let planner = CapacityPlanner::with_domain("tunnel.example.com").unwrap();
        assert_eq!(planner.capacity(Direction::Uplink), planner.uplink_capacity());
        assert_eq!(
            planner.capacity(Direction::Downlink),
            planner.resource_record_capacity()
        );
        assert!(planner.capacity(Direction::Downlink) > planner.capacity(Direction::Uplink));
    }

    #[test]
    fn test_small_message_size_limits_uplink() {
        let planner = CapacityPlanner::new("", 128).unwrap();
        assert_eq!(planner.resource_record_capacity(), 128 - 12 - 25 - 10 - 21);
        // 128 - 16 = 112 name bytes, 91 spare: one full label + 26 characters
        assert_eq!(planner.uplink_capacity(), (63 + 26) * 5 / 8);
    }

    #[test]
    fn test_unusable_configurations() {
        assert!(matches!(
            CapacityPlanner::new("", 60),
            Err(TunnelError::Config(_))
        ));

        let long_domain = vec!["a".repeat(63); 4].join(".");
        assert!(matches!(
            CapacityPlanner::with_domain(&long_domain),
            Err(TunnelError::Config(_))
        ));
    }
}
