// Colon-delimited wire messages
//
// Line format: <originator>:<type>[:<payload>...]
// Originator and type are single-character codes, payload fields are text
// and interpreted per position by the consumer.

use super::error::{LinkError, Result};

/// Field separator on the wire
pub const FIELD_SEPARATOR: char = ':';

/// Reply written for every keepalive probe
pub const KEEPALIVE_ACK: &str = "K:OK";

/// Subsystem that produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Originator {
    Motor,
    Battery,
    Keepalive,
    Patrol,
}

impl Originator {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Motor => "M",
            Self::Battery => "B",
            Self::Keepalive => "K",
            Self::Patrol => "P",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Self::Motor),
            "B" => Some(Self::Battery),
            "K" => Some(Self::Keepalive),
            "P" => Some(Self::Patrol),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Status,
}

impl MessageType {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Status => "S",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(Self::Status),
            _ => None,
        }
    }
}

/// A parsed line, borrowing its fields from the raw text
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage<'a> {
    pub originator: &'a str,
    pub message_type: &'a str,
    pub payload: Vec<&'a str>,
}

impl<'a> WireMessage<'a> {
    /// Split a line into originator, type and payload.
    /// Lines with fewer than two fields are rejected.
    pub fn parse(line: &'a str) -> Result<Self> {
        let mut fields = line.split(FIELD_SEPARATOR);
        let originator = fields.next().unwrap_or_default();
        let Some(message_type) = fields.next() else {
            return Err(LinkError::malformed(line, "expected at least 2 fields"));
        };

        Ok(Self {
            originator,
            message_type,
            payload: fields.collect(),
        })
    }

    pub fn is_from(&self, originator: Originator) -> bool {
        self.originator == originator.code()
    }

    pub fn is_type(&self, message_type: MessageType) -> bool {
        self.message_type == message_type.code()
    }
}
