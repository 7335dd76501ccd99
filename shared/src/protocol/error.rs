//! Protocol errors

use crate::protocol::records::EventType;
use std::fmt;
use thiserror::Error;

/// Definition categories whose ids must arrive densely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    String,
    Location,
    Symbol,
    Attribute,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DefinitionKind::String => "string",
            DefinitionKind::Location => "location",
            DefinitionKind::Symbol => "symbol",
            DefinitionKind::Attribute => "attribute",
        };
        f.write_str(name)
    }
}

/// Fatal stream errors. The decoder stops after reporting one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("stream does not start with the QPERFSTREAM magic")]
    BadMagic,

    #[error("unknown event type {0}")]
    UnknownEventType(i8),

    #[error("payload truncated while reading {field}: need {needed} bytes, {available} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{event:?} payload has {remaining} unread trailing bytes")]
    TrailingBytes { event: EventType, remaining: usize },

    #[error("{kind} definition out of order: expected id {expected}, got {actual}")]
    OutOfOrderDefinition {
        kind: DefinitionKind,
        expected: usize,
        actual: i32,
    },

    #[error("symbol definition {0} refers to an undeclared location")]
    UndeclaredLocation(i32),

    #[error("location definition {id} has parent {parent}, which is not an earlier location")]
    InvalidParentLocation { id: i32, parent: i32 },

    #[error("invalid length marker {0:#x}")]
    InvalidLength(u32),

    #[error("decoder stopped after an earlier protocol error")]
    Halted,
}
