//! Error types for the transport session and bank store.

use std::fmt;

/// Errors that can occur while talking to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No port is connected
    NotConnected,

    /// The named port is not present among the bidirectional ports
    PortNotFound { port: String },

    /// No reply with the expected command arrived before the deadline
    Timeout { command: u8 },

    /// The connection closed while a request was pending
    Disconnected,

    /// A newer request for the same reply command replaced this one
    Superseded { command: u8 },

    /// The MIDI backend failed to open a port or send
    Backend { message: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotConnected => write!(f, "Not connected to a device"),
            TransportError::PortNotFound { port } => write!(f, "MIDI port '{}' not found", port),
            TransportError::Timeout { command } => {
                write!(f, "Timed out waiting for reply 0x{:02X}", command)
            }
            TransportError::Disconnected => write!(f, "Device disconnected"),
            TransportError::Superseded { command } => {
                write!(f, "Request for reply 0x{:02X} superseded by a newer request", command)
            }
            TransportError::Backend { message } => write!(f, "MIDI backend error: {}", message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from bank operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    Transport(TransportError),

    /// Patch index outside 0..64
    InvalidIndex(usize),

    /// The device answered with a frame that was not the expected dump
    UnexpectedReply { command: u8 },

    /// The slot holds no patch data
    EmptySlot(usize),
}

impl fmt::Display for BankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankError::Transport(err) => write!(f, "{}", err),
            BankError::InvalidIndex(index) => write!(f, "Patch index {} out of range 0..64", index),
            BankError::UnexpectedReply { command } => {
                write!(f, "Unexpected reply 0x{:02X} from device", command)
            }
            BankError::EmptySlot(index) => write!(f, "Patch slot {} is empty", index + 1),
        }
    }
}

impl std::error::Error for BankError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BankError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for BankError {
    fn from(err: TransportError) -> Self {
        BankError::Transport(err)
    }
}

impl BankError {
    /// Whether this error means the connection itself is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, BankError::Transport(_))
    }
}
