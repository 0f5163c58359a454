//! Device layer for the Circuit Tracks librarian.
//!
//! [`TransportSession`] owns the MIDI connection: port discovery, hot-plug
//! handling, rate-limited SysEx sends and request/reply correlation.
//! [`BankStore`] keeps the two synth patch banks and moves them to and from the
//! device through a session. Byte-level encoding lives in `circuit_core`.

pub mod bank;
pub mod config;
pub mod error;
pub mod midi;
pub mod session;

pub use bank::{BankStore, BatchSummary, CurrentPatch, ImportSummary, PatchSlot, SlotSummary};
pub use circuit_core::Track;
pub use config::SessionConfig;
pub use error::{BankError, TransportError};
pub use midi::{MidiBackend, MidirBackend, NullBackend};
pub use session::{ConnectionState, ControlChange, PlaybackState, SessionEvent, Subscription, TransportSession};
