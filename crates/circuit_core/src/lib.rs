//! Circuit Tracks protocol core
//!
//! This crate provides the SysEx codec for Novation Circuit Tracks synth patches:
//! 7-bit packing, the fixed 220-byte patch layout, and frame building/parsing.
//! It is a pure library with no I/O, MIDI port handling, or timing concerns.
//! Those responsibilities belong in the `circuit` device crate.

extern crate serde;

pub mod codec;
pub mod layout;
pub mod params;
pub mod sysex;

// Re-export commonly used items
pub use params::{PatchParams, PatchUpdate, RawPatch, decode, decode_name, encode_name, encode_partial};
pub use sysex::{ParsedFrame, SyxPatch, Track, parse_frame, parse_syx_file};
