//! Byte offsets of synth patch parameters within the 220-byte raw patch.
//!
//! The layout is defined by the device (Circuit Tracks Programmer's Reference,
//! synth patch structure). All values are 7-bit. Bytes 153..220 are reserved.

pub const PATCH_DATA_BYTES: usize = 220;

pub const NAME_START: usize = 0;
pub const NAME_LEN: usize = 16;

// Oscillator A
pub const OSC_A_WAVE: usize = 16;
pub const OSC_A_WAVE_INTERP: usize = 17;
pub const OSC_A_COARSE: usize = 18;
pub const OSC_A_FINE: usize = 19;
pub const OSC_A_PW: usize = 20;
pub const OSC_A_MIX: usize = 21;
pub const OSC_A_FM: usize = 22;
pub const OSC_A_RING: usize = 23;

// Oscillator B
pub const OSC_B_WAVE: usize = 24;
pub const OSC_B_WAVE_INTERP: usize = 25;
pub const OSC_B_COARSE: usize = 26;
pub const OSC_B_FINE: usize = 27;
pub const OSC_B_PW: usize = 28;
pub const OSC_B_MIX: usize = 29;
pub const OSC_B_DRIFT: usize = 30;

// Sub oscillator
pub const SUB_WAVE: usize = 31;
pub const SUB_LEVEL: usize = 32;

// Filter
pub const FILTER_CUTOFF: usize = 33;
pub const FILTER_RESONANCE: usize = 34;
pub const FILTER_DRIVE: usize = 35;
pub const FILTER_TYPE: usize = 36;
pub const FILTER_ENV_AMT: usize = 37;
pub const FILTER_VELOCITY: usize = 38;
pub const FILTER_MOD1_AMT: usize = 39;
pub const FILTER_MOD2_AMT: usize = 40;

// Envelopes are stored as [attack, decay, sustain, release]
pub const FILTER_ENV: usize = 41;
pub const AMP_ENV: usize = 45;
pub const ENV_LEN: usize = 4;

// Amp
pub const AMP_LEVEL: usize = 49;
pub const AMP_PAN: usize = 50;
pub const AMP_VELOCITY: usize = 51;

// LFOs are stored as [wave, rate, depth, delay, fade, sync]
pub const LFO1: usize = 52;
pub const LFO2: usize = 58;
pub const LFO_LEN: usize = 6;

// Mod envelopes 1..=3, four bytes each
pub const MOD_ENV_START: usize = 64;
pub const MOD_ENV_COUNT: usize = 3;

// Mod matrix: 20 slots of [source, destination, depth]
pub const MOD_MATRIX_START: usize = 76;
pub const MOD_MATRIX_SLOTS: usize = 20;
pub const MOD_MATRIX_SLOT_BYTES: usize = 3;

pub const MACRO_LEVELS_START: usize = 136;
pub const MACRO_COUNT: usize = 8;

pub const DISTORTION_ENABLE: usize = 144;
pub const DISTORTION_AMOUNT: usize = 145;

pub const CHORUS_ENABLE: usize = 146;
pub const CHORUS_RATE: usize = 147;
pub const CHORUS_DEPTH: usize = 148;
pub const CHORUS_FEEDBACK: usize = 149;
pub const CHORUS_MIX: usize = 150;

pub const REVERB_SEND: usize = 151;
pub const DELAY_SEND: usize = 152;

/// Offset of mod envelope `n` (0-based).
pub const fn mod_env(n: usize) -> usize {
    MOD_ENV_START + n * ENV_LEN
}

/// Offset of mod matrix slot `n` (0-based).
pub const fn mod_matrix_slot(n: usize) -> usize {
    MOD_MATRIX_START + n * MOD_MATRIX_SLOT_BYTES
}

const MOD_SOURCES: [&str; 13] = [
    "LFO 1", "LFO 2", "Env 1", "Env 2", "Env 3", "Macro 1", "Macro 2", "Macro 3", "Macro 4",
    "Macro 5", "Macro 6", "Macro 7", "Macro 8",
];

const MOD_DESTINATIONS: [&str; 21] = [
    "OSC A Pitch",
    "OSC A Wave",
    "OSC A PW",
    "OSC A FM",
    "OSC B Pitch",
    "OSC B Wave",
    "OSC B PW",
    "OSC Mix",
    "Sub Level",
    "Filter Cutoff",
    "Filter Resonance",
    "Filter Drive",
    "Filter Env Depth",
    "LFO 1 Rate",
    "LFO 1 Depth",
    "LFO 2 Rate",
    "LFO 2 Depth",
    "Amp Level",
    "Amp Pan",
    "Reverb Send",
    "Delay Send",
];

/// Display name of a mod matrix source value, if known.
pub fn mod_source_name(source: u8) -> Option<&'static str> {
    MOD_SOURCES.get(source as usize).copied()
}

/// Display name of a mod matrix destination value, if known.
pub fn mod_destination_name(destination: u8) -> Option<&'static str> {
    MOD_DESTINATIONS.get(destination as usize).copied()
}
