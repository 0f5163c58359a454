//! Raw patch bytes and the structured parameter view decoded from them.
//!
//! [`RawPatch`] is the source of truth. [`PatchParams`] is a read view with a
//! default for every field, and [`PatchUpdate`] describes a partial change that
//! [`encode_partial`] merges into existing bytes group by group.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::layout::*;

/// Name shown for patches whose name bytes are empty.
pub const UNNAMED: &str = "Unnamed";

/// Exactly [`PATCH_DATA_BYTES`] bytes, each in 0..=127.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawPatch([u8; PATCH_DATA_BYTES]);

impl RawPatch {
    /// Build from arbitrary bytes: truncated or zero-padded to 220 bytes and
    /// masked to 7 bits.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; PATCH_DATA_BYTES];
        for (dst, src) in raw.iter_mut().zip(bytes) {
            *dst = src & 0x7F;
        }
        Self(raw)
    }

    /// Deterministic initial patch used for empty bank slots.
    pub fn init(index: usize) -> Self {
        let mut raw = Self([0u8; PATCH_DATA_BYTES]);
        raw.set_name(&format!("Init {}", index + 1));
        raw.set(OSC_A_WAVE, 2);
        raw.set(OSC_A_COARSE, 64);
        raw.set(OSC_A_FINE, 64);
        raw.set(OSC_A_MIX, 100);
        raw.set(OSC_B_WAVE, 2);
        raw.set(OSC_B_COARSE, 64);
        raw.set(OSC_B_FINE, 64);
        raw.set(FILTER_CUTOFF, 100);
        raw.set(FILTER_TYPE, 1);
        Envelope::new(0, 30, 100, 30).write(&mut raw, AMP_ENV);
        raw.set(AMP_LEVEL, 100);
        raw.set(AMP_PAN, 64);
        raw
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn name(&self) -> String {
        decode_name(&self.0)
    }

    pub fn params(&self) -> PatchParams {
        decode(&self.0)
    }

    /// Overwrite bytes 0..16 with `name`, truncated to 16 characters.
    pub fn set_name(&mut self, name: &str) {
        let mut chars = name.chars().take(NAME_LEN);
        for i in 0..NAME_LEN {
            let byte = chars.next().map(|c| (c as u32 & 0x7F) as u8).unwrap_or(0);
            self.0[NAME_START + i] = byte;
        }
    }

    fn set(&mut self, offset: usize, value: u8) {
        if let Some(byte) = self.0.get_mut(offset) {
            *byte = value & 0x7F;
        }
    }
}

impl Default for RawPatch {
    fn default() -> Self {
        Self::init(0)
    }
}

impl AsRef<[u8]> for RawPatch {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawPatch").field(&self.name()).finish()
    }
}

impl Serialize for RawPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for RawPatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        if bytes.len() != PATCH_DATA_BYTES {
            return Err(D::Error::invalid_length(bytes.len(), &"220 patch bytes"));
        }
        Ok(Self::from_bytes(&bytes))
    }
}

/// Reads bytes with a per-field fallback for truncated input.
struct Reader<'a>(&'a [u8]);

impl Reader<'_> {
    fn get(&self, offset: usize, default: u8) -> u8 {
        self.0.get(offset).copied().unwrap_or(default)
    }
}

// ─── Parameter groups ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OscA {
    pub wave: u8,
    pub wave_interp: u8,
    pub coarse: u8,
    pub fine: u8,
    pub pw: u8,
    pub mix: u8,
    pub fm: u8,
    pub ring: u8,
}

impl OscA {
    fn read(r: &Reader) -> Self {
        Self {
            wave: r.get(OSC_A_WAVE, 2),
            wave_interp: r.get(OSC_A_WAVE_INTERP, 0),
            coarse: r.get(OSC_A_COARSE, 64),
            fine: r.get(OSC_A_FINE, 64),
            pw: r.get(OSC_A_PW, 64),
            mix: r.get(OSC_A_MIX, 100),
            fm: r.get(OSC_A_FM, 0),
            ring: r.get(OSC_A_RING, 0),
        }
    }

    fn write(&self, raw: &mut RawPatch) {
        raw.set(OSC_A_WAVE, self.wave);
        raw.set(OSC_A_WAVE_INTERP, self.wave_interp);
        raw.set(OSC_A_COARSE, self.coarse);
        raw.set(OSC_A_FINE, self.fine);
        raw.set(OSC_A_PW, self.pw);
        raw.set(OSC_A_MIX, self.mix);
        raw.set(OSC_A_FM, self.fm);
        raw.set(OSC_A_RING, self.ring);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OscB {
    pub wave: u8,
    pub wave_interp: u8,
    pub coarse: u8,
    pub fine: u8,
    pub pw: u8,
    pub mix: u8,
    pub drift: u8,
}

impl OscB {
    fn read(r: &Reader) -> Self {
        Self {
            wave: r.get(OSC_B_WAVE, 2),
            wave_interp: r.get(OSC_B_WAVE_INTERP, 0),
            coarse: r.get(OSC_B_COARSE, 64),
            fine: r.get(OSC_B_FINE, 64),
            pw: r.get(OSC_B_PW, 64),
            mix: r.get(OSC_B_MIX, 0),
            drift: r.get(OSC_B_DRIFT, 0),
        }
    }

    fn write(&self, raw: &mut RawPatch) {
        raw.set(OSC_B_WAVE, self.wave);
        raw.set(OSC_B_WAVE_INTERP, self.wave_interp);
        raw.set(OSC_B_COARSE, self.coarse);
        raw.set(OSC_B_FINE, self.fine);
        raw.set(OSC_B_PW, self.pw);
        raw.set(OSC_B_MIX, self.mix);
        raw.set(OSC_B_DRIFT, self.drift);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sub {
    pub wave: u8,
    pub level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub cutoff: u8,
    pub resonance: u8,
    pub drive: u8,
    /// 0=LP12 1=LP24 2=HP12 3=HP24 4=BP12 5=BP24
    #[serde(rename = "type")]
    pub filter_type: u8,
    pub env_amt: u8,
    pub velocity: u8,
    /// Absent in a change set leaves the stored amount untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod1_amt: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod2_amt: Option<u8>,
}

impl Filter {
    fn read(r: &Reader) -> Self {
        Self {
            cutoff: r.get(FILTER_CUTOFF, 100),
            resonance: r.get(FILTER_RESONANCE, 0),
            drive: r.get(FILTER_DRIVE, 0),
            filter_type: r.get(FILTER_TYPE, 1),
            env_amt: r.get(FILTER_ENV_AMT, 0),
            velocity: r.get(FILTER_VELOCITY, 0),
            mod1_amt: Some(r.get(FILTER_MOD1_AMT, 0)),
            mod2_amt: Some(r.get(FILTER_MOD2_AMT, 0)),
        }
    }

    fn write(&self, raw: &mut RawPatch) {
        raw.set(FILTER_CUTOFF, self.cutoff);
        raw.set(FILTER_RESONANCE, self.resonance);
        raw.set(FILTER_DRIVE, self.drive);
        raw.set(FILTER_TYPE, self.filter_type);
        raw.set(FILTER_ENV_AMT, self.env_amt);
        raw.set(FILTER_VELOCITY, self.velocity);
        if let Some(amount) = self.mod1_amt {
            raw.set(FILTER_MOD1_AMT, amount);
        }
        if let Some(amount) = self.mod2_amt {
            raw.set(FILTER_MOD2_AMT, amount);
        }
    }
}

/// ADSR stored as four consecutive bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "a")]
    pub attack: u8,
    #[serde(rename = "d")]
    pub decay: u8,
    #[serde(rename = "s")]
    pub sustain: u8,
    #[serde(rename = "r")]
    pub release: u8,
}

impl Envelope {
    pub const fn new(attack: u8, decay: u8, sustain: u8, release: u8) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }

    fn read(r: &Reader, offset: usize, default: Envelope) -> Self {
        Self {
            attack: r.get(offset, default.attack),
            decay: r.get(offset + 1, default.decay),
            sustain: r.get(offset + 2, default.sustain),
            release: r.get(offset + 3, default.release),
        }
    }

    fn write(&self, raw: &mut RawPatch, offset: usize) {
        raw.set(offset, self.attack);
        raw.set(offset + 1, self.decay);
        raw.set(offset + 2, self.sustain);
        raw.set(offset + 3, self.release);
    }
}

const FILTER_ENV_DEFAULT: Envelope = Envelope::new(0, 60, 80, 40);
const AMP_ENV_DEFAULT: Envelope = Envelope::new(0, 30, 100, 30);
const MOD_ENV_DEFAULT: Envelope = Envelope::new(0, 60, 0, 40);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amp {
    pub level: u8,
    pub pan: u8,
    pub velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lfo {
    /// 0=Sine 1=Tri 2=Saw 3=Square 4=S&H
    pub wave: u8,
    pub rate: u8,
    pub depth: u8,
    pub delay: u8,
    pub fade: u8,
    pub sync: u8,
}

impl Lfo {
    fn read(r: &Reader, offset: usize) -> Self {
        Self {
            wave: r.get(offset, 0),
            rate: r.get(offset + 1, 64),
            depth: r.get(offset + 2, 0),
            delay: r.get(offset + 3, 0),
            fade: r.get(offset + 4, 0),
            sync: r.get(offset + 5, 0),
        }
    }

    fn write(&self, raw: &mut RawPatch, offset: usize) {
        raw.set(offset, self.wave);
        raw.set(offset + 1, self.rate);
        raw.set(offset + 2, self.depth);
        raw.set(offset + 3, self.delay);
        raw.set(offset + 4, self.fade);
        raw.set(offset + 5, self.sync);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModSlot {
    pub source: u8,
    pub destination: u8,
    pub depth: u8,
}

impl ModSlot {
    fn read(r: &Reader, slot: usize) -> Self {
        let offset = mod_matrix_slot(slot);
        Self {
            source: r.get(offset, 0),
            destination: r.get(offset + 1, 0),
            depth: r.get(offset + 2, 64),
        }
    }

    fn write(&self, raw: &mut RawPatch, slot: usize) {
        let offset = mod_matrix_slot(slot);
        raw.set(offset, self.source);
        raw.set(offset + 1, self.destination);
        raw.set(offset + 2, self.depth);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distortion {
    pub enable: u8,
    pub amount: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chorus {
    pub enable: u8,
    pub rate: u8,
    pub depth: u8,
    pub feedback: u8,
    pub mix: u8,
}

// ─── Full view ────────────────────────────────────────────────────────────────

/// Structured view of a raw patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchParams {
    pub name: String,
    pub osc_a: OscA,
    pub osc_b: OscB,
    pub sub: Sub,
    pub filter: Filter,
    pub filter_env: Envelope,
    pub amp_env: Envelope,
    pub amp: Amp,
    pub lfo1: Lfo,
    pub lfo2: Lfo,
    pub mod_envs: [Envelope; MOD_ENV_COUNT],
    pub mod_matrix: [ModSlot; MOD_MATRIX_SLOTS],
    pub macros: [u8; MACRO_COUNT],
    pub distortion: Distortion,
    pub chorus: Chorus,
    pub reverb_send: u8,
    pub delay_send: u8,
}

impl PatchParams {
    /// An update that rewrites every group of this view.
    pub fn to_update(&self) -> PatchUpdate {
        PatchUpdate {
            name: Some(self.name.clone()),
            osc_a: Some(self.osc_a),
            osc_b: Some(self.osc_b),
            sub: Some(self.sub),
            filter: Some(self.filter),
            filter_env: Some(self.filter_env),
            amp_env: Some(self.amp_env),
            amp: Some(self.amp),
            lfo1: Some(self.lfo1),
            lfo2: Some(self.lfo2),
            mod_envs: Some(self.mod_envs.iter().copied().map(Some).collect()),
            mod_matrix: Some(self.mod_matrix.iter().copied().map(Some).collect()),
            macros: Some(self.macros.to_vec()),
            distortion: Some(self.distortion),
            chorus: Some(self.chorus),
            reverb_send: Some(self.reverb_send),
            delay_send: Some(self.delay_send),
        }
    }
}

/// A partial change set. Absent groups leave their bytes untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatchUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osc_a: Option<OscA>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osc_b: Option<OscB>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<Sub>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_env: Option<Envelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amp_env: Option<Envelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amp: Option<Amp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lfo1: Option<Lfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lfo2: Option<Lfo>,
    /// Per-envelope; `None` entries are skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_envs: Option<Vec<Option<Envelope>>>,
    /// Per-slot; `None` entries are skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_matrix: Option<Vec<Option<ModSlot>>>,
    /// Leading macro levels; shorter lists leave the remaining macros untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macros: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chorus: Option<Chorus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverb_send: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_send: Option<u8>,
}

impl PatchUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ─── Decode / encode ──────────────────────────────────────────────────────────

/// Decode the patch name from bytes 0..16.
pub fn decode_name(raw: &[u8]) -> String {
    let end = raw.len().min(NAME_START + NAME_LEN);
    let name: String = raw
        .get(NAME_START..end)
        .unwrap_or_default()
        .iter()
        .filter(|&&b| b > 0)
        .map(|&b| char::from(b & 0x7F))
        .collect();
    let name = name.trim();
    if name.is_empty() {
        UNNAMED.to_string()
    } else {
        name.to_string()
    }
}

/// Copy of `raw` with `name` written into the name bytes.
pub fn encode_name(name: &str, raw: &RawPatch) -> RawPatch {
    let mut out = raw.clone();
    out.set_name(name);
    out
}

/// Decode every field, falling back to defaults past the end of `raw`.
pub fn decode(raw: &[u8]) -> PatchParams {
    let r = Reader(raw);
    PatchParams {
        name: decode_name(raw),
        osc_a: OscA::read(&r),
        osc_b: OscB::read(&r),
        sub: Sub {
            wave: r.get(SUB_WAVE, 0),
            level: r.get(SUB_LEVEL, 0),
        },
        filter: Filter::read(&r),
        filter_env: Envelope::read(&r, FILTER_ENV, FILTER_ENV_DEFAULT),
        amp_env: Envelope::read(&r, AMP_ENV, AMP_ENV_DEFAULT),
        amp: Amp {
            level: r.get(AMP_LEVEL, 100),
            pan: r.get(AMP_PAN, 64),
            velocity: r.get(AMP_VELOCITY, 0),
        },
        lfo1: Lfo::read(&r, LFO1),
        lfo2: Lfo::read(&r, LFO2),
        mod_envs: std::array::from_fn(|n| Envelope::read(&r, mod_env(n), MOD_ENV_DEFAULT)),
        mod_matrix: std::array::from_fn(|slot| ModSlot::read(&r, slot)),
        macros: std::array::from_fn(|n| r.get(MACRO_LEVELS_START + n, 0)),
        distortion: Distortion {
            enable: r.get(DISTORTION_ENABLE, 0),
            amount: r.get(DISTORTION_AMOUNT, 0),
        },
        chorus: Chorus {
            enable: r.get(CHORUS_ENABLE, 0),
            rate: r.get(CHORUS_RATE, 64),
            depth: r.get(CHORUS_DEPTH, 64),
            feedback: r.get(CHORUS_FEEDBACK, 0),
            mix: r.get(CHORUS_MIX, 64),
        },
        reverb_send: r.get(REVERB_SEND, 0),
        delay_send: r.get(DELAY_SEND, 0),
    }
}

/// Merge `update` into a copy of `existing` (or the initial patch).
///
/// Only the byte ranges of groups present in `update` are written; every
/// written value is masked to 7 bits.
pub fn encode_partial(update: &PatchUpdate, existing: Option<&RawPatch>) -> RawPatch {
    let mut raw = existing.cloned().unwrap_or_else(|| RawPatch::init(0));

    if let Some(name) = &update.name {
        raw.set_name(name);
    }
    if let Some(osc_a) = &update.osc_a {
        osc_a.write(&mut raw);
    }
    if let Some(osc_b) = &update.osc_b {
        osc_b.write(&mut raw);
    }
    if let Some(sub) = &update.sub {
        raw.set(SUB_WAVE, sub.wave);
        raw.set(SUB_LEVEL, sub.level);
    }
    if let Some(filter) = &update.filter {
        filter.write(&mut raw);
    }
    if let Some(env) = &update.filter_env {
        env.write(&mut raw, FILTER_ENV);
    }
    if let Some(env) = &update.amp_env {
        env.write(&mut raw, AMP_ENV);
    }
    if let Some(amp) = &update.amp {
        raw.set(AMP_LEVEL, amp.level);
        raw.set(AMP_PAN, amp.pan);
        raw.set(AMP_VELOCITY, amp.velocity);
    }
    if let Some(lfo) = &update.lfo1 {
        lfo.write(&mut raw, LFO1);
    }
    if let Some(lfo) = &update.lfo2 {
        lfo.write(&mut raw, LFO2);
    }
    if let Some(envs) = &update.mod_envs {
        for (n, env) in envs.iter().enumerate().take(MOD_ENV_COUNT) {
            if let Some(env) = env {
                env.write(&mut raw, mod_env(n));
            }
        }
    }
    if let Some(slots) = &update.mod_matrix {
        for (n, slot) in slots.iter().enumerate().take(MOD_MATRIX_SLOTS) {
            if let Some(slot) = slot {
                slot.write(&mut raw, n);
            }
        }
    }
    if let Some(macros) = &update.macros {
        for (n, level) in macros.iter().enumerate().take(MACRO_COUNT) {
            raw.set(MACRO_LEVELS_START + n, *level);
        }
    }
    if let Some(distortion) = &update.distortion {
        raw.set(DISTORTION_ENABLE, distortion.enable);
        raw.set(DISTORTION_AMOUNT, distortion.amount);
    }
    if let Some(chorus) = &update.chorus {
        raw.set(CHORUS_ENABLE, chorus.enable);
        raw.set(CHORUS_RATE, chorus.rate);
        raw.set(CHORUS_DEPTH, chorus.depth);
        raw.set(CHORUS_FEEDBACK, chorus.feedback);
        raw.set(CHORUS_MIX, chorus.mix);
    }
    if let Some(level) = update.reverb_send {
        raw.set(REVERB_SEND, level);
    }
    if let Some(level) = update.delay_send {
        raw.set(DELAY_SEND, level);
    }

    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_patch_values() {
        let raw = RawPatch::init(3);
        let params = raw.params();
        assert_eq!(params.name, "Init 4");
        assert_eq!(params.osc_a.wave, 2);
        assert_eq!(params.osc_a.mix, 100);
        assert_eq!(params.filter.cutoff, 100);
        assert_eq!(params.filter.filter_type, 1);
        assert_eq!(params.amp_env, Envelope::new(0, 30, 100, 30));
        assert_eq!(params.amp.pan, 64);
        // Zeroed bytes decode as zero, not as the truncation defaults
        assert_eq!(params.filter_env, Envelope::new(0, 0, 0, 0));
        assert_eq!(raw.as_bytes()[153..], [0u8; 67]);
    }

    #[test]
    fn test_decode_truncated_input_uses_defaults() {
        let params = decode(&[b'B', b'a', b's', b's']);
        assert_eq!(params.name, "Bass");
        assert_eq!(params.osc_a.coarse, 64);
        assert_eq!(params.filter_env, FILTER_ENV_DEFAULT);
        assert_eq!(params.mod_envs, [MOD_ENV_DEFAULT; 3]);
        assert_eq!(params.mod_matrix[19].depth, 64);
        assert_eq!(params.chorus.mix, 64);
    }

    #[test]
    fn test_decode_empty_name_is_unnamed() {
        let mut bytes = [0u8; PATCH_DATA_BYTES];
        bytes[..3].copy_from_slice(b"   ");
        assert_eq!(decode_name(&bytes), UNNAMED);
        assert_eq!(decode_name(&[]), UNNAMED);
    }

    #[test]
    fn test_name_strips_interior_nulls_and_trims() {
        let mut bytes = [0u8; PATCH_DATA_BYTES];
        bytes[..8].copy_from_slice(b" Pad\0 X ");
        assert_eq!(decode_name(&bytes), "Pad X");
    }

    #[test]
    fn test_from_bytes_masks_and_pads() {
        let raw = RawPatch::from_bytes(&[0xC1, 0x42]);
        assert_eq!(raw.as_bytes()[0], 0x41);
        assert_eq!(raw.as_bytes()[1], 0x42);
        assert_eq!(raw.as_bytes().len(), PATCH_DATA_BYTES);
        assert!(raw.as_bytes()[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_partial_masks_values() {
        let update = PatchUpdate {
            reverb_send: Some(0xFF),
            ..Default::default()
        };
        let raw = encode_partial(&update, None);
        assert_eq!(raw.as_bytes()[REVERB_SEND], 0x7F);
    }

    #[test]
    fn test_encode_partial_list_groups_skip_none_entries() {
        let existing = RawPatch::init(0);
        let update = PatchUpdate {
            mod_envs: Some(vec![None, Some(Envelope::new(1, 2, 3, 4))]),
            mod_matrix: Some(vec![None, None, Some(ModSlot {
                source: 5,
                destination: 9,
                depth: 100,
            })]),
            macros: Some(vec![10, 20]),
            ..Default::default()
        };
        let raw = encode_partial(&update, Some(&existing));
        let params = raw.params();
        assert_eq!(params.mod_envs[0], existing.params().mod_envs[0]);
        assert_eq!(params.mod_envs[1], Envelope::new(1, 2, 3, 4));
        assert_eq!(params.mod_matrix[1], existing.params().mod_matrix[1]);
        assert_eq!(params.mod_matrix[2].destination, 9);
        assert_eq!(params.macros, [10, 20, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_raw_patch_serde_rejects_wrong_length() {
        let json = serde_json::to_string(&RawPatch::init(0)).unwrap();
        let back: RawPatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RawPatch::init(0));
        assert!(serde_json::from_str::<RawPatch>("[1,2,3]").is_err());
    }

    #[test]
    fn test_patch_update_from_json() {
        let update: PatchUpdate =
            serde_json::from_str(r#"{"filter":{"cutoff":20,"resonance":90,"drive":0,"type":3,"envAmt":64,"velocity":0}}"#)
                .unwrap();
        let filter = update.filter.unwrap();
        assert_eq!(filter.filter_type, 3);
        assert_eq!(filter.mod1_amt, None);
        assert!(update.osc_a.is_none());
        assert!(PatchUpdate::default().is_empty());
    }

    #[test]
    fn test_filter_update_without_mod_amounts_keeps_them() {
        let mut bytes = RawPatch::init(0).as_bytes().to_vec();
        bytes[FILTER_MOD1_AMT] = 90;
        bytes[FILTER_MOD2_AMT] = 33;
        let existing = RawPatch::from_bytes(&bytes);

        let update: PatchUpdate =
            serde_json::from_str(r#"{"filter":{"cutoff":20,"resonance":90,"drive":0,"type":3,"envAmt":64,"velocity":0}}"#)
                .unwrap();
        let out = encode_partial(&update, Some(&existing));
        assert_eq!(out.as_bytes()[FILTER_CUTOFF], 20);
        assert_eq!(out.as_bytes()[FILTER_TYPE], 3);
        assert_eq!(out.as_bytes()[FILTER_MOD1_AMT], 90);
        assert_eq!(out.as_bytes()[FILTER_MOD2_AMT], 33);

        let update: PatchUpdate = serde_json::from_str(
            r#"{"filter":{"cutoff":20,"resonance":90,"drive":0,"type":3,"envAmt":64,"velocity":0,"mod2Amt":7}}"#,
        )
        .unwrap();
        let out = encode_partial(&update, Some(&existing));
        assert_eq!(out.as_bytes()[FILTER_MOD1_AMT], 90);
        assert_eq!(out.as_bytes()[FILTER_MOD2_AMT], 7);
    }

    #[test]
    fn test_decoded_filter_carries_mod_amounts() {
        let mut bytes = RawPatch::init(0).as_bytes().to_vec();
        bytes[FILTER_MOD1_AMT] = 12;
        let params = decode(&bytes);
        assert_eq!(params.filter.mod1_amt, Some(12));
        assert_eq!(params.filter.mod2_amt, Some(0));
    }
}
