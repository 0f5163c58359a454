//! SysEx frame building and parsing.

use serde::{Deserialize, Serialize};

use crate::codec::{pack, unpack};
use crate::params::{PatchParams, RawPatch};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

pub const MANUFACTURER_ID: [u8; 3] = [0x00, 0x20, 0x29];
pub const PRODUCT_FAMILY: u8 = 0x01;
pub const PRODUCT_CIRCUIT_TRACKS: u8 = 0x64;

// Host to device
pub const CMD_WRITE_PATCH: u8 = 0x05;
pub const CMD_REPLACE_CURRENT_PATCH: u8 = 0x06;
pub const CMD_REQUEST_PATCH_DUMP: u8 = 0x40;
pub const CMD_REQUEST_CURRENT_PATCH: u8 = 0x63;

// Device to host
pub const CMD_PATCH_DUMP: u8 = 0x01;
pub const CMD_CURRENT_PATCH_DUMP: u8 = 0x02;

/// Patches per synth bank.
pub const BANK_SIZE: usize = 64;

/// Header bytes before the command selector: start, manufacturer, family, product, command.
const HEADER_LEN: usize = 7;

/// Shortest frame accepted by [`parse_frame`].
pub const MIN_FRAME_LEN: usize = 10;

/// One of the two synth engines; each owns an independent patch bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Track {
    Synth1,
    Synth2,
}

impl Track {
    pub const ALL: [Track; 2] = [Track::Synth1, Track::Synth2];

    /// Selector byte sent after current-patch commands.
    pub fn selector(self) -> u8 {
        match self {
            Track::Synth1 => 0,
            Track::Synth2 => 1,
        }
    }

    pub fn index(self) -> usize {
        self.selector() as usize
    }

    /// 1-based track number as shown on the device.
    pub fn number(self) -> u8 {
        self.selector() + 1
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Track::Synth1),
            2 => Some(Track::Synth2),
            _ => None,
        }
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Synth {}", self.number())
    }
}

fn frame(command: u8, selector: &[u8], payload: Option<&RawPatch>) -> Vec<u8> {
    let payload = payload.map(|raw| pack(raw.as_bytes())).unwrap_or_default();
    let mut out = Vec::with_capacity(HEADER_LEN + selector.len() + payload.len() + 1);
    out.push(SYSEX_START);
    out.extend_from_slice(&MANUFACTURER_ID);
    out.push(PRODUCT_FAMILY);
    out.push(PRODUCT_CIRCUIT_TRACKS);
    out.push(command);
    out.extend_from_slice(selector);
    out.extend_from_slice(&payload);
    out.push(SYSEX_END);
    out
}

pub fn request_current_patch(track: Track) -> Vec<u8> {
    frame(CMD_REQUEST_CURRENT_PATCH, &[track.selector()], None)
}

pub fn request_patch_dump(index: u8, bank: u8) -> Vec<u8> {
    frame(CMD_REQUEST_PATCH_DUMP, &[bank, index], None)
}

/// Load `raw` into the track's edit buffer without storing it.
pub fn replace_current_patch(raw: &RawPatch, track: Track) -> Vec<u8> {
    frame(CMD_REPLACE_CURRENT_PATCH, &[track.selector()], Some(raw))
}

/// Store `raw` at a bank location on the device.
pub fn write_patch(raw: &RawPatch, index: u8, bank: u8) -> Vec<u8> {
    frame(CMD_WRITE_PATCH, &[bank, index], Some(raw))
}

/// Dump message in the device's own format, as found in `.syx` files.
pub fn patch_dump_message(raw: &RawPatch, index: u8, bank: u8) -> Vec<u8> {
    frame(CMD_PATCH_DUMP, &[bank, index], Some(raw))
}

/// Concatenated dump messages for a whole bank. Missing or absent slots are
/// filled with [`RawPatch::init`].
pub fn bank_syx(patches: &[Option<RawPatch>]) -> Vec<u8> {
    let mut out = Vec::new();
    for index in 0..BANK_SIZE {
        let msg = match patches.get(index) {
            Some(Some(raw)) => patch_dump_message(raw, index as u8, 0),
            _ => patch_dump_message(&RawPatch::init(index), index as u8, 0),
        };
        out.extend(msg);
    }
    out
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    PatchDump {
        bank: u8,
        index: u8,
        raw: RawPatch,
        params: PatchParams,
    },
    CurrentPatchDump {
        bank: u8,
        raw: RawPatch,
        params: PatchParams,
    },
    Unknown {
        command: u8,
        data: Vec<u8>,
    },
}

impl ParsedFrame {
    pub fn command(&self) -> u8 {
        match self {
            ParsedFrame::PatchDump { .. } => CMD_PATCH_DUMP,
            ParsedFrame::CurrentPatchDump { .. } => CMD_CURRENT_PATCH_DUMP,
            ParsedFrame::Unknown { command, .. } => *command,
        }
    }

    pub fn raw(&self) -> Option<&RawPatch> {
        match self {
            ParsedFrame::PatchDump { raw, .. } | ParsedFrame::CurrentPatchDump { raw, .. } => Some(raw),
            ParsedFrame::Unknown { .. } => None,
        }
    }
}

/// Whether `bytes` is a complete frame addressed from or to a Circuit Tracks.
pub fn is_device_frame(bytes: &[u8]) -> bool {
    bytes.len() >= MIN_FRAME_LEN
        && bytes[0] == SYSEX_START
        && bytes[bytes.len() - 1] == SYSEX_END
        && bytes[1..4] == MANUFACTURER_ID
        && bytes[4] == PRODUCT_FAMILY
        && bytes[5] == PRODUCT_CIRCUIT_TRACKS
}

/// Validate and decode a frame. Anything not addressed to a Circuit Tracks
/// yields `None`.
pub fn parse_frame(bytes: &[u8]) -> Option<ParsedFrame> {
    if !is_device_frame(bytes) {
        return None;
    }
    let body = &bytes[..bytes.len() - 1];
    let command = body[6];
    let parsed = match command {
        CMD_PATCH_DUMP => {
            let raw = RawPatch::from_bytes(&unpack(&body[9..]));
            ParsedFrame::PatchDump {
                bank: body[7],
                index: body[8],
                params: raw.params(),
                raw,
            }
        }
        CMD_CURRENT_PATCH_DUMP => {
            let raw = RawPatch::from_bytes(&unpack(&body[8..]));
            ParsedFrame::CurrentPatchDump {
                bank: body[7],
                params: raw.params(),
                raw,
            }
        }
        command => ParsedFrame::Unknown {
            command,
            data: body[7..].to_vec(),
        },
    };
    Some(parsed)
}

/// Command byte of an `F0`-framed message, without further validation.
pub fn command_byte(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [SYSEX_START, _, _, _, _, _, command, ..] => Some(*command),
        _ => None,
    }
}

/// Iterator over candidate frames in a byte stream: each `F0` through the next
/// `F7` inclusive. Bytes outside candidates are skipped, and an unterminated
/// trailing frame is dropped.
pub fn split_frames(bytes: &[u8]) -> SplitFrames<'_> {
    SplitFrames { rest: bytes }
}

pub struct SplitFrames<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for SplitFrames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.rest.iter().position(|&b| b == SYSEX_START)?;
        let candidate = &self.rest[start..];
        let Some(end) = candidate.iter().position(|&b| b == SYSEX_END) else {
            self.rest = &[];
            return None;
        };
        let (frame, rest) = candidate.split_at(end + 1);
        self.rest = rest;
        Some(frame)
    }
}

/// A patch dump found in a `.syx` file.
#[derive(Debug, Clone, PartialEq)]
pub struct SyxPatch {
    pub bank: u8,
    pub index: u8,
    pub raw: RawPatch,
}

/// Every patch-dump frame in `bytes`, in file order.
pub fn parse_syx_file(bytes: &[u8]) -> Vec<SyxPatch> {
    split_frames(bytes)
        .filter_map(parse_frame)
        .filter_map(|frame| match frame {
            ParsedFrame::PatchDump { bank, index, raw, .. } => Some(SyxPatch { bank, index, raw }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_messages() {
        assert_eq!(
            request_current_patch(Track::Synth2),
            vec![0xF0, 0x00, 0x20, 0x29, 0x01, 0x64, 0x63, 0x01, 0xF7]
        );
        assert_eq!(
            request_patch_dump(12, 0),
            vec![0xF0, 0x00, 0x20, 0x29, 0x01, 0x64, 0x40, 0x00, 0x0C, 0xF7]
        );
    }

    #[test]
    fn test_payload_messages_have_packed_patch() {
        let raw = RawPatch::init(0);
        let replace = replace_current_patch(&raw, Track::Synth1);
        assert_eq!(replace.len(), 7 + 1 + 256 + 1);
        assert_eq!(replace[6], CMD_REPLACE_CURRENT_PATCH);

        let write = write_patch(&raw, 5, 0);
        assert_eq!(write.len(), 7 + 2 + 256 + 1);
        assert_eq!(&write[6..9], &[CMD_WRITE_PATCH, 0, 5]);
        assert_eq!(*write.last().unwrap(), SYSEX_END);
    }

    #[test]
    fn test_current_patch_dump_parses() {
        let mut raw = RawPatch::init(0);
        raw.set_name("Lead");
        let mut msg = vec![0xF0, 0x00, 0x20, 0x29, 0x01, 0x64, CMD_CURRENT_PATCH_DUMP, 0x00];
        msg.extend(pack(raw.as_bytes()));
        msg.push(0xF7);

        match parse_frame(&msg) {
            Some(ParsedFrame::CurrentPatchDump { bank, raw: parsed, params }) => {
                assert_eq!(bank, 0);
                assert_eq!(parsed, raw);
                assert_eq!(params.name, "Lead");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command_keeps_data() {
        let msg = [0xF0, 0x00, 0x20, 0x29, 0x01, 0x64, 0x33, 0x01, 0x02, 0xF7];
        assert_eq!(
            parse_frame(&msg),
            Some(ParsedFrame::Unknown {
                command: 0x33,
                data: vec![0x01, 0x02],
            })
        );
    }

    #[test]
    fn test_short_dump_payload_is_padded() {
        let msg = [0xF0, 0x00, 0x20, 0x29, 0x01, 0x64, CMD_PATCH_DUMP, 0x00, 0x07, 0x00, b'A', 0xF7];
        let Some(ParsedFrame::PatchDump { index, raw, .. }) = parse_frame(&msg) else {
            panic!("expected patch dump");
        };
        assert_eq!(index, 7);
        assert_eq!(raw.as_bytes()[0], b'A');
        assert_eq!(raw.as_bytes().len(), 220);
    }

    #[test]
    fn test_command_byte() {
        assert_eq!(command_byte(&request_patch_dump(0, 0)), Some(CMD_REQUEST_PATCH_DUMP));
        assert_eq!(command_byte(&[0xF0, 0x00, 0x20]), None);
        assert_eq!(command_byte(&[0x90, 0, 0, 0, 0, 0, 0x01]), None);
    }

    #[test]
    fn test_split_frames_drops_unterminated_tail() {
        let bytes = [0x11, 0xF0, 0x01, 0xF7, 0x22, 0xF0, 0x02];
        let frames: Vec<_> = split_frames(&bytes).collect();
        assert_eq!(frames, vec![&[0xF0, 0x01, 0xF7][..]]);
    }

    #[test]
    fn test_bank_syx_fills_missing_slots() {
        let mut patches = vec![None; BANK_SIZE];
        let mut custom = RawPatch::init(0);
        custom.set_name("Custom");
        patches[2] = Some(custom.clone());

        let patches = parse_syx_file(&bank_syx(&patches));
        assert_eq!(patches.len(), BANK_SIZE);
        assert_eq!(patches[2].raw, custom);
        assert_eq!(patches[63].raw, RawPatch::init(63));
        assert!(patches.iter().enumerate().all(|(i, p)| p.index as usize == i && p.bank == 0));
    }

    #[test]
    fn test_track_numbers() {
        assert_eq!(Track::from_number(2), Some(Track::Synth2));
        assert_eq!(Track::from_number(3), None);
        assert_eq!(Track::Synth1.to_string(), "Synth 1");
    }
}
