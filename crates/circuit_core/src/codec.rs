//! 7-bit packing for SysEx payloads.
//!
//! SysEx data bytes must keep bit 7 clear. Payloads are split into groups of up
//! to seven bytes; each group is preceded by a flag byte whose bit `j` carries
//! bit 7 of the group's `j`-th byte. A short final group is not padded.

/// Raw bytes per packed group.
pub const GROUP_LEN: usize = 7;

/// Packed bytes per full group (flag byte plus seven data bytes).
pub const PACKED_GROUP_LEN: usize = GROUP_LEN + 1;

/// Pack arbitrary bytes into a 7-bit-safe stream.
pub fn pack(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed_len(raw.len()));
    for chunk in raw.chunks(GROUP_LEN) {
        let flags = chunk
            .iter()
            .enumerate()
            .fold(0u8, |flags, (j, byte)| flags | ((byte >> 7) << j));
        out.push(flags);
        out.extend(chunk.iter().map(|byte| byte & 0x7F));
    }
    out
}

/// Reverse of [`pack`]. A truncated final group decodes only the bytes present.
pub fn unpack(packed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed.len() / PACKED_GROUP_LEN * GROUP_LEN + GROUP_LEN);
    for group in packed.chunks(PACKED_GROUP_LEN) {
        let Some((&flags, data)) = group.split_first() else {
            continue;
        };
        out.extend(
            data.iter()
                .enumerate()
                .map(|(j, byte)| (byte & 0x7F) | (((flags >> j) & 1) << 7)),
        );
    }
    out
}

/// Length of the packed form of `n` raw bytes.
pub const fn packed_len(n: usize) -> usize {
    let full = n / GROUP_LEN;
    let rest = n % GROUP_LEN;
    if rest == 0 {
        full * PACKED_GROUP_LEN
    } else {
        full * PACKED_GROUP_LEN + 1 + rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_sets_flag_bits_for_high_bytes() {
        let packed = pack(&[0x80, 0x01, 0xFF]);
        assert_eq!(packed, vec![0b101, 0x00, 0x01, 0x7F]);
    }

    #[test]
    fn test_pack_full_group() {
        let raw = [0x10, 0x90, 0x20, 0xA0, 0x30, 0xB0, 0x40];
        let packed = pack(&raw);
        assert_eq!(packed.len(), 8);
        assert_eq!(packed[0], 0b0101010);
        assert_eq!(&packed[1..], &[0x10, 0x10, 0x20, 0x20, 0x30, 0x30, 0x40]);
    }

    #[test]
    fn test_pack_empty() {
        assert!(pack(&[]).is_empty());
        assert!(unpack(&[]).is_empty());
    }

    #[test]
    fn test_unpack_truncated_group() {
        // Flag byte plus two of seven data bytes
        assert_eq!(unpack(&[0b10, 0x05, 0x06]), vec![0x05, 0x86]);
        // A lone flag byte yields nothing
        assert_eq!(unpack(&[0x7F]), Vec::<u8>::new());
    }

    #[test]
    fn test_patch_payload_is_256_bytes() {
        assert_eq!(packed_len(220), 256);
        assert_eq!(pack(&[0u8; 220]).len(), 256);
    }
}
