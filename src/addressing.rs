//! Packed-address arithmetic. Routine and string addresses inside a story
//! file are stored "packed" to let a 16-bit field address more than 128KiB
//! of high memory; the packing factor (and, for v6/v7, an additional
//! per-kind offset) depends on the story's version.

use crate::header::Header;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedKind {
    Routine,
    String,
}

/// Unpacks a packed address into an absolute byte address.
///
/// A packed value of 0 is the conventional "null" address and is returned
/// unchanged (callers treat 0 as "no routine" / "no string").
pub fn unpack(packed: u16, kind: PackedKind, header: &Header) -> u32 {
    if packed == 0 {
        return 0;
    }
    let addr = packed as u32;
    match header.version {
        1..=3 => addr * 2,
        4 | 5 => addr * 4,
        6 | 7 => {
            let offset = match kind {
                PackedKind::Routine => header.routine_offset,
                PackedKind::String => header.string_offset,
            };
            addr * 4 + 8 * (offset as u32)
        }
        _ => addr * 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_version(version: u8) -> Header {
        let mut bytes = vec![0u8; 64];
        bytes[0] = version;
        bytes[0x04] = 0x10;
        bytes[0x06] = 0x50;
        bytes[0x0c] = 0x01;
        bytes[0x0e] = 0x02;
        if version == 6 || version == 7 {
            bytes[0x29] = 0x04; // routine_offset = 4 -> +32 bytes
            bytes[0x2b] = 0x08; // string_offset = 8 -> +64 bytes
        }
        Header::new(&bytes).unwrap()
    }

    #[test]
    fn v3_doubles() {
        let h = header_with_version(3);
        assert_eq!(unpack(0x1234, PackedKind::Routine, &h), 0x2468);
    }

    #[test]
    fn v5_quadruples() {
        let h = header_with_version(5);
        assert_eq!(unpack(0x1234, PackedKind::String, &h), 0x48d0);
    }

    #[test]
    fn v6_applies_kind_specific_offset() {
        let h = header_with_version(6);
        assert_eq!(unpack(0x1000, PackedKind::Routine, &h), 0x1000 * 4 + 32);
        assert_eq!(unpack(0x1000, PackedKind::String, &h), 0x1000 * 4 + 64);
    }

    #[test]
    fn v8_multiplies_by_eight() {
        let h = header_with_version(8);
        assert_eq!(unpack(0x1000, PackedKind::Routine, &h), 0x8000);
    }

    #[test]
    fn null_packed_address_stays_null() {
        let h = header_with_version(5);
        assert_eq!(unpack(0, PackedKind::Routine, &h), 0);
    }
}
