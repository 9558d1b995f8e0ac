//! XOR-RLE compression for Quetzal CMem chunks: XOR current dynamic memory
//! against the story's original image, then run-length encode the zero
//! bytes that result wherever nothing changed.

use crate::error::{ZError, ZResult};
use log::debug;

pub fn compress_memory(current: &[u8], original: &[u8]) -> Vec<u8> {
    assert_eq!(current.len(), original.len(), "memory sizes must match");

    let mut compressed = Vec::new();
    let mut i = 0;
    while i < current.len() {
        let xor_byte = current[i] ^ original[i];
        if xor_byte == 0 {
            let start = i;
            while i < current.len() && (current[i] ^ original[i]) == 0 {
                i += 1;
            }
            let mut remaining = i - start;
            while remaining > 256 {
                compressed.push(0);
                compressed.push(255);
                remaining -= 256;
            }
            if remaining > 0 {
                compressed.push(0);
                compressed.push((remaining - 1) as u8);
            }
        } else {
            compressed.push(xor_byte);
            i += 1;
        }
    }
    debug!(
        "compressed {} bytes to {} bytes",
        current.len(),
        compressed.len()
    );
    compressed
}

pub fn decompress_memory(compressed: &[u8], original: &[u8]) -> ZResult<Vec<u8>> {
    let mut decompressed = Vec::with_capacity(original.len());
    let mut ci = 0;
    let mut oi = 0;

    while ci < compressed.len() && oi < original.len() {
        let byte = compressed[ci];
        ci += 1;
        if byte == 0 {
            if ci >= compressed.len() {
                return Err(ZError::SaveIncompatible("truncated RLE run".into()));
            }
            let run_length = compressed[ci] as usize + 1;
            ci += 1;
            for _ in 0..run_length {
                if oi >= original.len() {
                    return Err(ZError::SaveIncompatible("RLE run overruns memory".into()));
                }
                decompressed.push(original[oi]);
                oi += 1;
            }
        } else {
            if oi >= original.len() {
                return Err(ZError::SaveIncompatible(
                    "compressed data overruns memory".into(),
                ));
            }
            decompressed.push(original[oi] ^ byte);
            oi += 1;
        }
    }
    while oi < original.len() {
        decompressed.push(original[oi]);
        oi += 1;
    }

    if decompressed.len() != original.len() {
        return Err(ZError::SaveIncompatible(format!(
            "decompressed size {} does not match original size {}",
            decompressed.len(),
            original.len()
        )));
    }
    Ok(decompressed)
}

pub struct CMemChunk {
    pub data: Vec<u8>,
}

impl CMemChunk {
    pub fn from_memory(current: &[u8], original: &[u8]) -> Self {
        CMemChunk {
            data: compress_memory(current, original),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn restore_to_memory(&self, original: &[u8]) -> ZResult<Vec<u8>> {
        decompress_memory(&self.data, original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_decompress_round_trips() {
        let original = vec![0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80];
        let current = vec![0x10, 0x21, 0x30, 0x40, 0x50, 0x60, 0x71, 0x80];
        let compressed = compress_memory(&current, &original);
        let restored = decompress_memory(&compressed, &original).unwrap();
        assert_eq!(current, restored);
    }

    #[test]
    fn long_runs_of_zeros_compress_well() {
        let original = vec![0xffu8; 1000];
        let mut current = original.clone();
        current[500] = 0xfe;
        let compressed = compress_memory(&current, &original);
        assert!(compressed.len() < current.len());
        let restored = decompress_memory(&compressed, &original).unwrap();
        assert_eq!(current, restored);
    }
}
