//! LSB-first packing between bytes and bits.
//!
//! The bit order is normative on the wire: `bit[i*8 + b] = (byte[i] >> b) & 1`.

/// Expand bytes to one bit per element, least-significant bit first.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for b in 0..8 {
            bits.push((byte >> b) & 1);
        }
    }
    bits
}

/// Pack bits back into bytes, least-significant bit first.
/// A trailing partial byte is dropped.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(bits.len() / 8);
    for chunk in bits.chunks_exact(8) {
        let mut byte = 0u8;
        for (b, &bit) in chunk.iter().enumerate() {
            byte |= (bit & 1) << b;
        }
        bytes.push(byte);
    }
    bytes
}
