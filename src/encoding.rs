//! Chunk block codec: delta-varint timestamps and Gorilla-XOR values in a
//! CRC-checked container.
//!
//! The in-memory engine never needs this module; it exists for store bridges
//! that serialize finished chunks before shipping them to durable storage.

use crate::chunk::Chunk;
use crate::error::TierError;
use crate::types::{Timestamp, Value};

use crc32fast::Hasher as Crc32;
use std::io::Read;

/// Chunk block magic bytes.
pub const CHUNK_BLOCK_MAGIC: &[u8; 8] = b"FRNCHK01";

const CHUNK_BLOCK_V1: u32 = 1;

/// Encodes a chunk into a self-describing binary block.
///
/// Layout: magic, version, `t0`, point count, payload length, payload CRC32,
/// payload. The payload is the first timestamp followed by varint deltas,
/// then the Gorilla-XOR bitstream over the IEEE-754 value bits.
pub fn encode_chunk(chunk: &Chunk) -> Result<Vec<u8>, TierError> {
    let timestamps = chunk.timestamps();
    let values = chunk.values();
    if timestamps.is_empty() {
        return Err(TierError::Internal(
            "Refusing to encode an empty chunk".to_string(),
        ));
    }

    let mut payload: Vec<u8> = Vec::new();

    write_u32(&mut payload, timestamps[0]);
    let mut prev = timestamps[0];
    for &ts in &timestamps[1..] {
        if ts < prev {
            return Err(TierError::Internal(
                "Chunk timestamps must be non-decreasing for delta encoding".to_string(),
            ));
        }
        write_var_u32(&mut payload, ts - prev);
        prev = ts;
    }

    let bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
    encode_xor_values(&bits, &mut payload)?;

    let payload_len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| TierError::Internal("Chunk block payload too large".to_string()))?;

    let mut buf = Vec::with_capacity(28 + payload.len());
    buf.extend_from_slice(CHUNK_BLOCK_MAGIC);
    write_u32(&mut buf, CHUNK_BLOCK_V1);
    write_u32(&mut buf, chunk.t0());
    write_u32(&mut buf, timestamps.len() as u32);
    write_u32(&mut buf, payload_len);
    write_u32(&mut buf, crc32(&payload));
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes a block produced by [`encode_chunk`] into a finished chunk.
pub fn decode_chunk(block: &[u8]) -> Result<Chunk, TierError> {
    let mut cur = std::io::Cursor::new(block);
    let mut magic = [0u8; 8];
    cur.read_exact(&mut magic)?;
    if &magic != CHUNK_BLOCK_MAGIC {
        return Err(TierError::Corruption("Bad chunk block magic".to_string()));
    }
    let version = read_u32(&mut cur)?;
    if version != CHUNK_BLOCK_V1 {
        return Err(TierError::Corruption(format!(
            "Unexpected chunk block version {}",
            version
        )));
    }
    let t0 = read_u32(&mut cur)?;
    let count = read_u32(&mut cur)? as usize;
    if count == 0 {
        return Err(TierError::Corruption("Empty chunk block".to_string()));
    }
    let payload_len = read_u32(&mut cur)? as usize;
    let expected_crc = read_u32(&mut cur)?;

    let hdr_len = cur.position() as usize;
    if hdr_len.checked_add(payload_len).unwrap_or(usize::MAX) > block.len() {
        return Err(TierError::Corruption(
            "Truncated chunk block payload".to_string(),
        ));
    }
    let payload = &block[hdr_len..hdr_len + payload_len];
    if crc32(payload) != expected_crc {
        return Err(TierError::Corruption(
            "Chunk block payload CRC mismatch".to_string(),
        ));
    }

    let mut cur = std::io::Cursor::new(payload);
    let first = read_u32(&mut cur)?;
    let mut timestamps: Vec<Timestamp> = Vec::with_capacity(count);
    timestamps.push(first);
    let mut prev = first;
    for _ in 1..count {
        let delta = read_var_u32(&mut cur).map_err(TierError::Corruption)?;
        let ts = prev.checked_add(delta).ok_or_else(|| {
            TierError::Corruption("Timestamp delta overflows u32".to_string())
        })?;
        timestamps.push(ts);
        prev = ts;
    }

    let bits = decode_xor_values(&mut cur, count)?;
    let values: Vec<Value> = bits.into_iter().map(f64::from_bits).collect();

    Ok(Chunk::from_columns(t0, timestamps, values))
}

// --- primitive helpers ---

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, TierError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn write_var_u32(buf: &mut Vec<u8>, mut v: u32) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn read_var_u32<R: Read>(r: &mut R) -> Result<u32, String> {
    let mut out: u32 = 0;
    let mut shift: u32 = 0;
    for _ in 0..5 {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)
            .map_err(|e| format!("Truncated varint: {}", e))?;
        let byte = b[0];
        out |= u32::from(byte & 0x7F) << shift;
        if (byte & 0x80) == 0 {
            return Ok(out);
        }
        shift += 7;
    }
    Err("Varint too long".to_string())
}

#[inline]
fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

// --- Gorilla-XOR bitstream over 64-bit value words ---

struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    cur: u8,
    used: u8,
}

impl<'a> BitWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out, cur: 0, used: 0 }
    }

    fn push_bit(&mut self, bit: bool) {
        if bit {
            self.cur |= 1 << (7 - self.used);
        }
        self.used += 1;
        if self.used == 8 {
            self.out.push(self.cur);
            self.cur = 0;
            self.used = 0;
        }
    }

    fn push_bits(&mut self, mut v: u64, count: u8) {
        if count == 0 {
            return;
        }
        if count < 64 {
            v &= (1u64 << count) - 1;
        }
        for i in (0..count).rev() {
            self.push_bit(((v >> i) & 1) == 1);
        }
    }

    fn finish(self) {
        if self.used > 0 {
            self.out.push(self.cur);
        }
    }
}

struct BitReader<'a, R: Read> {
    r: &'a mut R,
    cur: u8,
    left: u8,
}

impl<'a, R: Read> BitReader<'a, R> {
    fn new(r: &'a mut R) -> Self {
        Self { r, cur: 0, left: 0 }
    }

    fn read_bit(&mut self) -> Result<bool, TierError> {
        if self.left == 0 {
            let mut b = [0u8; 1];
            self.r.read_exact(&mut b).map_err(TierError::Io)?;
            self.cur = b[0];
            self.left = 8;
        }
        let bit = (self.cur & (1u8 << (self.left - 1))) != 0;
        self.left -= 1;
        Ok(bit)
    }

    fn read_bits(&mut self, count: u8) -> Result<u64, TierError> {
        let mut out = 0u64;
        for _ in 0..count {
            out <<= 1;
            out |= u64::from(self.read_bit()?);
        }
        Ok(out)
    }
}

fn encode_xor_values(values: &[u64], out: &mut Vec<u8>) -> Result<(), TierError> {
    if values.is_empty() {
        return Err(TierError::Internal(
            "Cannot XOR-encode empty values".to_string(),
        ));
    }
    out.extend_from_slice(&values[0].to_le_bytes());
    let mut bw = BitWriter::new(out);

    let mut prev = values[0];
    let mut prev_leading: u8 = 0;
    let mut prev_trailing: u8 = 0;
    let mut prev_sigbits: u8 = 0;

    for &cur in &values[1..] {
        let x = prev ^ cur;
        if x == 0 {
            bw.push_bit(false);
        } else {
            bw.push_bit(true);
            let leading = x.leading_zeros() as u8;
            let trailing = x.trailing_zeros() as u8;
            let sigbits = 64 - leading - trailing;

            if prev_sigbits != 0 && leading >= prev_leading && trailing >= prev_trailing {
                // meaningful bits fit inside the previous window: reuse it
                bw.push_bit(false);
                bw.push_bits(x >> prev_trailing, prev_sigbits);
            } else {
                bw.push_bit(true);
                bw.push_bits(u64::from(leading), 6);
                bw.push_bits(u64::from(sigbits - 1), 6);
                bw.push_bits(x >> trailing, sigbits);
                prev_leading = leading;
                prev_trailing = trailing;
                prev_sigbits = sigbits;
            }
        }
        prev = cur;
    }
    bw.finish();
    Ok(())
}

fn decode_xor_values<R: Read>(r: &mut R, count: usize) -> Result<Vec<u64>, TierError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut first = [0u8; 8];
    r.read_exact(&mut first)?;
    let first = u64::from_le_bytes(first);

    let mut out = Vec::with_capacity(count);
    out.push(first);
    let mut br = BitReader::new(r);

    let mut prev = first;
    let mut prev_leading: u8 = 0;
    let mut prev_trailing: u8 = 0;
    let mut prev_sigbits: u8 = 0;

    for _ in 1..count {
        if !br.read_bit()? {
            // identical to the previous value
            out.push(prev);
            continue;
        }
        let new_window = br.read_bit()?;
        let (sigbits, trailing) = if !new_window {
            if prev_sigbits == 0 {
                return Err(TierError::Corruption(
                    "XOR window reuse before initialization".to_string(),
                ));
            }
            (prev_sigbits, prev_trailing)
        } else {
            let leading = br.read_bits(6)? as u8;
            let sigbits = (br.read_bits(6)? as u8) + 1;
            if leading > 63 || u32::from(leading) + u32::from(sigbits) > 64 {
                return Err(TierError::Corruption(
                    "Invalid XOR bit widths".to_string(),
                ));
            }
            let trailing = 64 - leading - sigbits;
            prev_leading = leading;
            prev_trailing = trailing;
            prev_sigbits = sigbits;
            (sigbits, trailing)
        };

        let significant = br.read_bits(sigbits)?;
        let cur = prev ^ (significant << trailing);
        out.push(cur);
        prev = cur;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn sample_chunk() -> Chunk {
        let mut chunk = Chunk::new(600);
        chunk.push(601, 12.5).unwrap();
        chunk.push(611, 12.5).unwrap();
        chunk.push(622, 13.25).unwrap();
        chunk.push(700, -4.0).unwrap();
        chunk.push(1199, 0.0).unwrap();
        chunk.finish();
        chunk
    }

    #[test]
    fn test_round_trip() {
        let chunk = sample_chunk();
        let block = encode_chunk(&chunk).unwrap();
        let decoded = decode_chunk(&block).unwrap();

        assert_eq!(decoded.t0(), 600);
        assert!(decoded.is_finished());
        assert_eq!(decoded.timestamps(), chunk.timestamps());
        assert_eq!(decoded.values(), chunk.values());
    }

    #[test]
    fn test_round_trip_single_point() {
        let mut chunk = Chunk::new(60);
        chunk.push(90, 42.0).unwrap();
        let block = encode_chunk(&chunk).unwrap();
        let decoded = decode_chunk(&block).unwrap();
        assert_eq!(decoded.timestamps(), &[90]);
        assert_eq!(decoded.values(), &[42.0]);
    }

    #[test]
    fn test_constant_values_compress_to_single_bits() {
        let mut chunk = Chunk::new(0);
        for i in 1..=100u32 {
            chunk.push(i, 7.0).unwrap();
        }
        let block = encode_chunk(&chunk).unwrap();
        // 28B header + 4B first ts + 99 one-byte deltas + 8B first value
        // + 99 zero bits: far below the raw 1200B representation.
        assert!(block.len() < 160, "block unexpectedly large: {}", block.len());

        let decoded = decode_chunk(&block).unwrap();
        assert_eq!(decoded.num_points(), 100);
        assert!(decoded.values().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_encode_empty_chunk_is_rejected() {
        let chunk = Chunk::new(60);
        assert!(matches!(
            encode_chunk(&chunk),
            Err(TierError::Internal(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut block = encode_chunk(&sample_chunk()).unwrap();
        block[0] ^= 0xFF;
        assert!(matches!(
            decode_chunk(&block),
            Err(TierError::Corruption(_))
        ));
    }

    #[test]
    fn test_decode_rejects_corrupt_payload() {
        let mut block = encode_chunk(&sample_chunk()).unwrap();
        let last = block.len() - 1;
        block[last] ^= 0xFF;
        assert!(matches!(
            decode_chunk(&block),
            Err(TierError::Corruption(_))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_block() {
        let block = encode_chunk(&sample_chunk()).unwrap();
        let truncated = &block[..block.len() - 3];
        assert!(decode_chunk(truncated).is_err());
    }
}
