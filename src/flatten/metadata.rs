// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::fmt;
use crate::util::{ByteDecoder, ByteEncoder};
use super::BasicBlock;

/// The validation tag stamped on flattened prototypes and metadata
/// blobs ("CFF\0").
pub const CFF_MAGIC: u32 = 0x43464600;
/// The metadata format version.
pub const CFF_VERSION: u32 = 1;

/// Per-block record size in the serialised form: eight 32-bit fields.
const BLOCK_RECORD_SIZE: usize = 32;
/// Fixed header size: magic, version, block count, state register and
/// seed.
const HEADER_SIZE: usize = 20;

// ============================================================================
// Errors
// ============================================================================

/// An error arising when decoding a metadata blob.  Partial or
/// corrupted metadata is never trusted.
pub enum MetadataError {
    /// The blob does not begin with the expected magic number.
    InvalidMagicNumber(u32),
    /// The blob carries an unsupported format version.
    UnsupportedVersion(u32),
    /// The blob is shorter than its own block count requires.
    UnexpectedEndOfBlob,
    /// The blob carries trailing bytes past the final block record.
    ExpectedEndOfBlob,
}

impl Default for MetadataError {
    fn default() -> Self {
        MetadataError::UnexpectedEndOfBlob
    }
}

impl fmt::Debug for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MetadataError::InvalidMagicNumber(w) => write!(f, "invalid magic number ({:#x})", w),
            MetadataError::UnsupportedVersion(w) => write!(f, "unsupported version ({})", w),
            MetadataError::UnexpectedEndOfBlob => write!(f, "unexpected end-of-bytes"),
            MetadataError::ExpectedEndOfBlob => write!(f, "unexpected trailing bytes"),
        }
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Just reuse debug formatting.
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for MetadataError {}

// ============================================================================
// Metadata
// ============================================================================

/// A record of one applied flattening transform: which register holds
/// the state, which seed drove the transform and the block
/// decomposition that was dispatched over.  Serialises to the
/// little-endian, bit-exact layout below:
///
/// ```txt
/// magic      u32 = 0x43464600
/// version    u32 = 1
/// num_blocks u32
/// state_reg  u32
/// seed       u32
/// blocks[num_blocks], 32 bytes each:
///   start_pc, end_pc, state_id, original_target,
///   fall_through, cond_target, is_entry, is_exit
/// ```
///
/// Absent successors are written as -1.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    pub state_reg: u32,
    pub seed: u32,
    pub blocks: Vec<BasicBlock>,
}

impl Metadata {
    /// Serialise this metadata into its binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = ByteEncoder::new();
        enc.encode_u32(CFF_MAGIC);
        enc.encode_u32(CFF_VERSION);
        enc.encode_u32(self.blocks.len() as u32);
        enc.encode_u32(self.state_reg);
        enc.encode_u32(self.seed);
        for b in &self.blocks {
            enc.encode_i32(b.start_pc as i32);
            enc.encode_i32(b.end_pc as i32);
            enc.encode_i32(b.state_id as i32);
            enc.encode_i32(encode_link(b.original_target));
            enc.encode_i32(encode_link(b.fall_through));
            enc.encode_i32(encode_link(b.cond_target));
            enc.encode_i32(b.is_entry as i32);
            enc.encode_i32(b.is_exit as i32);
        }
        enc.to_vec()
    }

    /// Reconstruct metadata from its binary form, validating the
    /// magic number, version and overall length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Metadata, MetadataError> {
        let mut dec = ByteDecoder::new(bytes);
        dec.match_u32(CFF_MAGIC, MetadataError::InvalidMagicNumber)?;
        dec.match_u32(CFF_VERSION, MetadataError::UnsupportedVersion)?;
        let num_blocks = dec.decode_u32()? as usize;
        let state_reg = dec.decode_u32()?;
        let seed = dec.decode_u32()?;
        // Validate the advertised size before trusting the count.
        let expected = num_blocks
            .checked_mul(BLOCK_RECORD_SIZE)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or(MetadataError::UnexpectedEndOfBlob)?;
        if bytes.len() < expected {
            return Err(MetadataError::UnexpectedEndOfBlob);
        }
        let mut blocks = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            let start_pc = dec.decode_i32()? as usize;
            let end_pc = dec.decode_i32()? as usize;
            let state_id = dec.decode_i32()? as usize;
            let original_target = decode_link(dec.decode_i32()?);
            let fall_through = decode_link(dec.decode_i32()?);
            let cond_target = decode_link(dec.decode_i32()?);
            let is_entry = dec.decode_i32()? != 0;
            let is_exit = dec.decode_i32()? != 0;
            blocks.push(BasicBlock {
                start_pc,
                end_pc,
                state_id,
                original_target,
                fall_through,
                cond_target,
                is_entry,
                is_exit,
            });
        }
        dec.match_eof(MetadataError::ExpectedEndOfBlob)?;
        Ok(Metadata { state_reg, seed, blocks })
    }

    /// The size in bytes of this metadata's serialised form.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE + BLOCK_RECORD_SIZE * self.blocks.len()
    }
}

fn encode_link(link: Option<usize>) -> i32 {
    match link {
        Some(i) => i as i32,
        None => -1,
    }
}

fn decode_link(raw: i32) -> Option<usize> {
    if raw < 0 {
        None
    } else {
        Some(raw as usize)
    }
}
