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
use super::{Constant, Instruction, OpCode, Proto};

/// The magic prefix of a serialised prototype tree ("LBCO").
pub const CHUNK_MAGIC: u32 = 0x4C42434F;
/// The current chunk format version.
pub const CHUNK_VERSION: u32 = 1;

// ============================================================================
// Decoding Error
// ============================================================================

/// An error which arises when attempting to decode a byte sequence
/// into a prototype tree.  In essence, this indicates the sequence is
/// malformed in some way.
pub enum ChunkError {
    /// Indicates the expected magic number was not present.
    InvalidMagicNumber(u32),
    /// Indicates the chunk has a version this implementation does not
    /// support.
    UnsupportedVersion(u32),
    /// Indicates an unknown constant-pool tag.
    InvalidConstantTag(u8),
    /// Indicates an instruction word whose opcode is outside the
    /// repertoire.
    InvalidOpcode(u8),
    /// Indicates a string constant which is not valid UTF-8.
    InvalidString,
    /// Indicates there were not enough bytes to complete decoding.
    UnexpectedEndOfChunk,
    /// Indicates unexpected trailing bytes after the prototype tree.
    ExpectedEndOfChunk,
}

impl Default for ChunkError {
    fn default() -> Self {
        ChunkError::UnexpectedEndOfChunk
    }
}

impl fmt::Debug for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChunkError::InvalidMagicNumber(w) => write!(f, "invalid magic number ({:#x})", w),
            ChunkError::UnsupportedVersion(w) => write!(f, "unsupported chunk version ({})", w),
            ChunkError::InvalidConstantTag(t) => write!(f, "invalid constant tag ({:#x})", t),
            ChunkError::InvalidOpcode(op) => write!(f, "invalid opcode ({:#x})", op),
            ChunkError::InvalidString => write!(f, "string constant is not valid utf-8"),
            ChunkError::UnexpectedEndOfChunk => write!(f, "unexpected end-of-bytes"),
            ChunkError::ExpectedEndOfChunk => write!(f, "unexpected trailing bytes"),
        }
    }
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Just reuse debug formatting.
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ChunkError {}

// ============================================================================
// Encoding
// ============================================================================

/// Convert a prototype tree into a self-contained byte sequence.
pub fn to_bytes(proto: &Proto) -> Vec<u8> {
    let mut enc = ByteEncoder::new();
    enc.encode_u32(CHUNK_MAGIC);
    enc.encode_u32(CHUNK_VERSION);
    encode_proto(&mut enc, proto);
    enc.to_vec()
}

fn encode_proto(enc: &mut ByteEncoder, proto: &Proto) {
    enc.encode_u8(proto.max_stacksize);
    enc.encode_u8(proto.num_params);
    enc.encode_u8(proto.is_vararg as u8);
    enc.encode_u32(proto.mode);
    enc.encode_u32(proto.magic);
    enc.encode_u64(proto.extra);
    // Code
    enc.encode_u32(proto.code.len() as u32);
    for insn in &proto.code {
        enc.encode_u32(insn.0);
    }
    // Constant pool
    enc.encode_u32(proto.constants.len() as u32);
    for k in &proto.constants {
        match k {
            Constant::Nil => enc.encode_u8(0),
            Constant::Boolean(b) => {
                enc.encode_u8(1);
                enc.encode_u8(*b as u8);
            }
            Constant::Integer(i) => {
                enc.encode_u8(2);
                enc.encode_u64(*i as u64);
            }
            Constant::Float(x) => {
                enc.encode_u8(3);
                enc.encode_u64(x.to_bits());
            }
            Constant::Str(s) => {
                enc.encode_u8(4);
                enc.encode_bytes(s.as_bytes());
            }
        }
    }
    // Children
    enc.encode_u32(proto.protos.len() as u32);
    for p in &proto.protos {
        encode_proto(enc, p);
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a byte sequence back into a prototype tree.
pub fn from_bytes(bytes: &[u8]) -> Result<Proto, ChunkError> {
    let mut dec = ByteDecoder::new(bytes);
    dec.match_u32(CHUNK_MAGIC, ChunkError::InvalidMagicNumber)?;
    dec.match_u32(CHUNK_VERSION, ChunkError::UnsupportedVersion)?;
    let proto = decode_proto(&mut dec)?;
    dec.match_eof(ChunkError::ExpectedEndOfChunk)?;
    Ok(proto)
}

fn decode_proto(dec: &mut ByteDecoder) -> Result<Proto, ChunkError> {
    let max_stacksize = dec.decode_u8()?;
    let num_params = dec.decode_u8()?;
    let is_vararg = dec.decode_u8()? != 0;
    let mode = dec.decode_u32()?;
    let magic = dec.decode_u32()?;
    let extra = dec.decode_u64()?;
    // Code.  Validate the count against the bytes actually present
    // before trusting it.
    let sizecode = dec.decode_u32()? as usize;
    if sizecode > dec.remaining() / 4 {
        return Err(ChunkError::UnexpectedEndOfChunk);
    }
    let mut code = Vec::with_capacity(sizecode);
    for _ in 0..sizecode {
        let word = dec.decode_u32()?;
        // Reject words whose opcode is not in the repertoire.
        if OpCode::from_byte((word & 0x7F) as u8).is_none() {
            return Err(ChunkError::InvalidOpcode((word & 0x7F) as u8));
        }
        code.push(Instruction(word));
    }
    // Constant pool
    let nconstants = dec.decode_u32()? as usize;
    if nconstants > dec.remaining() {
        return Err(ChunkError::UnexpectedEndOfChunk);
    }
    let mut constants = Vec::with_capacity(nconstants);
    for _ in 0..nconstants {
        let tag = dec.decode_u8()?;
        let k = match tag {
            0 => Constant::Nil,
            1 => Constant::Boolean(dec.decode_u8()? != 0),
            2 => Constant::Integer(dec.decode_u64()? as i64),
            3 => Constant::Float(f64::from_bits(dec.decode_u64()?)),
            4 => {
                let bs = dec.decode_bytes()?;
                let s = String::from_utf8(bs).map_err(|_| ChunkError::InvalidString)?;
                Constant::Str(s)
            }
            t => return Err(ChunkError::InvalidConstantTag(t)),
        };
        constants.push(k);
    }
    // Children
    let nprotos = dec.decode_u32()? as usize;
    if nprotos > dec.remaining() {
        return Err(ChunkError::UnexpectedEndOfChunk);
    }
    let mut protos = Vec::with_capacity(nprotos);
    for _ in 0..nprotos {
        protos.push(decode_proto(dec)?);
    }
    Ok(Proto {
        code,
        constants,
        max_stacksize,
        num_params,
        is_vararg,
        protos,
        mode,
        magic,
        extra,
        vm_code: None,
    })
}
