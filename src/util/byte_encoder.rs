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

/// A utility for encoding structured data into bytes.  All multibyte
/// quantities use a little-endian representation, as required by the
/// metadata and chunk formats.
pub struct ByteEncoder {
    bytes: Vec<u8>,
}

impl ByteEncoder {
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Encode a single byte into this stream.
    pub fn encode_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    /// Encode a 32bit word into this stream.
    pub fn encode_u32(&mut self, word: u32) {
        self.bytes.extend(word.to_le_bytes())
    }

    /// Encode a signed 32bit word into this stream.
    pub fn encode_i32(&mut self, word: i32) {
        self.bytes.extend(word.to_le_bytes())
    }

    /// Encode a 64bit word into this stream.
    pub fn encode_u64(&mut self, word: u64) {
        self.bytes.extend(word.to_le_bytes())
    }

    /// Encode a length-prefixed byte sequence into this stream.
    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        self.encode_u32(bytes.len() as u32);
        self.bytes.extend(bytes);
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.bytes
    }
}
