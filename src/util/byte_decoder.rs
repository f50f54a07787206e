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

/// A simple alias to make things a bit clearer.  In essence, this
/// generates a decoding error from a given word in the stream
/// (depending on the kind of error being generated).
type DecodingErrorFn<T, E> = fn(T) -> E;

/// Utility for pulling structured data back out of a bytestream
/// produced by `ByteEncoder`.  All multibyte quantities use a
/// little-endian representation.
pub struct ByteDecoder<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> ByteDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, index: 0 }
    }

    /// Attempt to match a given `u32` word in the bytestream at the
    /// present position.  If the match fails, an error is generated
    /// using the provided decoding error generator.
    pub fn match_u32<E: Default>(&mut self, n: u32, ef: DecodingErrorFn<u32, E>) -> Result<(), E> {
        let m = self.decode_u32()?;
        if m == n {
            Ok(())
        } else {
            Err(ef(m))
        }
    }

    /// Attempt to match the _end of file_.  That is, we expect at
    /// this point that all bytes in the original stream have been
    /// consumed.  If not, there is some trailing garbage in the
    /// stream and an error is generated.
    pub fn match_eof<E>(&mut self, err: E) -> Result<(), E> {
        if self.index == self.bytes.len() {
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Decode a single byte at the present position.
    pub fn decode_u8<E: Default>(&mut self) -> Result<u8, E> {
        let bs = self.take::<E>(1)?;
        Ok(bs[0])
    }

    /// Decode a 32bit word at the present position.
    pub fn decode_u32<E: Default>(&mut self) -> Result<u32, E> {
        let bs = self.take::<E>(4)?;
        Ok(u32::from_le_bytes(bs.try_into().unwrap()))
    }

    /// Decode a signed 32bit word at the present position.
    pub fn decode_i32<E: Default>(&mut self) -> Result<i32, E> {
        let bs = self.take::<E>(4)?;
        Ok(i32::from_le_bytes(bs.try_into().unwrap()))
    }

    /// Decode a 64bit word at the present position.
    pub fn decode_u64<E: Default>(&mut self) -> Result<u64, E> {
        let bs = self.take::<E>(8)?;
        Ok(u64::from_le_bytes(bs.try_into().unwrap()))
    }

    /// Decode a length-prefixed byte sequence at the present
    /// position.
    pub fn decode_bytes<E: Default>(&mut self) -> Result<Vec<u8>, E> {
        let n = self.decode_u32::<E>()? as usize;
        Ok(self.take::<E>(n)?.to_vec())
    }

    /// The number of bytes not yet consumed.  Useful for validating
    /// element counts before trusting them.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.index
    }

    fn take<E: Default>(&mut self, n: usize) -> Result<&'a [u8], E> {
        if self.index + n > self.bytes.len() {
            // Stream is truncated in some way.
            Err(E::default())
        } else {
            let bs = &self.bytes[self.index..self.index + n];
            self.index += n;
            Ok(bs)
        }
    }
}
