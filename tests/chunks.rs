use luaobf::bytecode::{chunk, ChunkError, Constant, Proto};

mod util;
use util::*;

fn sample_chunk() -> Proto {
    let mut root = cascade_proto();
    root.constants = vec![
        Constant::Nil,
        Constant::Boolean(true),
        Constant::Integer(-42),
        Constant::Float(0.5),
        Constant::Str("hello".to_string()),
    ];
    root.is_vararg = true;
    let mut child = sum_proto();
    child.protos.push(Proto::from_code(vec![ret0()], 2));
    root.protos.push(child);
    root
}

#[test]
fn test_chunk_01() {
    // The whole prototype tree survives a round trip.
    let p = sample_chunk();
    let bytes = chunk::to_bytes(&p);
    let back = chunk::from_bytes(&bytes).unwrap();
    assert_eq!(back, p);
}

#[test]
fn test_chunk_02() {
    // Obfuscation metadata fields travel with the chunk.
    let mut p = sample_chunk();
    p.mode = 0x2B;
    p.magic = 0x43464600;
    p.extra = (8u64 << 32) | 1234;
    let back = chunk::from_bytes(&chunk::to_bytes(&p)).unwrap();
    assert_eq!(back.mode, 0x2B);
    assert_eq!(back.magic, 0x43464600);
    assert_eq!(back.extra, (8u64 << 32) | 1234);
}

#[test]
fn test_chunk_03() {
    // Bad magic is rejected.
    let mut bytes = chunk::to_bytes(&sample_chunk());
    bytes[0] = 0;
    assert!(matches!(
        chunk::from_bytes(&bytes),
        Err(ChunkError::InvalidMagicNumber(_))
    ));
}

#[test]
fn test_chunk_04() {
    // Truncation is detected wherever it lands.
    let bytes = chunk::to_bytes(&sample_chunk());
    for cut in [0, 7, 20, bytes.len() / 2, bytes.len() - 1] {
        assert!(chunk::from_bytes(&bytes[..cut]).is_err(), "cut at {}", cut);
    }
}

#[test]
fn test_chunk_05() {
    // Trailing garbage is rejected.
    let mut bytes = chunk::to_bytes(&sample_chunk());
    bytes.extend_from_slice(&[1, 2, 3]);
    assert!(matches!(
        chunk::from_bytes(&bytes),
        Err(ChunkError::ExpectedEndOfChunk)
    ));
}

#[test]
fn test_chunk_06() {
    // Words with out-of-repertoire opcodes do not decode.
    let mut p = Proto::from_code(vec![loadi(0, 1), ret0()], 2);
    p.code[0].0 |= 0x7F; // clobber the opcode field
    let bytes = chunk::to_bytes(&p);
    assert!(matches!(
        chunk::from_bytes(&bytes),
        Err(ChunkError::InvalidOpcode(0x7F))
    ));
}
