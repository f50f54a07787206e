use luaobf::flatten::{
    decompose, flags, flatten, unflatten, FlattenError, Metadata, MetadataError, CFF_MAGIC,
};
use luaobf::vm::VmCodeStore;

mod util;
use util::*;

fn sample_metadata() -> Metadata {
    let p = cascade_proto();
    Metadata { state_reg: 2, seed: 0xFACE, blocks: decompose(&p.code).unwrap() }
}

#[test]
fn test_metadata_01() {
    // Byte-exact round trip of every field.
    let md = sample_metadata();
    let bytes = md.to_bytes();
    assert_eq!(bytes.len(), md.serialized_size());
    let back = Metadata::from_bytes(&bytes).unwrap();
    assert_eq!(back, md);
}

#[test]
fn test_metadata_02() {
    // The header layout is pinned: magic, version, block count,
    // state register, seed, all little-endian.
    let md = sample_metadata();
    let bytes = md.to_bytes();
    assert_eq!(&bytes[0..4], CFF_MAGIC.to_le_bytes());
    assert_eq!(&bytes[4..8], 1u32.to_le_bytes());
    assert_eq!(&bytes[8..12], (md.blocks.len() as u32).to_le_bytes());
    assert_eq!(&bytes[12..16], 2u32.to_le_bytes());
    assert_eq!(&bytes[16..20], 0xFACEu32.to_le_bytes());
    // Each block record is 32 bytes; absent links serialise as -1.
    assert_eq!(bytes.len(), 20 + 32 * md.blocks.len());
    let first = &bytes[20..52];
    assert_eq!(&first[0..4], 0u32.to_le_bytes()); // start_pc
    assert_eq!(&first[4..8], 2u32.to_le_bytes()); // end_pc
    assert_eq!(&first[12..16], 2i32.to_le_bytes()); // original_target
    assert_eq!(&first[16..20], (-1i32).to_le_bytes()); // fall_through
    assert_eq!(&first[24..28], 1i32.to_le_bytes()); // is_entry
}

#[test]
fn test_metadata_03() {
    // A wrong magic number is rejected outright.
    let mut bytes = sample_metadata().to_bytes();
    bytes[0] ^= 0xFF;
    assert!(matches!(
        Metadata::from_bytes(&bytes),
        Err(MetadataError::InvalidMagicNumber(_))
    ));
}

#[test]
fn test_metadata_04() {
    // As is an unsupported version.
    let mut bytes = sample_metadata().to_bytes();
    bytes[4] = 2;
    assert!(matches!(
        Metadata::from_bytes(&bytes),
        Err(MetadataError::UnsupportedVersion(2))
    ));
}

#[test]
fn test_metadata_05() {
    // Truncated blobs never yield partial metadata.
    let bytes = sample_metadata().to_bytes();
    for cut in [3, 19, 21, bytes.len() - 1] {
        assert!(matches!(
            Metadata::from_bytes(&bytes[..cut]),
            Err(MetadataError::UnexpectedEndOfBlob)
        ));
    }
}

#[test]
fn test_metadata_06() {
    // Trailing bytes are rejected too.
    let mut bytes = sample_metadata().to_bytes();
    bytes.push(0);
    assert!(matches!(
        Metadata::from_bytes(&bytes),
        Err(MetadataError::ExpectedEndOfBlob)
    ));
}

#[test]
fn test_metadata_07() {
    // The metadata returned by a transform round-trips as well.
    let mut p = cascade_proto();
    let mut store = VmCodeStore::new();
    let md = flatten(&mut store, &mut p, flags::CFF | flags::BLOCK_SHUFFLE, 61)
        .unwrap()
        .unwrap();
    let back = Metadata::from_bytes(&md.to_bytes()).unwrap();
    assert_eq!(back, md);
}

#[test]
fn test_unflatten_01() {
    // Unflattening clears the mode bit on a stamped prototype.
    let mut p = cascade_proto();
    let mut store = VmCodeStore::new();
    flatten(&mut store, &mut p, flags::CFF, 4).unwrap().unwrap();
    assert!(p.mode & flags::CFF != 0);
    unflatten(&mut p, None).unwrap();
    assert!(p.mode & flags::CFF == 0);
}

#[test]
fn test_unflatten_02() {
    // A prototype never flattened is a no-op.
    let mut p = cascade_proto();
    unflatten(&mut p, None).unwrap();
    assert_eq!(p.mode, 0);
}

#[test]
fn test_unflatten_03() {
    // A corrupted validation tag is an error.
    let mut p = cascade_proto();
    let mut store = VmCodeStore::new();
    flatten(&mut store, &mut p, flags::CFF, 4).unwrap().unwrap();
    p.magic = 0x12345678;
    assert!(matches!(
        unflatten(&mut p, None),
        Err(FlattenError::InvalidPrototypeMagic(0x12345678))
    ));
}
