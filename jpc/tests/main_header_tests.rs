mod common;

use std::io::Cursor;

use common::{segment, CodestreamBuilder};
use jpc::{
    decode_main_header, CodestreamError, CommentMetadata, DecodeOptions, ErrorKind, HeaderDialect,
    ProgressionOrder,
};

#[test]
fn test_jpc_main_header() {
    let builder = CodestreamBuilder {
        width: 100,
        height: 60,
        origin: (4, 2),
        components: vec![(8, 1, 1), (8, 2, 2), (8, 2, 2)],
        decomposition_levels: 3,
        layers: 5,
        progression_order: 2,
        precincts: Some(vec![(4, 4), (5, 5), (6, 6), (6, 6)]),
        sop: true,
        ..Default::default()
    };
    let bytes = builder.main_header();
    let header = decode_main_header(&mut Cursor::new(&bytes), &DecodeOptions::default()).unwrap();

    assert_eq!(header.dialect(), HeaderDialect::Jpc);
    assert_eq!(header.offset(), 0);
    assert_eq!(header.length(), bytes.len() as u64);
    assert_eq!(header.sizing().reference_grid_width(), 100);
    assert_eq!(header.sizing().reference_grid_height(), 60);
    assert_eq!(header.sizing().image_horizontal_offset(), 4);
    assert_eq!(header.sizing().no_components(), 3);
    assert_eq!(header.coding().progression_order(), ProgressionOrder::Rpcl);
    assert_eq!(header.no_layers(), 5);
    assert!(header.coding().sop_allowed());
    assert!(!header.coding().eph_used());
    assert_eq!(header.max_resolution_levels(), 4);
    assert_eq!(header.components().len(), 3);
}

#[test]
fn test_siz_length_mismatch_is_the_root_cause() {
    let builder = CodestreamBuilder {
        siz_length: Some(40),
        ..Default::default()
    };
    let bytes = builder.main_header();
    let error =
        decode_main_header(&mut Cursor::new(&bytes), &DecodeOptions::default()).unwrap_err();

    assert!(matches!(error, CodestreamError::DialectsExhausted { .. }));
    match error.root() {
        CodestreamError::LengthMismatch {
            length, expected, ..
        } => {
            assert_eq!(*length, 40);
            assert_eq!(*expected, 41);
        }
        root => panic!("unexpected root cause {}", root),
    }
    assert_eq!(error.root().kind(), ErrorKind::Corrupt);
}

#[test]
fn test_jpk_matches_jpc() {
    let builder = CodestreamBuilder {
        width: 300,
        height: 200,
        components: vec![(12, 1, 1), (10, 1, 2)],
        decomposition_levels: 4,
        layers: 3,
        progression_order: 4,
        code_block_exponents: (5, 6),
        precincts: Some(vec![(7, 7); 5]),
        restart: true,
        eph: true,
        ..Default::default()
    };
    let jpc = decode_main_header(
        &mut Cursor::new(builder.main_header()),
        &DecodeOptions::default(),
    )
    .unwrap();
    let jpk_bytes = builder.jpk_header();
    let jpk =
        decode_main_header(&mut Cursor::new(&jpk_bytes), &DecodeOptions::default()).unwrap();

    assert_eq!(jpk.dialect(), HeaderDialect::Jpk);
    assert_eq!(jpk.length(), jpk_bytes.len() as u64);
    assert_eq!(jpk.sizing(), jpc.sizing());
    assert_eq!(jpk.coding(), jpc.coding());
    assert_eq!(jpk.components(), jpc.components());
}

#[test]
fn test_jpk_layer_count_beyond_u16() {
    let builder = CodestreamBuilder {
        layers: 0,
        ..Default::default()
    };
    let error = decode_main_header(
        &mut Cursor::new(builder.jpk_header()),
        &DecodeOptions::default(),
    )
    .unwrap_err();
    match error.root() {
        CodestreamError::FieldOutOfRange { field, value, .. } => {
            assert_eq!(*field, "number of layers");
            assert_eq!(*value, 65536);
        }
        root => panic!("unexpected root cause {}", root),
    }
}

#[test]
fn test_jpk_only_rejects_jpc() {
    let options = DecodeOptions {
        dialects: vec![HeaderDialect::Jpk],
        ..Default::default()
    };
    let bytes = CodestreamBuilder::default().main_header();
    let error = decode_main_header(&mut Cursor::new(&bytes), &options).unwrap_err();
    assert!(matches!(
        error.root(),
        CodestreamError::BadSignature {
            dialect: HeaderDialect::Jpk,
            ..
        }
    ));
}

#[test]
fn test_unknown_main_header_segment_is_skipped() {
    let builder = CodestreamBuilder {
        main_segments: vec![segment(0x64, &[0x00, 0x01, b'h', b'i']), segment(0x6F, &[1, 2, 3])],
        ..Default::default()
    };
    let bytes = builder.main_header();
    let header = decode_main_header(&mut Cursor::new(&bytes), &DecodeOptions::default()).unwrap();
    assert_eq!(header.length(), bytes.len() as u64);
    assert_eq!(header.no_layers(), 2);
    assert_eq!(header.comments(), &[CommentMetadata::Text("hi".to_string())]);
}

#[test]
fn test_header_at_non_zero_offset() {
    let mut bytes = vec![0u8; 7];
    bytes.extend(CodestreamBuilder::default().main_header());
    let mut reader = Cursor::new(&bytes);
    reader.set_position(7);
    let header = decode_main_header(&mut reader, &DecodeOptions::default()).unwrap();
    assert_eq!(header.offset(), 7);
    assert_eq!(header.length(), bytes.len() as u64 - 7);
}
