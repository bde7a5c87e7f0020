mod common;

use std::io::Cursor;

use common::{segment, synthesize_tile, BlockPlan, CodestreamBuilder, SynthesizedTile};
use jpc::{
    decode_jpc, decode_main_header, ClientDecoder, CodestreamError, CodestreamIndex, DataBin, DecodeOptions,
    ErrorKind, PrecinctDecodeState, Progress, Tile, UnsupportedFeature,
};

const LAYERS: u16 = 3;

type BlockSummary = (Option<u16>, u32, Vec<u32>);

fn builder(sop: bool, eph: bool) -> CodestreamBuilder {
    CodestreamBuilder {
        width: 96,
        height: 80,
        components: vec![(8, 1, 1), (8, 2, 1)],
        decomposition_levels: 2,
        layers: LAYERS,
        progression_order: 2,
        precincts: Some(vec![(5, 5), (5, 5), (5, 5)]),
        sop,
        eph,
        ..Default::default()
    }
}

fn synthesize(builder: &CodestreamBuilder) -> SynthesizedTile {
    let header = decode_main_header(
        &mut Cursor::new(builder.main_header()),
        &DecodeOptions::default(),
    )
    .unwrap();
    synthesize_tile(&Tile::new(&header).unwrap(), builder.sop, builder.eph, builder.restart)
}

fn summary(state: &PrecinctDecodeState) -> Vec<Vec<BlockSummary>> {
    (0..state.no_subbands())
        .map(|s| {
            state
                .codeblocks(s)
                .iter()
                .map(|block| {
                    let lengths = block.segments().iter().map(|segment| segment.length).collect();
                    (block.first_layer(), block.coding_passes(), lengths)
                })
                .collect()
        })
        .collect()
}

fn plan_summary(plans: &[Vec<BlockPlan>]) -> Vec<Vec<BlockSummary>> {
    plans
        .iter()
        .map(|blocks| {
            blocks
                .iter()
                .map(|plan| (plan.first_layer, plan.total_passes(), plan.lengths()))
                .collect()
        })
        .collect()
}

fn index(bytes: Vec<u8>) -> (CodestreamIndex, Result<usize, CodestreamError>) {
    let mut index = CodestreamIndex::new(DecodeOptions::default());
    let result = index.index(&mut Cursor::new(bytes));
    (index, result)
}

fn precinct_state(index: &CodestreamIndex, id: u64) -> &PrecinctDecodeState {
    let tile = index.tile().unwrap();
    let tcrp = tile.find_tcrp(id).unwrap();
    tile.precinct(tcrp.component, tcrp.resolution, tcrp.precinct)
        .unwrap()
        .state()
        .unwrap()
}

#[test]
fn test_index_matches_synthesized_packets() {
    for (sop, eph) in [(false, false), (true, false), (true, true)] {
        let builder = builder(sop, eph);
        let synthesized = synthesize(&builder);
        let (index, result) = index(builder.build(&synthesized.data));

        assert_eq!(result.unwrap(), synthesized.packets);
        assert!(!index.is_truncated());
        assert_eq!(index.packet_count(), synthesized.packets);
        assert_eq!(index.precinct_ids().len(), synthesized.plans.len());

        for (id, plans) in &synthesized.plans {
            assert_eq!(summary(precinct_state(&index, *id)), plan_summary(plans));
            let packets = index.packets(*id);
            assert_eq!(packets.len(), LAYERS as usize);
            for (layer, packet) in packets.iter().enumerate() {
                assert_eq!(packet.layer, layer as u16);
                assert_eq!(packet.header.end, packet.body.start);
            }
        }
    }
}

#[test]
fn test_client_decodes_precinct_bins_in_pieces() {
    let builder = builder(true, true);
    let synthesized = synthesize(&builder);
    let (index, result) = index(builder.build(&synthesized.data));
    result.unwrap();

    let main_header = DataBin::new(0);
    main_header.append(&builder.main_header());
    let options = DecodeOptions::default();
    assert!(ClientDecoder::from_main_header_bin(&main_header, &options)
        .unwrap()
        .is_paused());
    main_header.append_final(&[]);
    let mut client = ClientDecoder::from_main_header_bin(&main_header, &options)
        .unwrap()
        .complete()
        .unwrap();

    for id in index.precinct_ids() {
        let bytes = index.precinct_bytes(id);
        let bin = DataBin::new(id);
        let chunk = bytes.len() / 3 + 1;
        let mut pieces = bytes.chunks(chunk).peekable();
        while let Some(piece) = pieces.next() {
            if pieces.peek().is_some() {
                bin.append(piece);
                client.decode_precinct(id, &bin).unwrap();
            } else {
                bin.append_final(piece);
            }
        }

        assert_eq!(client.decode_precinct(id, &bin).unwrap(), Progress::Complete(LAYERS));
        let decoded = client.precinct_state(id).unwrap().unwrap();
        assert_eq!(summary(decoded), plan_summary(&synthesized.plans[&id]));
    }
}

#[test]
fn test_client_bin_states() {
    let builder = builder(false, false);
    let synthesized = synthesize(&builder);
    let (index, result) = index(builder.build(&synthesized.data));
    result.unwrap();
    let mut client = ClientDecoder::new(index.header().unwrap().clone()).unwrap();

    // An empty incomplete bin has nothing to decode yet.
    let id = index.precinct_ids()[0];
    assert!(client.decode_precinct(id, &DataBin::new(id)).unwrap().is_paused());
    assert!(client.precinct_state(id).unwrap().unwrap().next_layer() == 0);

    // A complete bin ending on a packet boundary leaves later layers empty.
    let first = &index.packets(id)[0];
    let bytes = index.precinct_bytes(id);
    let first_len = first.len() as usize;
    let bin = DataBin::with_contents(id, bytes[..first_len].to_vec(), true);
    assert_eq!(client.decode_precinct(id, &bin).unwrap(), Progress::Complete(1));

    // A complete bin ending inside a packet header is corrupt.
    let long = index
        .precinct_ids()
        .into_iter()
        .find(|id| index.packets(*id)[0].header.end - index.packets(*id)[0].header.start > 1)
        .unwrap();
    let bin = DataBin::with_contents(long, index.precinct_bytes(long)[..1].to_vec(), true);
    let error = client.decode_precinct(long, &bin).unwrap_err();
    assert!(matches!(error, CodestreamError::PacketError { .. }));

    // Resetting a precinct starts it over.
    client.reset_precinct(id).unwrap();
    let bin = DataBin::with_contents(id, bytes, true);
    assert_eq!(client.decode_precinct(id, &bin).unwrap(), Progress::Complete(LAYERS));
}

#[test]
fn test_rgn_in_tile_header_keeps_tile() {
    let mut builder = builder(false, false);
    let synthesized = synthesize(&builder);
    builder.tile_segments = vec![segment(0x5E, &[0x00, 0x00, 0x03])];
    let (index, result) = index(builder.build(&synthesized.data));

    let error = result.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Unsupported);
    assert!(index.tile().is_some());
    assert_eq!(index.tile().unwrap().no_components(), 2);
}

#[test]
fn test_tile_header_coding_override_is_unsupported() {
    let mut builder = builder(false, false);
    let synthesized = synthesize(&builder);
    builder.tile_segments = vec![builder.cod()];
    let (_, result) = index(builder.build(&synthesized.data));
    assert!(matches!(
        result.unwrap_err(),
        CodestreamError::Unsupported {
            feature: UnsupportedFeature::TileHeaderParameters { .. }
        }
    ));
}

#[test]
fn test_comment_in_tile_header_is_skipped() {
    let mut builder = builder(false, false);
    let synthesized = synthesize(&builder);
    builder.tile_segments = vec![segment(0x64, &[0x00, 0x01, b'x'])];
    let (_, result) = index(builder.build(&synthesized.data));
    assert_eq!(result.unwrap(), synthesized.packets);
}

#[test]
fn test_truncated_codestream() {
    let builder = builder(false, false);
    let synthesized = synthesize(&builder);
    let mut bytes = builder.build(&synthesized.data);
    bytes.truncate(bytes.len() - synthesized.data.len() / 2);
    let (index, result) = index(bytes);

    let indexed = result.unwrap();
    assert!(index.is_truncated());
    assert!(indexed < synthesized.packets);
}

#[test]
fn test_main_header_only() {
    let builder = builder(false, false);
    let (index, result) = index(builder.main_header());
    assert_eq!(result.unwrap(), 0);
    assert!(index.is_truncated());
    assert!(index.header().is_some());
}

#[test]
fn test_second_tile_part_is_unsupported() {
    let builder = builder(false, false);
    let synthesized = synthesize(&builder);
    let mut bytes = builder.build(&synthesized.data);
    bytes.truncate(bytes.len() - 2);
    bytes.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0E, 0x01, 0x02]);
    bytes.extend_from_slice(&[0xFF, 0x93, 0xFF, 0xD9]);

    let (_, result) = index(bytes);
    match result.unwrap_err() {
        CodestreamError::Unsupported {
            feature:
                UnsupportedFeature::MultipleTileParts {
                    tile_part_index,
                    no_tile_parts,
                    ..
                },
        } => {
            assert_eq!(tile_part_index, 1);
            assert_eq!(no_tile_parts, 2);
        }
        error => panic!("unexpected error {}", error),
    }
}

#[test]
fn test_psot_zero_reads_to_end() {
    let builder = builder(true, false);
    let synthesized = synthesize(&builder);
    let mut bytes = builder.build(&synthesized.data);
    let psot = builder.main_header().len() + 6;
    bytes[psot..psot + 4].copy_from_slice(&[0, 0, 0, 0]);

    let (index, result) = index(bytes);
    assert_eq!(result.unwrap(), synthesized.packets);
    assert!(!index.is_truncated());
}

#[test]
fn test_jpk_codestream() {
    let builder = builder(true, true);
    let synthesized = synthesize(&builder);
    let header = builder.jpk_header();
    let mut bytes = header.clone();
    bytes.extend_from_slice(&synthesized.data);

    let (index, result) = index(bytes);
    assert_eq!(result.unwrap(), synthesized.packets);
    for (id, plans) in &synthesized.plans {
        assert_eq!(summary(precinct_state(&index, *id)), plan_summary(plans));
        assert!(index.packets(*id)[0].header.start >= header.len() as u64);
    }
}

#[test]
fn test_decode_jpc() {
    let builder = builder(false, true);
    let synthesized = synthesize(&builder);
    let index = decode_jpc(&mut Cursor::new(builder.build(&synthesized.data))).unwrap();
    assert_eq!(index.packet_count(), synthesized.packets);
    assert_eq!(index.header().unwrap().no_layers(), LAYERS);
}

#[test]
fn test_client_precinct_unusable_after_error_until_reset() {
    let builder = builder(true, true);
    let synthesized = synthesize(&builder);
    let (index, result) = index(builder.build(&synthesized.data));
    result.unwrap();
    let mut client = ClientDecoder::new(index.header().unwrap().clone()).unwrap();

    let id = index.precinct_ids()[0];
    let first = &index.packets(id)[0];
    let bytes = index.precinct_bytes(id);
    let mut corrupt = bytes.clone();
    corrupt[(first.header.end - first.header.start) as usize - 1] = 0x00;

    let bin = DataBin::with_contents(id, corrupt, true);
    let error = client.decode_precinct(id, &bin).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Corrupt);
    assert!(client.precinct_state(id).unwrap().unwrap().is_failed());

    let bin = DataBin::with_contents(id, bytes, true);
    let error = client.decode_precinct(id, &bin).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Contract);

    client.reset_precinct(id).unwrap();
    assert_eq!(client.decode_precinct(id, &bin).unwrap(), Progress::Complete(LAYERS));
    let decoded = client.precinct_state(id).unwrap().unwrap();
    assert_eq!(summary(decoded), plan_summary(&synthesized.plans[&id]));
}

#[test]
fn test_client_accepts_codestream_wide_sop_numbers() {
    // Layer outermost, so other precincts' packets come between two packets
    // of the same precinct.
    let mut builder = builder(true, false);
    builder.progression_order = 0;
    let synthesized = synthesize(&builder);
    let bytes = builder.build(&synthesized.data);
    let (index, result) = index(bytes.clone());
    result.unwrap();
    let mut client = ClientDecoder::new(index.header().unwrap().clone()).unwrap();

    let mut gaps = false;
    for id in index.precinct_ids() {
        let sequence: Vec<u16> = index
            .packets(id)
            .iter()
            .map(|packet| {
                let start = packet.header.start as usize;
                assert_eq!(&bytes[start..start + 4], &[0xFF, 0x91, 0x00, 0x04]);
                u16::from_be_bytes([bytes[start + 4], bytes[start + 5]])
            })
            .collect();
        gaps |= sequence.windows(2).any(|pair| pair[1] != pair[0] + 1);

        let bin = DataBin::with_contents(id, index.precinct_bytes(id), true);
        assert_eq!(client.decode_precinct(id, &bin).unwrap(), Progress::Complete(LAYERS));
    }
    assert!(gaps);
}
