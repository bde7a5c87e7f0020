mod common;

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::ops::ControlFlow;

use common::CodestreamBuilder;
use jpc::window::frame_size;
use jpc::target::MAX_PRECINCTS;
use jpc::{
    decode_main_header, relevant_precincts, CodestreamError, CodestreamIndex, DecodeOptions,
    ErrorKind, ProgressionOrder, Rect, Round, Tile, Traversal, UnsupportedFeature, ViewWindow,
};

const LAYERS: u16 = 3;

// Three components with 3, 1 and 2 decomposition levels, the last one
// subsampled, on an image whose origin is off the precinct grid.
fn builder(order: u8) -> CodestreamBuilder {
    let mut builder = CodestreamBuilder {
        width: 203,
        height: 155,
        origin: (3, 5),
        components: vec![(8, 1, 1), (8, 1, 1), (8, 2, 2)],
        decomposition_levels: 3,
        layers: LAYERS,
        progression_order: order,
        precincts: Some(vec![(5, 5), (5, 5), (6, 6), (6, 6)]),
        ..Default::default()
    };
    builder.main_segments = vec![
        builder.coc(1, 1, Some(&[(6, 6), (6, 6)])),
        builder.qcc(1, 1),
        builder.coc(2, 2, Some(&[(4, 4), (5, 5), (5, 5)])),
        builder.qcc(2, 2),
    ];
    builder
}

fn tile(order: u8) -> Tile {
    let bytes = builder(order).main_header();
    let header = decode_main_header(&mut Cursor::new(bytes), &DecodeOptions::default()).unwrap();
    Tile::new(&header).unwrap()
}

fn all_precincts(tile: &Tile) -> HashSet<u64> {
    tile.components()
        .iter()
        .flat_map(|component| component.resolutions())
        .flat_map(|level| level.precincts())
        .map(|precinct| precinct.in_class_id())
        .collect()
}

#[test]
fn test_component_levels_differ() {
    let tile = tile(0);
    let levels: Vec<u8> = tile
        .components()
        .iter()
        .map(|component| component.no_decomposition_levels())
        .collect();
    assert_eq!(levels, vec![3, 1, 2]);
    assert_eq!(tile.max_resolution_levels(), 4);
    assert!(all_precincts(&tile).len() > 10);
}

#[test]
fn test_every_order_visits_every_packet_once() {
    for value in 0..5 {
        let order = ProgressionOrder::new(value).unwrap();
        let tile = tile(value);
        assert_eq!(tile.progression_order(), order);
        let precincts = all_precincts(&tile);

        let mut packets: HashMap<(u64, u16), usize> = HashMap::new();
        for visit in Traversal::new(&tile).visits() {
            for layer in visit.first_layer..visit.first_layer + visit.layer_count {
                *packets.entry((visit.in_class_id, layer)).or_default() += 1;
            }
        }

        assert_eq!(packets.len(), precincts.len() * LAYERS as usize, "{}", order);
        assert!(packets.values().all(|count| *count == 1), "{}", order);
        for id in &precincts {
            for layer in 0..LAYERS {
                assert!(packets.contains_key(&(*id, layer)), "{} misses {}", order, id);
            }
        }
    }
}

#[test]
fn test_order_specific_nesting() {
    let lrcp = Traversal::new(&tile(0)).visits();
    assert!(lrcp.iter().all(|visit| visit.layer_count == 1));
    assert!(lrcp.windows(2).all(|pair| pair[0].first_layer <= pair[1].first_layer));

    let rlcp = Traversal::new(&tile(1)).visits();
    assert!(rlcp.windows(2).all(|pair| pair[0].resolution <= pair[1].resolution));

    let rpcl = Traversal::new(&tile(2)).visits();
    assert!(rpcl.iter().all(|visit| visit.layer_count == LAYERS));
    assert!(rpcl.windows(2).all(|pair| pair[0].resolution <= pair[1].resolution));

    let cprl = Traversal::new(&tile(4)).visits();
    assert_eq!(cprl[0].component, 0);
    assert!(cprl.iter().all(|visit| visit.layer_count == LAYERS));
}

#[test]
fn test_traversal_stops_when_visitor_breaks() {
    let tile = tile(3);
    let mut seen = 0;
    let flow = Traversal::new(&tile).visit(|visit| {
        seen += 1;
        if seen == 5 {
            ControlFlow::Break(visit.in_class_id)
        } else {
            ControlFlow::Continue(())
        }
    });
    assert!(matches!(flow, ControlFlow::Break(_)));
    assert_eq!(seen, 5);
}

#[test]
fn test_layer_limit_and_component_filter() {
    let tile = tile(0);
    let visits = Traversal::new(&tile).layers(1).components(vec![1]).visits();
    assert!(!visits.is_empty());
    assert!(visits.iter().all(|visit| visit.component == 1 && visit.first_layer == 0));

    let none = Traversal::new(&tile).layers(0).visits();
    assert!(none.is_empty());
}

#[test]
fn test_find_tcrp_round_trip() {
    let tile = tile(2);
    let mut ids = HashSet::new();
    for component in tile.components() {
        for level in component.resolutions() {
            for precinct in level.precincts() {
                let id = precinct.in_class_id();
                assert!(ids.insert(id), "duplicate in-class identifier {}", id);
                assert_eq!(
                    tile.in_class_id(component.index(), level.resolution(), precinct.index())
                        .unwrap(),
                    id
                );
                let tcrp = tile.find_tcrp(id).unwrap();
                assert_eq!(tcrp.component, component.index());
                assert_eq!(tcrp.resolution, level.resolution());
                assert_eq!(tcrp.precinct, precinct.index());
            }
        }
    }
    let beyond = ids.iter().max().unwrap() + tile.no_components() as u64;
    assert!(tile.find_tcrp(beyond).is_err());
}

#[test]
fn test_full_window_needs_every_precinct() {
    let tile = tile(0);
    let window = ViewWindow::new(203, 155);
    assert_eq!(window.discard_levels(&tile), 0);
    let precincts = relevant_precincts(&tile, &window);
    let unique: HashSet<u64> = precincts.iter().copied().collect();
    assert_eq!(unique.len(), precincts.len());
    assert_eq!(unique, all_precincts(&tile));
}

#[test]
fn test_reduced_frame_drops_high_resolutions() {
    let tile = tile(0);
    let window = ViewWindow::new(120, 90);
    assert_eq!(window.discard_levels(&tile), 1);
    assert_eq!(frame_size(&tile, 1), (100, 75));

    for id in relevant_precincts(&tile, &window) {
        let tcrp = tile.find_tcrp(id).unwrap();
        let component = tile.component(tcrp.component).unwrap();
        assert!(tcrp.resolution < component.no_decomposition_levels());
    }
}

#[test]
fn test_rounding_of_frame_size() {
    let tile = tile(0);
    let mut window = ViewWindow::new(1, 1);
    assert_eq!(window.discard_levels(&tile), 3);
    window.round = Round::Up;
    assert_eq!(window.discard_levels(&tile), 3);

    window.frame_size = (120, 90);
    assert_eq!(window.discard_levels(&tile), 0);

    window.frame_size = (4000, 4000);
    assert_eq!(window.discard_levels(&tile), 0);
    window.round = Round::Down;
    assert_eq!(window.discard_levels(&tile), 0);
}

#[test]
fn test_region_selects_subset() {
    let tile = tile(0);
    let all = all_precincts(&tile);

    let mut window = ViewWindow::new(203, 155);
    window.size = Some((10, 10));
    let region = window.region(&tile);
    assert_eq!(region, Rect::new(3, 5, 13, 15));

    let corner: HashSet<u64> = relevant_precincts(&tile, &window).into_iter().collect();
    assert!(!corner.is_empty());
    assert!(corner.is_subset(&all));
    assert!(corner.len() < all.len());
    // The lowest resolution precinct of every component covers the corner.
    for component in tile.components() {
        let lowest = component.resolution(0).unwrap().precincts()[0].in_class_id();
        assert!(corner.contains(&lowest));
    }

    window.components = Some(vec![2]);
    for id in relevant_precincts(&tile, &window) {
        assert_eq!(tile.find_tcrp(id).unwrap().component, 2);
    }
}

#[test]
fn test_region_outside_frame_is_empty() {
    let tile = tile(0);
    let mut window = ViewWindow::new(203, 155);
    window.offset = (500, 500);
    assert!(window.region(&tile).is_empty());
    assert!(relevant_precincts(&tile, &window).is_empty());
}

#[test]
fn test_too_many_precincts_is_unsupported() {
    // One reference grid sample per precinct: 2^34 precincts on a 2^17
    // square grid, one more row and column than the limit allows on a
    // 2^11 one.
    for (side, expected) in [(1u32 << 17, 1u64 << 34), (2049, 2049 * 2049)] {
        let builder = CodestreamBuilder {
            width: side,
            height: side,
            decomposition_levels: 0,
            precincts: Some(vec![(0, 0)]),
            ..Default::default()
        };
        let bytes = builder.main_header();
        let header = decode_main_header(&mut Cursor::new(bytes.clone()), &DecodeOptions::default())
            .unwrap();

        assert!(expected > MAX_PRECINCTS);
        match Tile::new(&header).unwrap_err() {
            CodestreamError::Unsupported {
                feature: UnsupportedFeature::PrecinctCount { count },
            } => assert_eq!(count, expected),
            error => panic!("unexpected error {}", error),
        }

        let mut index = CodestreamIndex::new(DecodeOptions::default());
        let error = index.index(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unsupported);
        assert!(index.header().is_some());
        assert!(index.tile().is_none());
    }
}

#[test]
fn test_one_sample_precincts() {
    let builder = CodestreamBuilder {
        width: 1 << 9,
        height: 1 << 9,
        decomposition_levels: 0,
        precincts: Some(vec![(0, 0)]),
        ..Default::default()
    };
    let header =
        decode_main_header(&mut Cursor::new(builder.main_header()), &DecodeOptions::default())
            .unwrap();
    let tile = Tile::new(&header).unwrap();
    let level = tile.resolution_level(0, 0).unwrap();
    assert_eq!(level.no_precincts(), 1 << 18);
    assert_eq!(level.precincts_wide(), 1 << 9);
    let last = level.precincts().last().unwrap().in_class_id();
    assert_eq!(tile.find_tcrp(last).unwrap().precinct, (1 << 18) - 1);
}
