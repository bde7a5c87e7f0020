#![allow(dead_code)]

//! Codestream and packet header writers used to synthesise test inputs.

use std::collections::HashMap;

use jpc::target::PrecinctSubband;
use jpc::{Tile, Traversal};

/// Packet header bit writer with bit stuffing after 0xFF.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u8,
    capacity: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter {
            capacity: 8,
            ..Default::default()
        }
    }

    pub fn bit(&mut self, bit: bool) {
        self.current = (self.current << 1) | bit as u8;
        self.used += 1;
        if self.used == self.capacity {
            self.bytes.push(self.current);
            self.capacity = if self.current == 0xFF { 7 } else { 8 };
            self.current = 0;
            self.used = 0;
        }
    }

    pub fn bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.bit((value >> i) & 1 == 1);
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.current <<= self.capacity - self.used;
            self.bytes.push(self.current);
        } else if self.bytes.last() == Some(&0xFF) {
            self.bytes.push(0x00);
        }
        self.bytes
    }
}

/// Plain MSB-first bit writer of the JPK header, no stuffing.
#[derive(Debug, Default)]
pub struct PackedWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u8,
}

impl PackedWriter {
    pub fn bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            self.current = (self.current << 1) | ((value >> i) & 1) as u8;
            self.used += 1;
            if self.used == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.used = 0;
            }
        }
    }

    pub fn flag(&mut self, flag: bool) {
        self.bits(flag as u64, 1);
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.current <<= 8 - self.used;
            self.bytes.push(self.current);
        }
        self.bytes
    }
}

/// Tag tree encoder mirroring the decoder's state machine.
#[derive(Debug, Clone)]
pub struct TagTreeEncoder {
    // (width, values, states) from the leaves up.
    levels: Vec<(usize, Vec<u32>, Vec<u32>)>,
}

impl TagTreeEncoder {
    pub fn new(width: usize, height: usize, leaves: &[u32]) -> Self {
        let mut levels = vec![(width.max(1), leaves.to_vec(), vec![0; leaves.len()])];
        if leaves.is_empty() {
            return TagTreeEncoder { levels };
        }
        let (mut w, mut h) = (width, height);
        while w > 1 || h > 1 {
            let (nw, nh) = (w.div_ceil(2), h.div_ceil(2));
            let below = &levels[levels.len() - 1].1;
            let mut values = vec![u32::MAX; nw * nh];
            for y in 0..h {
                for x in 0..w {
                    let parent = (y / 2) * nw + x / 2;
                    values[parent] = values[parent].min(below[y * w + x]);
                }
            }
            levels.push((nw, values, vec![0; nw * nh]));
            w = nw;
            h = nh;
        }
        TagTreeEncoder { levels }
    }

    pub fn encode(&mut self, writer: &mut BitWriter, threshold: u32, row: usize, column: usize) {
        let mut minimum = 0;
        for depth in (0..self.levels.len()).rev() {
            let (width, values, states) = &mut self.levels[depth];
            let index = (row >> depth) * *width + (column >> depth);
            let value = values[index];
            let mut state = states[index].max(minimum);
            while threshold > state {
                if value > state {
                    writer.bit(false);
                } else if value == state {
                    writer.bit(true);
                } else {
                    state = threshold;
                    break;
                }
                state += 1;
            }
            states[index] = state;
            minimum = state.min(value);
        }
    }
}

/// What one codeblock contributes to every layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    pub first_layer: Option<u16>,
    pub zero_bit_planes: u32,
    /// New passes and codeword segment lengths per layer.
    pub layers: Vec<Option<(u32, Vec<u32>)>>,
}

impl BlockPlan {
    pub fn total_passes(&self) -> u32 {
        self.layers.iter().flatten().map(|(passes, _)| passes).sum()
    }

    pub fn lengths(&self) -> Vec<u32> {
        self.layers
            .iter()
            .flatten()
            .flat_map(|(_, lengths)| lengths.iter().copied())
            .collect()
    }
}

pub fn mix(mut seed: u64) -> u64 {
    seed = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    seed = (seed ^ (seed >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    seed = (seed ^ (seed >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    seed ^ (seed >> 31)
}

const PASS_CHOICES: [u32; 12] = [1, 1, 2, 3, 4, 5, 6, 9, 36, 37, 40, 164];

pub fn plan_block(seed: u64, no_layers: u16, restart: bool) -> BlockPlan {
    let mut seed = mix(seed);
    let first = (seed % (no_layers as u64 + 1)) as u16;
    let first_layer = (first < no_layers).then_some(first);
    seed = mix(seed);
    let zero_bit_planes = (seed % 12) as u32;

    let layers = (0..no_layers)
        .map(|layer| {
            seed = mix(seed);
            let included = match first_layer {
                Some(first) if layer == first => true,
                Some(first) if layer > first => seed % 3 != 0,
                _ => false,
            };
            if !included {
                return None;
            }
            seed = mix(seed);
            let passes = PASS_CHOICES[(seed % PASS_CHOICES.len() as u64) as usize];
            let segments = if restart { passes } else { 1 };
            let lengths = (0..segments)
                .map(|_| {
                    seed = mix(seed);
                    (seed % 300) as u32
                })
                .collect();
            Some((passes, lengths))
        })
        .collect();

    BlockPlan {
        first_layer,
        zero_bit_planes,
        layers,
    }
}

#[derive(Debug, Clone)]
struct SubbandEncoder {
    blocks_wide: usize,
    inclusion: TagTreeEncoder,
    zero_bit_planes: TagTreeEncoder,
    blocks: Vec<BlockPlan>,
    l_block: Vec<u32>,
}

/// Packet writer of one precinct.
#[derive(Debug, Clone)]
pub struct PrecinctEncoder {
    subbands: Vec<SubbandEncoder>,
}

impl PrecinctEncoder {
    pub fn new(layout: &[PrecinctSubband], plans: Vec<Vec<BlockPlan>>) -> Self {
        let subbands = layout
            .iter()
            .zip(plans)
            .map(|(subband, blocks)| {
                let wide = subband.blocks_wide as usize;
                let high = subband.blocks_high as usize;
                let first: Vec<u32> = blocks
                    .iter()
                    .map(|block| block.first_layer.map_or(u16::MAX as u32, u32::from))
                    .collect();
                let zero: Vec<u32> = blocks.iter().map(|block| block.zero_bit_planes).collect();
                SubbandEncoder {
                    blocks_wide: wide.max(1),
                    inclusion: TagTreeEncoder::new(wide, high, &first),
                    zero_bit_planes: TagTreeEncoder::new(wide, high, &zero),
                    l_block: vec![3; blocks.len()],
                    blocks,
                }
            })
            .collect();
        PrecinctEncoder { subbands }
    }

    /// Packet header and body of `layer`; the body bytes are filler.
    pub fn encode(&mut self, layer: u16, sop: Option<u16>, eph: bool) -> Vec<u8> {
        let mut packet = Vec::new();
        if let Some(sequence) = sop {
            packet.extend_from_slice(&[0xFF, 0x91, 0x00, 0x04]);
            packet.extend_from_slice(&sequence.to_be_bytes());
        }

        let non_empty = self.subbands.iter().any(|subband| {
            subband
                .blocks
                .iter()
                .any(|block| block.layers[layer as usize].is_some())
        });

        let mut writer = BitWriter::new();
        writer.bit(non_empty);
        let mut body = 0u32;

        if non_empty {
            for subband in &mut self.subbands {
                for b in 0..subband.blocks.len() {
                    let (row, column) = (b / subband.blocks_wide, b % subband.blocks_wide);
                    let block = &subband.blocks[b];
                    let contribution = block.layers[layer as usize].clone();

                    match block.first_layer {
                        Some(first) if first < layer => writer.bit(contribution.is_some()),
                        _ => {
                            subband
                                .inclusion
                                .encode(&mut writer, layer as u32 + 1, row, column);
                            if block.first_layer == Some(layer) {
                                let mut threshold = 1;
                                loop {
                                    subband
                                        .zero_bit_planes
                                        .encode(&mut writer, threshold, row, column);
                                    if block.zero_bit_planes < threshold {
                                        break;
                                    }
                                    threshold *= 2;
                                }
                            }
                        }
                    }

                    let Some((passes, lengths)) = contribution else {
                        continue;
                    };
                    write_passes(&mut writer, passes);

                    let per_segment = if lengths.len() == 1 { passes } else { 1 };
                    let extra = per_segment.ilog2();
                    let needed = lengths
                        .iter()
                        .map(|length| (32 - length.leading_zeros()).saturating_sub(extra))
                        .max()
                        .unwrap_or(0);
                    let l_block = &mut subband.l_block[b];
                    while *l_block < needed {
                        writer.bit(true);
                        *l_block += 1;
                    }
                    writer.bit(false);
                    for length in &lengths {
                        writer.bits(*length, *l_block + extra);
                        body += length;
                    }
                }
            }
        }

        packet.extend(writer.finish());
        if eph {
            packet.extend_from_slice(&[0xFF, 0x92]);
        }
        packet.extend(std::iter::repeat(0x5A).take(body as usize));
        packet
    }
}

pub fn write_passes(writer: &mut BitWriter, passes: u32) {
    match passes {
        1 => writer.bit(false),
        2 => writer.bits(0b10, 2),
        3..=5 => writer.bits(0b1100 | (passes - 3), 4),
        6..=36 => {
            writer.bits(0b1111, 4);
            writer.bits(passes - 6, 5);
        }
        _ => {
            writer.bits(0b1111, 4);
            writer.bits(0b11111, 5);
            writer.bits(passes - 37, 7);
        }
    }
}

/// Every packet of a tile in progression order and the plan behind it.
pub struct SynthesizedTile {
    pub data: Vec<u8>,
    pub plans: HashMap<u64, Vec<Vec<BlockPlan>>>,
    pub packets: usize,
}

pub fn synthesize_tile(tile: &Tile, sop: bool, eph: bool, restart: bool) -> SynthesizedTile {
    let mut encoders: HashMap<u64, PrecinctEncoder> = HashMap::new();
    let mut plans = HashMap::new();
    let mut data = Vec::new();
    let mut sequence = 0u16;
    let mut packets = 0;

    for visit in Traversal::new(tile).visits() {
        let encoder = encoders.entry(visit.in_class_id).or_insert_with(|| {
            let layout = tile
                .resolution_level(visit.component, visit.resolution)
                .unwrap()
                .precinct_subbands(visit.precinct);
            let precinct_plans: Vec<Vec<BlockPlan>> = layout
                .iter()
                .enumerate()
                .map(|(s, subband)| {
                    (0..subband.no_codeblocks())
                        .map(|b| {
                            plan_block(
                                visit.in_class_id * 1000 + s as u64 * 100 + b as u64,
                                tile.no_layers(),
                                restart,
                            )
                        })
                        .collect()
                })
                .collect();
            plans.insert(visit.in_class_id, precinct_plans.clone());
            PrecinctEncoder::new(&layout, precinct_plans)
        });

        for layer in visit.first_layer..visit.first_layer + visit.layer_count {
            data.extend(encoder.encode(layer, sop.then_some(sequence), eph));
            sequence = sequence.wrapping_add(1);
            packets += 1;
        }
    }

    SynthesizedTile {
        data,
        plans,
        packets,
    }
}

/// Writer of standard main headers and single tile-part codestreams.
#[derive(Debug, Clone)]
pub struct CodestreamBuilder {
    pub width: u32,
    pub height: u32,
    pub origin: (u32, u32),
    /// (precision, horizontal separation, vertical separation)
    pub components: Vec<(u8, u8, u8)>,
    pub decomposition_levels: u8,
    pub layers: u16,
    pub progression_order: u8,
    pub code_block_exponents: (u8, u8),
    pub precincts: Option<Vec<(u8, u8)>>,
    pub sop: bool,
    pub eph: bool,
    pub restart: bool,
    /// Extra segments inserted in the main header after QCD.
    pub main_segments: Vec<Vec<u8>>,
    /// Segments inserted between SOT and SOD.
    pub tile_segments: Vec<Vec<u8>>,
    /// Override of the SIZ length field.
    pub siz_length: Option<u16>,
}

impl Default for CodestreamBuilder {
    fn default() -> Self {
        CodestreamBuilder {
            width: 64,
            height: 64,
            origin: (0, 0),
            components: vec![(8, 1, 1)],
            decomposition_levels: 2,
            layers: 2,
            progression_order: 0,
            code_block_exponents: (4, 4),
            precincts: None,
            sop: false,
            eph: false,
            restart: false,
            main_segments: Vec::new(),
            tile_segments: Vec::new(),
            siz_length: None,
        }
    }
}

pub fn segment(marker: u8, body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0xFF, marker];
    bytes.extend_from_slice(&(body.len() as u16 + 2).to_be_bytes());
    bytes.extend_from_slice(body);
    bytes
}

impl CodestreamBuilder {
    pub fn siz(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes());
        for value in [
            self.width,
            self.height,
            self.origin.0,
            self.origin.1,
            self.width,
            self.height,
            0,
            0,
        ] {
            body.extend_from_slice(&value.to_be_bytes());
        }
        body.extend_from_slice(&(self.components.len() as u16).to_be_bytes());
        for (precision, dx, dy) in &self.components {
            body.extend_from_slice(&[precision - 1, *dx, *dy]);
        }
        let mut bytes = segment(0x51, &body);
        if let Some(length) = self.siz_length {
            bytes[2..4].copy_from_slice(&length.to_be_bytes());
        }
        bytes
    }

    pub fn cod(&self) -> Vec<u8> {
        let scod = self.precincts.is_some() as u8 | (self.sop as u8) << 1 | (self.eph as u8) << 2;
        let mut body = vec![scod, self.progression_order];
        body.extend_from_slice(&self.layers.to_be_bytes());
        body.push(0);
        body.extend_from_slice(&[
            self.decomposition_levels,
            self.code_block_exponents.0 - 2,
            self.code_block_exponents.1 - 2,
            if self.restart { 0x04 } else { 0x00 },
            1,
        ]);
        if let Some(precincts) = &self.precincts {
            body.extend(precincts.iter().map(|(ppx, ppy)| ppy << 4 | ppx));
        }
        segment(0x52, &body)
    }

    pub fn qcd(&self) -> Vec<u8> {
        let mut body = vec![2 << 5];
        let subbands = 3 * self.decomposition_levels as usize + 1;
        body.extend((0..subbands).map(|i| (9 + (i as u8 % 3)) << 3));
        segment(0x5C, &body)
    }

    /// COC giving `component` its own decomposition levels and precincts.
    pub fn coc(&self, component: u8, levels: u8, precincts: Option<&[(u8, u8)]>) -> Vec<u8> {
        let mut body = vec![
            component,
            precincts.is_some() as u8,
            levels,
            self.code_block_exponents.0 - 2,
            self.code_block_exponents.1 - 2,
            if self.restart { 0x04 } else { 0x00 },
            1,
        ];
        if let Some(precincts) = precincts {
            body.extend(precincts.iter().map(|(ppx, ppy)| ppy << 4 | ppx));
        }
        segment(0x53, &body)
    }

    /// QCC matching a COC with `levels` decomposition levels.
    pub fn qcc(&self, component: u8, levels: u8) -> Vec<u8> {
        let mut body = vec![component, 2 << 5];
        body.extend((0..3 * levels as usize + 1).map(|i| (9 + (i as u8 % 3)) << 3));
        segment(0x5D, &body)
    }

    pub fn main_header(&self) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0x4F];
        bytes.extend(self.siz());
        bytes.extend(self.cod());
        bytes.extend(self.qcd());
        for extra in &self.main_segments {
            bytes.extend_from_slice(extra);
        }
        bytes
    }

    pub fn build(&self, tile_data: &[u8]) -> Vec<u8> {
        let mut bytes = self.main_header();
        let tile_header: usize = self.tile_segments.iter().map(Vec::len).sum();
        let psot = 12 + tile_header + 2 + tile_data.len();

        bytes.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00]);
        bytes.extend_from_slice(&(psot as u32).to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x01]);
        for extra in &self.tile_segments {
            bytes.extend_from_slice(extra);
        }
        bytes.extend_from_slice(&[0xFF, 0x93]);
        bytes.extend_from_slice(tile_data);
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        bytes
    }

    /// The equivalent compact JPK header.
    pub fn jpk_header(&self) -> Vec<u8> {
        let mut writer = PackedWriter::default();
        writer.bits(1, 8);
        writer.bits(self.components.len() as u64 - 1, 14);
        writer.bits(self.width as u64, 32);
        writer.bits(self.height as u64, 32);
        let has_origin = self.origin != (0, 0);
        writer.flag(has_origin);
        if has_origin {
            writer.bits(self.origin.0 as u64, 32);
            writer.bits(self.origin.1 as u64, 32);
        }

        let per_component = |writer: &mut PackedWriter, values: Vec<u64>, n: u32| {
            let same = values.windows(2).all(|pair| pair[0] == pair[1]);
            writer.flag(same);
            if same {
                writer.bits(values[0], n);
            } else {
                for value in values {
                    writer.bits(value, n);
                }
            }
        };
        per_component(
            &mut writer,
            self.components.iter().map(|c| c.0 as u64 - 1).collect(),
            6,
        );
        per_component(&mut writer, vec![0; self.components.len()], 1);
        per_component(&mut writer, self.components.iter().map(|c| c.1 as u64).collect(), 8);
        per_component(&mut writer, self.components.iter().map(|c| c.2 as u64).collect(), 8);

        writer.bits(self.progression_order as u64, 3);
        // Zero layers wraps to 0xFFFF, a count of 65536.
        writer.bits((self.layers as u64).wrapping_sub(1), 16);
        writer.bits(0, 2);
        writer.flag(self.restart);
        writer.flag(self.sop);
        writer.flag(self.eph);

        // One coding block shared by all components.
        writer.flag(true);
        writer.bits(self.decomposition_levels as u64, 6);
        writer.flag(true);
        writer.bits(self.code_block_exponents.0 as u64, 4);
        writer.bits(self.code_block_exponents.1 as u64, 4);
        writer.flag(self.precincts.is_some());
        if let Some(precincts) = &self.precincts {
            for (ppx, ppy) in precincts {
                writer.bits(*ppx as u64, 4);
                writer.bits(*ppy as u64, 4);
            }
        }
        writer.bits(0, 2);
        writer.bits(2, 3);
        for i in 0..3 * self.decomposition_levels as u64 + 1 {
            writer.bits(9 + i % 3, 5);
        }

        let mut bytes = b"JPK".to_vec();
        bytes.extend(writer.finish());
        bytes
    }
}
