//! Packet header decoding (ISO/IEC 15444-1 B.9, B.10).
//!
//! Every precinct owns a [`PrecinctDecodeState`] holding its tag trees and
//! the accumulated record of each codeblock. Packet headers are decoded one
//! layer at a time from a [`DataBinRead`]; when the reader runs out of bytes
//! the decoder returns [`Progress::Paused`] and keeps everything it has read,
//! so the same call can be repeated after more bytes arrive.

use std::ops::Range;

use log::debug;

use crate::data_bin::{BitCursor, DataBinRead, Unavailable};
use crate::marker::{MARKER_SYMBOL_EPH, MARKER_SYMBOL_SOP, SOP_SEGMENT_LENGTH, SOP_SEGMENT_SIZE};
use crate::parameters::MainHeader;
use crate::tag_tree::TagTreeDecoder;
use crate::target::{PrecinctSubband, SubbandKind};
use crate::{CodestreamError, Progress};

/// Initial value of Lblock (B.10.7.1).
const INITIAL_L_BLOCK: u32 = 3;

/// Codeword segment lengths are read into 32 bits.
const MAX_LENGTH_BITS: u32 = 32;

/// Bound of the zero bit-plane probe. Valid counts lie below the number of
/// magnitude bit-planes, at most 38.
const MAX_ZERO_BIT_PLANES: u32 = 1 << 8;

/// Bytes of one codeword segment within the data-bin or tile data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodewordSegment {
    pub offset: u64,
    pub length: u32,
    pub passes: u32,
}

/// Everything the packet headers decoded so far tell about one codeblock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeblockState {
    first_layer: Option<u16>,
    zero_bit_planes: Option<u32>,
    l_block: u32,
    coding_passes: u32,
    segments: Vec<CodewordSegment>,
}

impl CodeblockState {
    /// Layer the codeblock was first included in.
    pub fn first_layer(&self) -> Option<u16> {
        self.first_layer
    }

    pub fn is_included(&self) -> bool {
        self.first_layer.is_some()
    }

    /// Number of missing most significant bit-planes.
    pub fn zero_bit_planes(&self) -> Result<u32, CodestreamError> {
        self.zero_bit_planes.ok_or_else(|| {
            CodestreamError::contract("zero bit-planes of a codeblock that was never included")
        })
    }

    pub fn l_block(&self) -> u32 {
        self.l_block
    }

    /// Coding passes over all decoded layers.
    pub fn coding_passes(&self) -> u32 {
        self.coding_passes
    }

    pub fn segments(&self) -> &[CodewordSegment] {
        &self.segments
    }
}

/// New coding passes of one codeblock in one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeblockContribution {
    /// Index of the subband within the precinct, in packet order.
    pub subband: usize,
    pub kind: SubbandKind,
    /// Codeblock row and column within the precinct.
    pub row: u32,
    pub column: u32,
    pub passes: u32,
    pub segments: Vec<CodewordSegment>,
}

/// A decoded packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub layer: u16,
    /// The packet carries no codeblock data.
    pub empty: bool,
    /// Header bytes including SOP and EPH marker segments.
    pub header: Range<u64>,
    /// Codeblock data following the header.
    pub body: Range<u64>,
    pub contributions: Vec<CodeblockContribution>,
}

impl PacketHeader {
    pub fn len(&self) -> u64 {
        self.body.end - self.header.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where and which packet to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketContext {
    pub layer: u16,
    /// Offset of the first byte of the packet.
    pub offset: u64,
    /// Expected Nsop, checked when the packet starts with SOP.
    pub sequence: Option<u16>,
}

#[derive(Debug, Clone)]
struct SubbandState {
    kind: SubbandKind,
    blocks_wide: u32,
    inclusion: TagTreeDecoder,
    zero_bit_planes: TagTreeDecoder,
    blocks: Vec<CodeblockState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Sop,
    Empty,
    Codeblocks,
    End,
}

/// Position of a packet header decode that ran out of bytes.
#[derive(Debug, Clone)]
struct Resume {
    layer: u16,
    start: u64,
    phase: Phase,
    cursor: BitCursor,
    subband: usize,
    block: usize,
    /// Inclusion of the current codeblock, once read.
    included: Option<bool>,
    contributions: Vec<CodeblockContribution>,
}

impl Resume {
    fn new(layer: u16, start: u64) -> Self {
        Resume {
            layer,
            start,
            phase: Phase::Sop,
            cursor: BitCursor::new(start),
            subband: 0,
            block: 0,
            included: None,
            contributions: Vec::new(),
        }
    }
}

enum Halt {
    Paused,
    Failed(CodestreamError),
}

impl From<Unavailable> for Halt {
    fn from(_: Unavailable) -> Self {
        Halt::Paused
    }
}

impl From<CodestreamError> for Halt {
    fn from(error: CodestreamError) -> Self {
        Halt::Failed(error)
    }
}

/// Packet decode state of one precinct.
#[derive(Debug, Clone)]
pub struct PrecinctDecodeState {
    subbands: Vec<SubbandState>,
    next_layer: u16,
    next_offset: u64,
    resume: Option<Resume>,
    // Offset of the packet whose decode failed. Tag trees and Lblock may
    // hold bits of that packet.
    failed_at: Option<u64>,
}

impl PrecinctDecodeState {
    pub fn new(subbands: &[PrecinctSubband]) -> Self {
        let subbands = subbands
            .iter()
            .map(|subband| {
                let wide = subband.blocks_wide as usize;
                let high = subband.blocks_high as usize;
                SubbandState {
                    kind: subband.kind,
                    blocks_wide: subband.blocks_wide,
                    inclusion: TagTreeDecoder::new(wide, high),
                    zero_bit_planes: TagTreeDecoder::new(wide, high),
                    blocks: vec![CodeblockState::default(); subband.no_codeblocks()],
                }
            })
            .collect();

        PrecinctDecodeState {
            subbands,
            next_layer: 0,
            next_offset: 0,
            resume: None,
            failed_at: None,
        }
    }

    /// Forgets every decoded layer.
    pub fn reset(&mut self) {
        for subband in &mut self.subbands {
            subband.inclusion.reset();
            subband.zero_bit_planes.reset();
            subband.blocks.fill(CodeblockState::default());
        }
        self.next_layer = 0;
        self.next_offset = 0;
        self.resume = None;
        self.failed_at = None;
    }

    /// The layer the next packet belongs to.
    pub fn next_layer(&self) -> u16 {
        self.next_layer
    }

    /// Offset following the last decoded packet.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// A packet header decode paused and waits for more bytes.
    pub fn is_paused(&self) -> bool {
        self.resume.is_some()
    }

    /// A packet header decode failed; only [`PrecinctDecodeState::reset`]
    /// makes the state usable again.
    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    pub fn no_subbands(&self) -> usize {
        self.subbands.len()
    }

    pub fn codeblocks(&self, subband: usize) -> &[CodeblockState] {
        self.subbands
            .get(subband)
            .map(|subband| subband.blocks.as_slice())
            .unwrap_or(&[])
    }

    pub fn codeblock(&self, subband: usize, row: u32, column: u32) -> Option<&CodeblockState> {
        let state = self.subbands.get(subband)?;
        if column >= state.blocks_wide {
            return None;
        }
        state
            .blocks
            .get(row as usize * state.blocks_wide as usize + column as usize)
    }
}

/// Packet header syntax of one tile-component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeaderDecoder {
    sop: bool,
    eph: bool,
    restart: bool,
    no_layers: u16,
}

impl PacketHeaderDecoder {
    pub fn new(sop: bool, eph: bool, restart: bool, no_layers: u16) -> Self {
        PacketHeaderDecoder {
            sop,
            eph,
            restart,
            no_layers,
        }
    }

    pub fn for_component(header: &MainHeader, c: u16) -> Result<Self, CodestreamError> {
        let component = header
            .components()
            .get(c as usize)
            .ok_or_else(|| CodestreamError::contract(format!("component {} does not exist", c)))?;
        let coding = header.coding();
        Ok(PacketHeaderDecoder {
            sop: coding.sop_allowed(),
            eph: coding.eph_used(),
            restart: component.coding().restart(),
            no_layers: coding.no_layers(),
        })
    }

    /// Decodes the header of the next packet of a precinct.
    ///
    /// Layers have to be decoded in order. A paused decode has to be
    /// repeated with the same context. After a failed decode every further
    /// decode is a contract violation until the state is reset.
    pub fn decode<R: DataBinRead + ?Sized>(
        &self,
        state: &mut PrecinctDecodeState,
        reader: &mut R,
        context: PacketContext,
    ) -> Result<Progress<PacketHeader>, CodestreamError> {
        if let Some(offset) = state.failed_at {
            return Err(CodestreamError::contract(format!(
                "decoding the packet at byte offset {} failed, the precinct must be reset",
                offset
            )));
        }
        if context.layer >= self.no_layers {
            return Err(CodestreamError::contract(format!(
                "layer {} of {} layers",
                context.layer, self.no_layers
            )));
        }
        if context.layer != state.next_layer {
            return Err(CodestreamError::contract(format!(
                "layer {} decoded while layer {} is next",
                context.layer, state.next_layer
            )));
        }

        let mut resume = match state.resume.take() {
            None => Resume::new(context.layer, context.offset),
            Some(resume) if resume.start == context.offset => resume,
            Some(resume) => {
                let start = resume.start;
                state.resume = Some(resume);
                return Err(CodestreamError::contract(format!(
                    "paused packet starts at byte offset {}, not {}",
                    start, context.offset
                )));
            }
        };

        match self.decode_packet(&mut state.subbands, &mut resume, reader, context.sequence) {
            Ok(header) => {
                for contribution in &header.contributions {
                    let subband = &mut state.subbands[contribution.subband];
                    let index = contribution.row as usize * subband.blocks_wide as usize
                        + contribution.column as usize;
                    let block = &mut subband.blocks[index];
                    block.coding_passes += contribution.passes;
                    block.segments.extend_from_slice(&contribution.segments);
                }
                state.next_layer += 1;
                state.next_offset = header.body.end;
                debug!(
                    "layer {} packet: header {:?}, body {:?}, {} codeblocks",
                    header.layer,
                    header.header,
                    header.body,
                    header.contributions.len()
                );
                Ok(Progress::Complete(header))
            }
            Err(Halt::Paused) => {
                debug!(
                    "layer {} packet paused at byte offset {}",
                    context.layer,
                    resume.cursor.offset()
                );
                state.resume = Some(resume);
                Ok(Progress::Paused)
            }
            Err(Halt::Failed(error)) => {
                state.failed_at = Some(resume.start);
                Err(error)
            }
        }
    }

    fn decode_packet<R: DataBinRead + ?Sized>(
        &self,
        subbands: &mut [SubbandState],
        resume: &mut Resume,
        reader: &mut R,
        sequence: Option<u16>,
    ) -> Result<PacketHeader, Halt> {
        if resume.phase == Phase::Sop {
            let mut header_start = resume.start;
            if self.sop {
                header_start += read_sop(reader, resume.start, sequence)?;
            }
            resume.cursor = BitCursor::new(header_start);
            resume.phase = Phase::Empty;
        }

        if resume.phase == Phase::Empty {
            let non_empty = resume.cursor.read_bit(reader)?;
            resume.phase = if non_empty {
                Phase::Codeblocks
            } else {
                Phase::End
            };
        }

        if resume.phase == Phase::Codeblocks {
            self.read_codeblocks(subbands, resume, reader)?;
            resume.phase = Phase::End;
        }

        let mut header_end = resume.cursor.end_offset(reader)?;
        if self.eph {
            reader.seek(header_end);
            let mut marker = [0u8; 2];
            reader.read_fully(&mut marker)?;
            if marker != MARKER_SYMBOL_EPH {
                return Err(Halt::Failed(CodestreamError::PacketError {
                    offset: header_end,
                    error: format!("EPH expected, found {:02X?}", marker),
                }));
            }
            header_end += 2;
        }

        let mut offset = header_end;
        let mut contributions = std::mem::take(&mut resume.contributions);
        for contribution in &mut contributions {
            for segment in &mut contribution.segments {
                segment.offset = offset;
                offset += segment.length as u64;
            }
        }

        Ok(PacketHeader {
            layer: resume.layer,
            empty: contributions.is_empty(),
            header: resume.start..header_end,
            body: header_end..offset,
            contributions,
        })
    }

    fn read_codeblocks<R: DataBinRead + ?Sized>(
        &self,
        subbands: &mut [SubbandState],
        resume: &mut Resume,
        reader: &mut R,
    ) -> Result<(), Halt> {
        let layer = resume.layer;

        while resume.subband < subbands.len() {
            let subband = &mut subbands[resume.subband];

            while resume.block < subband.blocks.len() {
                let row = resume.block / subband.blocks_wide as usize;
                let column = resume.block % subband.blocks_wide as usize;
                let cursor = &mut resume.cursor;

                // B.10.4: tag tree coded until first inclusion, one bit after.
                let included = match resume.included {
                    Some(included) => included,
                    None => {
                        let included = if subband.blocks[resume.block].is_included() {
                            cursor.read_bit(reader)?
                        } else {
                            let first_layer = subband.inclusion.decode(
                                layer as u32 + 1,
                                row,
                                column,
                                || cursor.read_bit(reader),
                            )?;
                            first_layer <= layer as u32
                        };
                        resume.included = Some(included);
                        included
                    }
                };

                if included {
                    if subband.blocks[resume.block].zero_bit_planes.is_none() {
                        let zero_bit_planes =
                            probe_zero_bit_planes(&mut subband.zero_bit_planes, row, column, || {
                                cursor.read_bit(reader)
                            })?
                            .ok_or_else(|| CodestreamError::PacketError {
                                offset: cursor.offset(),
                                error: format!(
                                    "zero bit-plane count of codeblock ({}, {}) is at least {}",
                                    row, column, MAX_ZERO_BIT_PLANES
                                ),
                            })?;
                        let block = &mut subband.blocks[resume.block];
                        block.first_layer = Some(layer);
                        block.zero_bit_planes = Some(zero_bit_planes);
                        block.l_block = INITIAL_L_BLOCK;
                    }

                    let block = &mut subband.blocks[resume.block];
                    let mut group = *cursor;
                    let (passes, l_block, segments) =
                        read_lengths(&mut group, reader, block.l_block, self.restart)?;
                    *cursor = group;
                    block.l_block = l_block;

                    resume.contributions.push(CodeblockContribution {
                        subband: resume.subband,
                        kind: subband.kind,
                        row: row as u32,
                        column: column as u32,
                        passes,
                        segments,
                    });
                }

                resume.block += 1;
                resume.included = None;
            }

            resume.subband += 1;
            resume.block = 0;
        }

        Ok(())
    }
}

/// Reads an SOP marker segment if one starts at `offset`. Returns the
/// number of bytes it occupies.
fn read_sop<R: DataBinRead + ?Sized>(
    reader: &mut R,
    offset: u64,
    sequence: Option<u16>,
) -> Result<u64, Halt> {
    reader.seek(offset);
    if reader.read_byte()? != MARKER_SYMBOL_SOP[0] || reader.read_byte()? != MARKER_SYMBOL_SOP[1] {
        return Ok(0);
    }

    let mut segment = [0u8; SOP_SEGMENT_SIZE - 2];
    reader.read_fully(&mut segment)?;
    let length = u16::from_be_bytes([segment[0], segment[1]]);
    if length != SOP_SEGMENT_LENGTH {
        return Err(Halt::Failed(CodestreamError::LengthMismatch {
            marker: MARKER_SYMBOL_SOP,
            length,
            expected: SOP_SEGMENT_LENGTH,
        }));
    }

    let nsop = u16::from_be_bytes([segment[2], segment[3]]);
    if let Some(expected) = sequence {
        if nsop != expected {
            return Err(Halt::Failed(CodestreamError::PacketError {
                offset,
                error: format!("SOP sequence number {} where {} was expected", nsop, expected),
            }));
        }
    }

    Ok(SOP_SEGMENT_SIZE as u64)
}

/// B.10.5: the zero bit-plane count is tag tree coded, probed with doubling
/// thresholds until the returned value lies below the threshold. `None` once
/// the count reaches [`MAX_ZERO_BIT_PLANES`].
fn probe_zero_bit_planes<F>(
    tree: &mut TagTreeDecoder,
    row: usize,
    column: usize,
    mut read_bit: F,
) -> Result<Option<u32>, Unavailable>
where
    F: FnMut() -> Result<bool, Unavailable>,
{
    let mut threshold = 1u32;
    while threshold <= MAX_ZERO_BIT_PLANES {
        let value = tree.decode(threshold, row, column, &mut read_bit)?;
        if value < threshold {
            return Ok(Some(value));
        }
        threshold *= 2;
    }
    Ok(None)
}

/// B.10.6, Table B.4
pub(crate) fn read_coding_passes<R: DataBinRead + ?Sized>(
    cursor: &mut BitCursor,
    reader: &mut R,
) -> Result<u32, Unavailable> {
    if !cursor.read_bit(reader)? {
        return Ok(1);
    }
    if !cursor.read_bit(reader)? {
        return Ok(2);
    }
    let value = cursor.read_bits(reader, 2)?;
    if value < 3 {
        return Ok(3 + value);
    }
    let value = cursor.read_bits(reader, 5)?;
    if value <= 30 {
        return Ok(6 + value);
    }
    Ok(37 + cursor.read_bits(reader, 7)?)
}

/// B.10.7: coding pass count, Lblock increment and codeword segment lengths
/// of one included codeblock.
fn read_lengths<R: DataBinRead + ?Sized>(
    cursor: &mut BitCursor,
    reader: &mut R,
    mut l_block: u32,
    restart: bool,
) -> Result<(u32, u32, Vec<CodewordSegment>), Halt> {
    let passes = read_coding_passes(cursor, reader)?;

    while cursor.read_bit(reader)? {
        l_block += 1;
        if l_block > MAX_LENGTH_BITS {
            return Err(Halt::Failed(CodestreamError::PacketError {
                offset: cursor.offset(),
                error: format!("Lblock {} exceeds {} bits", l_block, MAX_LENGTH_BITS),
            }));
        }
    }

    let segment = |cursor: &mut BitCursor, reader: &mut R, passes: u32| -> Result<CodewordSegment, Halt> {
        let bits = l_block + passes.ilog2();
        if bits > MAX_LENGTH_BITS {
            return Err(Halt::Failed(CodestreamError::PacketError {
                offset: cursor.offset(),
                error: format!("codeword segment length of {} bits", bits),
            }));
        }
        let length = cursor.read_bits(reader, bits as u8)?;
        Ok(CodewordSegment {
            offset: 0,
            length,
            passes,
        })
    };

    let segments = if restart {
        (0..passes)
            .map(|_| segment(cursor, reader, 1))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![segment(cursor, reader, passes)?]
    };

    Ok((passes, l_block, segments))
}
