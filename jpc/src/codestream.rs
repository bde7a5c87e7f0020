//! Indexing of complete single-tile codestreams: every packet of the tile is
//! located and filed under the in-class identifier of its precinct, which
//! is what a JPIP server needs to serve precinct data-bins.

use std::collections::HashMap;
use std::io::{self, Read};
use std::ops::Range;

use log::{debug, info, warn};

use crate::data_bin::SliceReader;
use crate::dialect::{decode_main_header, DecodeOptions, HeaderDialect};
use crate::header::{next_marker, skip_segment, SegmentBody};
use crate::marker::*;
use crate::packet::{PacketContext, PacketHeaderDecoder};
use crate::parameters::MainHeader;
use crate::progression::Traversal;
use crate::target::Tile;
use crate::{CodestreamError, Progress, UnsupportedFeature};

/// Absolute byte ranges of one packet in the codestream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRange {
    pub layer: u16,
    pub header: Range<u64>,
    pub body: Range<u64>,
}

impl PacketRange {
    pub fn len(&self) -> u64 {
        self.body.end - self.header.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct TilePartHeader {
    offset: u64,
    length: u32,
}

/// Packets of a codestream grouped by precinct.
#[derive(Debug, Default)]
pub struct CodestreamIndex {
    options: DecodeOptions,
    header: Option<MainHeader>,
    tile: Option<Tile>,
    packets: HashMap<u64, Vec<PacketRange>>,
    packet_count: usize,
    truncated: bool,
    tile_data: Vec<u8>,
    data_offset: u64,
}

impl CodestreamIndex {
    pub fn new(options: DecodeOptions) -> Self {
        CodestreamIndex {
            options,
            ..Default::default()
        }
    }

    /// Decodes the main header and the tile-part header and indexes every
    /// packet. Returns the number of packets indexed.
    ///
    /// The header and tile are available from [`CodestreamIndex::header`]
    /// and [`CodestreamIndex::tile`] as soon as they are built, also when a
    /// later step fails.
    pub fn index<R: io::Read + io::Seek>(&mut self, reader: &mut R) -> Result<usize, CodestreamError> {
        let header = decode_main_header(reader, &self.options)?;
        let tile = Tile::new(&header);
        let dialect = header.dialect();
        self.header = Some(header);
        self.tile = Some(tile?);

        match dialect {
            HeaderDialect::Jpc => {
                let Some(tile_part) = decode_tile_part_header(reader)? else {
                    warn!("codestream ends before the first tile-part");
                    self.truncated = true;
                    return Ok(0);
                };
                self.read_tile_data(reader, &tile_part)?;
                self.check_single_tile_part(reader)?;
            }
            HeaderDialect::Jpk => {
                // Packets follow the header up to the end of the input.
                self.data_offset = reader.stream_position()?;
                reader.read_to_end(&mut self.tile_data)?;
            }
        }

        self.index_packets()?;
        info!(
            "indexed {} packets of {} precincts{}",
            self.packet_count,
            self.packets.len(),
            if self.truncated { " (truncated)" } else { "" }
        );
        Ok(self.packet_count)
    }
}

/// SOT and the tile-part header up to SOD. `None` when the input ends
/// right after the main header.
fn decode_tile_part_header<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<Option<TilePartHeader>, CodestreamError> {
    let marker = match next_marker(reader)? {
        Some(MARKER_SYMBOL_EOC) | None => return Ok(None),
        Some(marker) => marker,
    };
    let offset = reader.stream_position()? - 2;
    if marker != MARKER_SYMBOL_SOT {
        return Err(CodestreamError::MarkerUnexpected { marker, offset });
    }
    info!("SOT start at byte offset {}", offset);

    let length = decode_sot(reader)?;

    loop {
        let Some(marker) = next_marker(reader)? else {
            return Err(CodestreamError::MarkerMissing {
                marker: MARKER_SYMBOL_SOD,
            });
        };

        match marker {
            MARKER_SYMBOL_SOD => {
                info!("SOD at byte offset {}", reader.stream_position()? - 2);
                break;
            }
            MARKER_SYMBOL_COM | MARKER_SYMBOL_PLT => {
                debug!("skipping {} in tile-part header", marker_name(marker));
                skip_segment(reader, marker)?;
            }
            MARKER_SYMBOL_COD | MARKER_SYMBOL_COC | MARKER_SYMBOL_QCD | MARKER_SYMBOL_QCC => {
                return Err(CodestreamError::unsupported(
                    UnsupportedFeature::TileHeaderParameters { marker },
                ));
            }
            marker if is_always_unsupported(marker) || marker == MARKER_SYMBOL_PPT => {
                return Err(CodestreamError::unsupported(UnsupportedFeature::Marker {
                    marker,
                    context: "tile-part header",
                }));
            }
            MARKER_SYMBOL_SOC
            | MARKER_SYMBOL_SIZ
            | MARKER_SYMBOL_SOT
            | MARKER_SYMBOL_SOP
            | MARKER_SYMBOL_EPH
            | MARKER_SYMBOL_EOC => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker,
                    offset: reader.stream_position()? - 2,
                });
            }
            marker if has_segment(marker) => {
                warn!(
                    "skipping unknown marker 0xFF{:0>2X} in tile-part header",
                    marker[1]
                );
                skip_segment(reader, marker)?;
            }
            marker => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker,
                    offset: reader.stream_position()? - 2,
                });
            }
        }
    }

    Ok(Some(TilePartHeader { offset, length }))
}

/// A.4.2: returns Psot.
fn decode_sot<R: io::Read>(reader: &mut R) -> Result<u32, CodestreamError> {
    let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_SOT)?;
    if segment.length() != SOT_SEGMENT_LENGTH {
        return Err(CodestreamError::LengthMismatch {
            marker: MARKER_SYMBOL_SOT,
            length: segment.length(),
            expected: SOT_SEGMENT_LENGTH,
        });
    }

    let tile_index = segment.u16("Isot")?;
    let length = segment.u32("Psot")?;
    let tile_part_index = segment.u8("TPsot")?;
    let no_tile_parts = segment.u8("TNsot")?;
    debug!(
        "SOT Isot = {}, Psot = {}, TPsot = {}, TNsot = {}",
        tile_index, length, tile_part_index, no_tile_parts
    );

    if tile_index != 0 || tile_part_index != 0 || no_tile_parts > 1 {
        return Err(CodestreamError::unsupported(
            UnsupportedFeature::MultipleTileParts {
                tile_index,
                tile_part_index,
                no_tile_parts,
            },
        ));
    }
    if length != 0 && length < SOT_SEGMENT_LENGTH as u32 + 4 {
        return Err(CodestreamError::out_of_range(MARKER_SYMBOL_SOT, "Psot", length));
    }
    Ok(length)
}

impl CodestreamIndex {
    fn read_tile_data<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
        tile_part: &TilePartHeader,
    ) -> Result<(), CodestreamError> {
        self.data_offset = reader.stream_position()?;

        if tile_part.length == 0 {
            // The tile-part extends to EOC.
            reader.read_to_end(&mut self.tile_data)?;
            if self.tile_data.ends_with(&MARKER_SYMBOL_EOC) {
                self.tile_data.truncate(self.tile_data.len() - 2);
            }
            return Ok(());
        }

        let end = tile_part.offset + tile_part.length as u64;
        if end < self.data_offset {
            return Err(CodestreamError::out_of_range(
                MARKER_SYMBOL_SOT,
                "Psot",
                tile_part.length,
            ));
        }
        let expected = end - self.data_offset;
        reader
            .by_ref()
            .take(expected)
            .read_to_end(&mut self.tile_data)?;
        if (self.tile_data.len() as u64) < expected {
            warn!(
                "tile-part data ends after {} of {} bytes",
                self.tile_data.len(),
                expected
            );
            self.truncated = true;
        }
        Ok(())
    }

    fn check_single_tile_part<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<(), CodestreamError> {
        if self.truncated {
            return Ok(());
        }
        match next_marker(reader)? {
            None | Some(MARKER_SYMBOL_EOC) => Ok(()),
            Some(MARKER_SYMBOL_SOT) => {
                let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_SOT)?;
                let tile_index = segment.u16("Isot")?;
                segment.u32("Psot")?;
                let tile_part_index = segment.u8("TPsot")?;
                let no_tile_parts = segment.u8("TNsot")?;
                Err(CodestreamError::unsupported(
                    UnsupportedFeature::MultipleTileParts {
                        tile_index,
                        tile_part_index,
                        no_tile_parts,
                    },
                ))
            }
            Some(marker) => {
                warn!(
                    "{} after the tile-part at byte offset {}",
                    marker_name(marker),
                    reader.stream_position()? - 2
                );
                Ok(())
            }
        }
    }

    fn index_packets(&mut self) -> Result<(), CodestreamError> {
        let (Some(header), Some(tile)) = (self.header.as_ref(), self.tile.as_mut()) else {
            return Err(CodestreamError::contract("no main header decoded"));
        };

        let decoders = (0..tile.no_components())
            .map(|c| PacketHeaderDecoder::for_component(header, c))
            .collect::<Result<Vec<_>, _>>()?;
        let visits = Traversal::new(tile).visits();

        let mut reader = SliceReader::new(&self.tile_data);
        let available = self.tile_data.len() as u64;
        let mut offset = 0u64;
        let mut sequence = 0u16;

        'visits: for visit in visits {
            let decoder = &decoders[visit.component as usize];
            for layer in visit.first_layer..visit.first_layer + visit.layer_count {
                let state = tile.precinct_state_mut(visit.component, visit.resolution, visit.precinct)?;
                let context = PacketContext {
                    layer,
                    offset,
                    sequence: self.options.check_sop_sequence.then_some(sequence),
                };

                let packet = match decoder.decode(state, &mut reader, context)? {
                    Progress::Complete(packet) => packet,
                    Progress::Paused => {
                        warn!("packet header at byte offset {} is incomplete", self.data_offset + offset);
                        self.truncated = true;
                        break 'visits;
                    }
                };
                if packet.body.end > available {
                    warn!(
                        "packet body at byte offset {} is incomplete",
                        self.data_offset + packet.body.start
                    );
                    self.truncated = true;
                    break 'visits;
                }

                let shift = |range: &Range<u64>| self.data_offset + range.start..self.data_offset + range.end;
                self.packets
                    .entry(visit.in_class_id)
                    .or_default()
                    .push(PacketRange {
                        layer,
                        header: shift(&packet.header),
                        body: shift(&packet.body),
                    });
                self.packet_count += 1;
                offset = packet.body.end;
                sequence = sequence.wrapping_add(1);
            }
        }

        if !self.truncated && offset < available {
            warn!("{} bytes after the last packet", available - offset);
        }
        Ok(())
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn header(&self) -> Option<&MainHeader> {
        self.header.as_ref()
    }

    pub fn tile(&self) -> Option<&Tile> {
        self.tile.as_ref()
    }

    /// Packets of a precinct in layer order.
    pub fn packets(&self, in_class_id: u64) -> &[PacketRange] {
        self.packets
            .get(&in_class_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// The codestream ended before the last packet of the tile.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// In-class identifiers of all precincts with packets, ascending.
    pub fn precinct_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.packets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Concatenated packets of a precinct, the contents of its precinct
    /// data-bin.
    pub fn precinct_bytes(&self, in_class_id: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        for packet in self.packets(in_class_id) {
            let start = (packet.header.start - self.data_offset) as usize;
            let end = (packet.body.end - self.data_offset) as usize;
            if let Some(data) = self.tile_data.get(start..end) {
                bytes.extend_from_slice(data);
            }
        }
        bytes
    }
}
