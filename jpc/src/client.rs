//! Client side decoding of precinct data-bins as JPIP delivers them.

use std::io;

use log::debug;

use crate::data_bin::{DataBin, DataBinRead};
use crate::dialect::{decode_main_header, DecodeOptions};
use crate::packet::{PacketContext, PacketHeaderDecoder, PrecinctDecodeState};
use crate::parameters::MainHeader;
use crate::target::{Tcrp, Tile};
use crate::{CodestreamError, Progress};

/// Tile structure of one codestream plus the packet decode state of every
/// precinct seen so far.
#[derive(Debug)]
pub struct ClientDecoder {
    header: MainHeader,
    tile: Tile,
    decoders: Vec<PacketHeaderDecoder>,
}

impl ClientDecoder {
    pub fn new(header: MainHeader) -> Result<Self, CodestreamError> {
        let tile = Tile::new(&header)?;
        let decoders = (0..tile.no_components())
            .map(|c| PacketHeaderDecoder::for_component(&header, c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClientDecoder {
            header,
            tile,
            decoders,
        })
    }

    /// Decodes the main header data-bin once it is complete.
    pub fn from_main_header_bin(
        bin: &DataBin,
        options: &DecodeOptions,
    ) -> Result<Progress<Self>, CodestreamError> {
        if !bin.is_complete() {
            return Ok(Progress::Paused);
        }
        let mut reader = io::Cursor::new(bin.snapshot());
        let header = decode_main_header(&mut reader, options)?;
        Ok(Progress::Complete(ClientDecoder::new(header)?))
    }

    pub fn header(&self) -> &MainHeader {
        &self.header
    }

    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    /// Decode state of a precinct, if any of its packets were decoded.
    pub fn precinct_state(&self, in_class_id: u64) -> Result<Option<&PrecinctDecodeState>, CodestreamError> {
        let Tcrp {
            component,
            resolution,
            precinct,
            ..
        } = self.tile.find_tcrp(in_class_id)?;
        Ok(self.tile.precinct(component, resolution, precinct)?.state())
    }

    /// Decodes every packet header the precinct data-bin holds beyond those
    /// already decoded.
    ///
    /// Returns the number of layers decoded so far, or `Paused` when the bin
    /// does not yet hold another complete packet header. A complete bin that
    /// ends inside a packet header is corrupt; one that ends on a packet
    /// boundary leaves the remaining layers empty.
    ///
    /// SOP sequence numbers are not checked. Nsop counts packets over the
    /// whole codestream, so the packets of one precinct data-bin carry
    /// numbers with gaps that depend on the progression order.
    ///
    /// After an error the precinct stays unusable until
    /// [`ClientDecoder::reset_precinct`].
    pub fn decode_precinct(
        &mut self,
        in_class_id: u64,
        bin: &DataBin,
    ) -> Result<Progress<u16>, CodestreamError> {
        let tcrp = self.tile.find_tcrp(in_class_id)?;
        let decoder = self.decoders[tcrp.component as usize];
        let no_layers = self.tile.no_layers();

        let mut reader = bin.lock();
        let state = self
            .tile
            .precinct_state_mut(tcrp.component, tcrp.resolution, tcrp.precinct)?;

        let first = state.next_layer();
        while state.next_layer() < no_layers {
            let context = PacketContext {
                layer: state.next_layer(),
                offset: state.next_offset(),
                sequence: None,
            };
            if decoder.decode(state, &mut reader, context)?.is_paused() {
                if !bin.is_complete() {
                    break;
                }
                if state.next_offset() == reader.available() {
                    debug!(
                        "precinct {} complete after {} of {} layers",
                        tcrp,
                        state.next_layer(),
                        no_layers
                    );
                    return Ok(Progress::Complete(state.next_layer()));
                }
                return Err(CodestreamError::PacketError {
                    offset: state.next_offset(),
                    error: format!("data-bin {} ends inside a packet header", in_class_id),
                });
            }
        }

        let decoded = state.next_layer();
        debug!("precinct {}: layers {}..{} decoded", tcrp, first, decoded);
        if decoded == first && decoded < no_layers {
            Ok(Progress::Paused)
        } else {
            Ok(Progress::Complete(decoded))
        }
    }

    /// Forgets the decoded packets of a precinct, e.g. after its data-bin
    /// was evicted.
    pub fn reset_precinct(&mut self, in_class_id: u64) -> Result<(), CodestreamError> {
        let tcrp = self.tile.find_tcrp(in_class_id)?;
        self.tile
            .reset_precinct(tcrp.component, tcrp.resolution, tcrp.precinct)
    }
}
