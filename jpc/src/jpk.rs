//! Compact "JPK" main header.
//!
//! A private packed-bit encoding of the same parameters the SIZ, COD, COC,
//! QCD and QCC marker segments carry, used by sources that do not write a
//! standard codestream. Fields are read most significant bit first with no
//! bit stuffing, and the header is padded to a byte boundary. Per-component
//! values are preceded by a flag telling whether one value is shared by all
//! components or one value per component follows.

use std::io;

use log::info;

use crate::dialect::HeaderDialect;
use crate::marker::{MARKER_SYMBOL_COD, MARKER_SYMBOL_QCD, MARKER_SYMBOL_SIZ};
use crate::parameters::{
    CodingParameters, ComponentCodingParameters, ComponentSizing, HeaderParts, MainHeader,
    MultipleComponentTransformation, PrecinctSize, ProgressionOrder, QuantizationStyle,
    SignalledQuantization, SizingParameters, StepSize, TransformationFilter,
    CODE_BLOCK_STYLE_RESTART,
};
use crate::CodestreamError;

pub const JPK_MAGIC: &[u8; 3] = b"JPK";
pub const JPK_VERSION: u32 = 1;

struct PackedBits<'r, R> {
    reader: &'r mut R,
    byte: u8,
    bits_left: u8,
    consumed: u64,
}

impl<'r, R: io::Read> PackedBits<'r, R> {
    fn new(reader: &'r mut R) -> Self {
        PackedBits {
            reader,
            byte: 0,
            bits_left: 0,
            consumed: 0,
        }
    }

    fn bit(&mut self) -> Result<u32, CodestreamError> {
        if self.bits_left == 0 {
            let mut byte: [u8; 1] = [0; 1];
            self.reader.read_exact(&mut byte)?;
            self.byte = byte[0];
            self.bits_left = 8;
            self.consumed += 1;
        }
        self.bits_left -= 1;
        Ok(((self.byte >> self.bits_left) & 1) as u32)
    }

    fn bits(&mut self, n: u8) -> Result<u32, CodestreamError> {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.bit()?;
        }
        Ok(value)
    }

    fn flag(&mut self) -> Result<bool, CodestreamError> {
        Ok(self.bit()? == 1)
    }

    /// One value shared by all components or one value per component.
    fn component_values(&mut self, no_components: usize, n: u8) -> Result<Vec<u32>, CodestreamError> {
        if self.flag()? {
            Ok(vec![self.bits(n)?; no_components])
        } else {
            (0..no_components).map(|_| self.bits(n)).collect()
        }
    }
}

#[derive(Debug, Default)]
pub struct JpkHeaderDecoder {
    parts: HeaderParts,
}

impl JpkHeaderDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode<R: io::Read + io::Seek>(
        mut self,
        reader: &mut R,
    ) -> Result<MainHeader, CodestreamError> {
        let offset = reader.stream_position()?;

        let mut magic: [u8; 3] = [0; 3];
        if reader.read_exact(&mut magic).is_err() || &magic != JPK_MAGIC {
            return Err(CodestreamError::BadSignature {
                dialect: HeaderDialect::Jpk,
                offset,
            });
        }
        info!("JPK header start at byte offset {}", offset);

        let mut bits = PackedBits::new(reader);

        let version = bits.bits(8)?;
        if version != JPK_VERSION {
            return Err(CodestreamError::out_of_range(
                MARKER_SYMBOL_SIZ,
                "JPK version",
                version,
            ));
        }

        self.parts.sizing = decode_sizing(&mut bits)?;
        let no_components = self.parts.sizing.no_components() as usize;

        let progression_order = bits.bits(3)?;
        let progression_order = ProgressionOrder::new(progression_order as u8).ok_or_else(|| {
            CodestreamError::out_of_range(MARKER_SYMBOL_COD, "progression order", progression_order)
        })?;
        // The field holds the layer count minus one.
        let no_layers = bits.bits(16)? + 1;
        let no_layers = u16::try_from(no_layers).map_err(|_| {
            CodestreamError::out_of_range(MARKER_SYMBOL_COD, "number of layers", no_layers)
        })?;
        let mct = bits.bits(2)?;
        let multiple_component_transformation = MultipleComponentTransformation::new(mct as u8)
            .ok_or_else(|| {
                CodestreamError::out_of_range(
                    MARKER_SYMBOL_COD,
                    "multiple component transformation",
                    mct,
                )
            })?;
        let restart = bits.flag()?;
        let sop = bits.flag()?;
        let eph = bits.flag()?;

        let same = bits.flag()?;
        let blocks = if same { 1 } else { no_components };
        let mut components = Vec::with_capacity(blocks);
        for _ in 0..blocks {
            components.push(decode_component(&mut bits, restart)?);
        }

        let (default_coding, default_quantization) = components[0].clone();
        let mut coding_style = (sop as u8) << 1 | (eph as u8) << 2;
        if default_coding.has_defined_precinct_size() {
            coding_style |= 1;
        }

        self.parts.coding = CodingParameters {
            coding_style,
            progression_order,
            no_layers,
            multiple_component_transformation,
            parameters: default_coding,
        };
        self.parts.coding.validate()?;
        self.parts.qcd = default_quantization;

        if same {
            self.parts.coc = vec![None; no_components];
            self.parts.qcc = vec![None; no_components];
        } else {
            let (coc, qcc) = components
                .into_iter()
                .map(|(coding, quantization)| (Some(coding), Some(quantization)))
                .unzip();
            self.parts.coc = coc;
            self.parts.qcc = qcc;
        }

        // Padding to the next byte boundary is never read.
        let length = 3 + bits.consumed;
        info!("JPK header end at byte offset {}", offset + length);

        MainHeader::assemble(HeaderDialect::Jpk, offset, length, self.parts)
    }
}

fn decode_sizing<R: io::Read>(
    bits: &mut PackedBits<'_, R>,
) -> Result<SizingParameters, CodestreamError> {
    let no_components = bits.bits(14)? as usize + 1;
    let reference_grid_width = bits.bits(32)?;
    let reference_grid_height = bits.bits(32)?;
    let (image_horizontal_offset, image_vertical_offset) = if bits.flag()? {
        (bits.bits(32)?, bits.bits(32)?)
    } else {
        (0, 0)
    };

    let precision = bits.component_values(no_components, 6)?;
    let signed = bits.component_values(no_components, 1)?;
    let horizontal_separation = bits.component_values(no_components, 8)?;
    let vertical_separation = bits.component_values(no_components, 8)?;

    let components = (0..no_components)
        .map(|c| {
            ComponentSizing::new(
                precision[c] as u8 + 1,
                signed[c] == 1,
                horizontal_separation[c] as u8,
                vertical_separation[c] as u8,
            )
        })
        .collect();

    // A single tile covering the whole reference grid.
    let sizing = SizingParameters {
        decoder_capabilities: 0,
        reference_grid_width,
        reference_grid_height,
        image_horizontal_offset,
        image_vertical_offset,
        reference_tile_width: reference_grid_width,
        reference_tile_height: reference_grid_height,
        tile_horizontal_offset: 0,
        tile_vertical_offset: 0,
        components,
    };
    sizing.validate()?;
    Ok(sizing)
}

fn decode_code_block_exponent<R: io::Read>(
    bits: &mut PackedBits<'_, R>,
    field: &'static str,
) -> Result<u8, CodestreamError> {
    let exponent = bits.bits(4)?;
    if !(2..=10).contains(&exponent) {
        return Err(CodestreamError::out_of_range(MARKER_SYMBOL_COD, field, exponent));
    }
    Ok(exponent as u8 - 2)
}

fn decode_component<R: io::Read>(
    bits: &mut PackedBits<'_, R>,
    restart: bool,
) -> Result<(ComponentCodingParameters, SignalledQuantization), CodestreamError> {
    let no_decomposition_levels = bits.bits(6)? as u8;
    let transformation = if bits.flag()? {
        TransformationFilter::Reversible
    } else {
        TransformationFilter::Irreversible
    };
    let code_block_width = decode_code_block_exponent(bits, "code-block width exponent")?;
    let code_block_height = decode_code_block_exponent(bits, "code-block height exponent")?;

    let no_resolution_levels = no_decomposition_levels as usize + 1;
    let user_precincts = bits.flag()?;
    let precinct_sizes = if user_precincts {
        let mut sizes = Vec::with_capacity(no_resolution_levels);
        for _ in 0..no_resolution_levels {
            let width_exponent = bits.bits(4)? as u8;
            let height_exponent = bits.bits(4)? as u8;
            sizes.push(PrecinctSize::new(width_exponent, height_exponent));
        }
        sizes
    } else {
        vec![PrecinctSize::default(); no_resolution_levels]
    };

    let coding = ComponentCodingParameters {
        user_precincts,
        no_decomposition_levels,
        code_block_width,
        code_block_height,
        code_block_style: if restart { CODE_BLOCK_STYLE_RESTART } else { 0 },
        transformation,
        precinct_sizes,
    };
    coding.validate(MARKER_SYMBOL_COD)?;

    let style = bits.bits(2)? as u8;
    let guard = bits.bits(3)? as u8;
    let no_subbands = 3 * no_decomposition_levels as usize + 1;
    let irreversible = |bits: &mut PackedBits<'_, R>| -> Result<StepSize, CodestreamError> {
        let exponent = bits.bits(5)? as u8;
        let mantissa = bits.bits(11)? as u16;
        Ok(StepSize { exponent, mantissa })
    };

    let (style, values) = match style {
        0 => {
            let values = (0..no_subbands)
                .map(|_| {
                    bits.bits(5).map(|exponent| StepSize {
                        exponent: exponent as u8,
                        mantissa: 0,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            (QuantizationStyle::No { guard }, values)
        }
        1 => (
            QuantizationStyle::ScalarDerived { guard },
            vec![irreversible(bits)?],
        ),
        2 => {
            let values = (0..no_subbands)
                .map(|_| irreversible(bits))
                .collect::<Result<Vec<_>, _>>()?;
            (QuantizationStyle::ScalarExpounded { guard }, values)
        }
        style => {
            return Err(CodestreamError::out_of_range(
                MARKER_SYMBOL_QCD,
                "quantization style",
                style,
            ))
        }
    };

    Ok((coding, SignalledQuantization { style, values }))
}
