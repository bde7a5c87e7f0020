//! Standards-compliant main header decoder (ISO/IEC 15444-1 A.3).

use std::io;

use log::{debug, info, warn};

use crate::dialect::HeaderDialect;
use crate::marker::*;
use crate::parameters::{
    ArrayElementType, CodingParameters, CommentMetadata, ComponentBitDepths,
    ComponentCodingParameters, ComponentCollectionStage, ComponentSizing, HeaderParts,
    LayerRateInfo, MainHeader, MultipleComponentTransformation, OffsetArray, PrecinctSize,
    ProgressionOrder, QuantizationStyle, SignalledQuantization, SizingParameters, StepSize,
    TransformationFilter, WaveletCollection,
};
use crate::{CodestreamError, UnsupportedFeature};

const KAKADU_LAYER_INFO: &str = "Kdu-Layer-Info:";
const CADI_RATE_DISTORTION: &[u8] = b"CADI-RD";
const CADI_PREDICTIVE_MODEL: &[u8] = b"CADI-PM";

const COMMENT_REGISTRATION_BINARY: u16 = 0;
const COMMENT_REGISTRATION_LATIN: u16 = 1;

/// Body of one marker segment, read in full so every field can be checked
/// against the declared length.
pub(crate) struct SegmentBody {
    marker: MarkerSymbol,
    length: u16,
    data: Vec<u8>,
    position: usize,
}

impl SegmentBody {
    /// Reads the length field and the rest of the segment.
    pub(crate) fn read<R: io::Read>(
        reader: &mut R,
        marker: MarkerSymbol,
    ) -> Result<SegmentBody, CodestreamError> {
        let length = decode_length(reader)?;
        if length < 2 {
            return Err(CodestreamError::MarkerError {
                marker,
                error: format!("segment length {} is shorter than its length field", length),
            });
        }

        let mut data = vec![0; length as usize - 2];
        reader.read_exact(&mut data)?;

        Ok(SegmentBody {
            marker,
            length,
            data,
            position: 0,
        })
    }

    pub(crate) fn length(&self) -> u16 {
        self.length
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn truncated(&self, field: &str) -> CodestreamError {
        CodestreamError::MarkerError {
            marker: self.marker,
            error: format!("segment ends inside field {}", field),
        }
    }

    pub(crate) fn bytes(&mut self, n: usize, field: &str) -> Result<&[u8], CodestreamError> {
        if self.remaining() < n {
            return Err(self.truncated(field));
        }
        let start = self.position;
        self.position += n;
        Ok(&self.data[start..self.position])
    }

    pub(crate) fn u8(&mut self, field: &str) -> Result<u8, CodestreamError> {
        Ok(self.bytes(1, field)?[0])
    }

    pub(crate) fn u16(&mut self, field: &str) -> Result<u16, CodestreamError> {
        let bytes = self.bytes(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn u24(&mut self, field: &str) -> Result<u32, CodestreamError> {
        let bytes = self.bytes(3, field)?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    pub(crate) fn u32(&mut self, field: &str) -> Result<u32, CodestreamError> {
        let bytes = self.bytes(4, field)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn rest(&mut self) -> &[u8] {
        let start = self.position;
        self.position = self.data.len();
        &self.data[start..]
    }

    /// Fails unless every byte of the segment was consumed.
    fn finish(&self, expected: u16) -> Result<(), CodestreamError> {
        if self.remaining() != 0 {
            return Err(CodestreamError::LengthMismatch {
                marker: self.marker,
                length: self.length,
                expected,
            });
        }
        Ok(())
    }
}

// Length of marker segment in bytes (not including the marker).
pub(crate) fn decode_length<R: io::Read>(reader: &mut R) -> Result<u16, CodestreamError> {
    let mut length: [u8; 2] = [0; 2];
    reader.read_exact(&mut length)?;
    Ok(u16::from_be_bytes(length))
}

/// Reads the next marker, skipping bytes that cannot start one.
///
/// Returns `None` when the input ends on a marker boundary.
pub(crate) fn next_marker<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<Option<MarkerSymbol>, CodestreamError> {
    let mut byte: [u8; 1] = [0; 1];
    let mut skipped = 0u64;

    loop {
        if let Err(error) = reader.read_exact(&mut byte) {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(error.into());
        }
        if byte[0] != 0xFF {
            skipped += 1;
            continue;
        }

        // Any number of 0xFF fill bytes may precede the marker code.
        loop {
            reader.read_exact(&mut byte)?;
            if byte[0] != 0xFF {
                break;
            }
        }
        if skipped > 0 {
            warn!(
                "skipped {} bytes before marker 0xFF{:0>2X} at byte offset {}",
                skipped,
                byte[0],
                reader.stream_position()? - 2
            );
        }
        return Ok(Some([0xFF, byte[0]]));
    }
}

/// Skips a marker segment by its length.
pub(crate) fn skip_segment<R: io::Read + io::Seek>(
    reader: &mut R,
    marker: MarkerSymbol,
) -> Result<(), CodestreamError> {
    let length = decode_length(reader)?;
    if length < 2 {
        return Err(CodestreamError::MarkerError {
            marker,
            error: format!("segment length {} is shorter than its length field", length),
        });
    }
    reader.seek(io::SeekFrom::Current(length as i64 - 2))?;
    Ok(())
}

/// Decoder for the marker segments of a main header.
#[derive(Debug, Default)]
pub struct JpcHeaderDecoder {
    parts: HeaderParts,
    has_cod: bool,
    has_qcd: bool,
}

impl JpcHeaderDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes SOC up to, but not including, the first SOT marker. The input
    /// may also end right after the last main header segment, as a JPIP main
    /// header data-bin does.
    pub fn decode<R: io::Read + io::Seek>(
        mut self,
        reader: &mut R,
    ) -> Result<MainHeader, CodestreamError> {
        let offset = reader.stream_position()?;
        let mut marker_type: MarkerSymbol = [0; 2];

        // SOC (Required as the first marker)
        if reader.read_exact(&mut marker_type).is_err() || marker_type != MARKER_SYMBOL_SOC {
            return Err(CodestreamError::BadSignature {
                dialect: HeaderDialect::Jpc,
                offset,
            });
        }
        info!("SOC start at byte offset {}", offset);

        // SIZ (Required as the second marker segment)
        reader.read_exact(&mut marker_type)?;
        if marker_type != MARKER_SYMBOL_SIZ {
            return Err(CodestreamError::MarkerUnexpected {
                marker: marker_type,
                offset: reader.stream_position()? - 2,
            });
        }
        self.parts.sizing = self.decode_siz(reader)?;

        let no_components = self.parts.sizing.no_components();
        self.parts.coc = vec![None; no_components as usize];
        self.parts.qcc = vec![None; no_components as usize];

        loop {
            let marker = match next_marker(reader)? {
                Some(marker) => marker,
                None => {
                    debug!("main header ends without SOT");
                    break;
                }
            };

            match marker {
                // Start of tile bit-stream
                MARKER_SYMBOL_SOT => {
                    reader.seek(io::SeekFrom::Current(-2))?;
                    break;
                }

                // COD (Required)
                MARKER_SYMBOL_COD => {
                    if self.has_cod {
                        return Err(CodestreamError::MarkerError {
                            marker,
                            error: "more than one COD marker segment".to_string(),
                        });
                    }
                    self.parts.coding = self.decode_cod(reader)?;
                    self.has_cod = true;
                }

                // COC (Optional, no more than one COC per component)
                MARKER_SYMBOL_COC => {
                    let (component, parameters) = self.decode_coc(reader, no_components)?;
                    let entry = &mut self.parts.coc[component as usize];
                    if entry.is_some() {
                        return Err(CodestreamError::MarkerError {
                            marker,
                            error: format!("more than one COC for component {}", component),
                        });
                    }
                    *entry = Some(parameters);
                }

                // QCD (Required)
                MARKER_SYMBOL_QCD => {
                    if self.has_qcd {
                        return Err(CodestreamError::MarkerError {
                            marker,
                            error: "more than one QCD marker segment".to_string(),
                        });
                    }
                    self.parts.qcd = self.decode_qcd(reader)?;
                    self.has_qcd = true;
                }

                // QCC (Optional, no more than one QCC per component)
                MARKER_SYMBOL_QCC => {
                    let (component, quantization) = self.decode_qcc(reader, no_components)?;
                    let entry = &mut self.parts.qcc[component as usize];
                    if entry.is_some() {
                        return Err(CodestreamError::MarkerError {
                            marker,
                            error: format!("more than one QCC for component {}", component),
                        });
                    }
                    *entry = Some(quantization);
                }

                // COM (Optional)
                MARKER_SYMBOL_COM => {
                    if let Some(comment) = self.decode_com(reader)? {
                        self.parts.comments.push(comment);
                    }
                }

                MARKER_SYMBOL_CBD => {
                    let bit_depths = self.decode_cbd(reader)?;
                    self.parts.multiple_component_transform.bit_depths = Some(bit_depths);
                }
                MARKER_SYMBOL_MCT => self.decode_mct(reader)?,
                MARKER_SYMBOL_MCC => {
                    let stage = self.decode_mcc(reader)?;
                    self.parts.multiple_component_transform.stages.push(stage);
                }
                MARKER_SYMBOL_MCO => {
                    let ordering = self.decode_mco(reader)?;
                    self.parts.multiple_component_transform.ordering = ordering;
                }

                marker if is_always_unsupported(marker) => {
                    return Err(CodestreamError::unsupported(UnsupportedFeature::Marker {
                        marker,
                        context: "main header",
                    }));
                }
                MARKER_SYMBOL_PLT | MARKER_SYMBOL_PPT => {
                    return Err(CodestreamError::unsupported(UnsupportedFeature::Marker {
                        marker,
                        context: "main header",
                    }));
                }

                MARKER_SYMBOL_SOC
                | MARKER_SYMBOL_SIZ
                | MARKER_SYMBOL_SOD
                | MARKER_SYMBOL_EOC
                | MARKER_SYMBOL_SOP
                | MARKER_SYMBOL_EPH => {
                    return Err(CodestreamError::MarkerUnexpected {
                        marker,
                        offset: reader.stream_position()? - 2,
                    });
                }

                // CRG, CAP and anything unknown carry nothing needed here.
                marker if has_segment(marker) => {
                    debug!(
                        "skipping {} marker segment at byte offset {}",
                        marker_name(marker),
                        reader.stream_position()? - 2
                    );
                    skip_segment(reader, marker)?;
                }
                marker => {
                    warn!(
                        "ignoring marker 0x{:0>2X}{:0>2X} at byte offset {}",
                        marker[0],
                        marker[1],
                        reader.stream_position()? - 2
                    );
                }
            }
        }

        if !self.has_cod {
            return Err(CodestreamError::MarkerMissing {
                marker: MARKER_SYMBOL_COD,
            });
        }
        if !self.has_qcd {
            return Err(CodestreamError::MarkerMissing {
                marker: MARKER_SYMBOL_QCD,
            });
        }

        let length = reader.stream_position()? - offset;
        MainHeader::assemble(HeaderDialect::Jpc, offset, length, self.parts)
    }

    // A.5.1 - Image and tile size (SIZ)
    fn decode_siz<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<SizingParameters, CodestreamError> {
        info!("SIZ start at byte offset {}", reader.stream_position()? - 2);

        // Lsiz, then the fixed part up to and including Csiz.
        let length = decode_length(reader)?;
        let mut fixed: [u8; 36] = [0; 36];
        reader.read_exact(&mut fixed)?;

        let field = |i: usize| u32::from_be_bytes([fixed[i], fixed[i + 1], fixed[i + 2], fixed[i + 3]]);
        let no_components = u16::from_be_bytes([fixed[34], fixed[35]]);

        if no_components == 0 || no_components > crate::parameters::MAX_COMPONENTS {
            return Err(CodestreamError::out_of_range(
                MARKER_SYMBOL_SIZ,
                "Csiz",
                no_components,
            ));
        }

        let expected = 38 + 3 * no_components as u32;
        if length as u32 != expected {
            return Err(CodestreamError::LengthMismatch {
                marker: MARKER_SYMBOL_SIZ,
                length,
                expected: expected as u16,
            });
        }

        let mut components = vec![0u8; 3 * no_components as usize];
        reader.read_exact(&mut components)?;

        let sizing = SizingParameters {
            decoder_capabilities: u16::from_be_bytes([fixed[0], fixed[1]]),
            reference_grid_width: field(2),
            reference_grid_height: field(6),
            image_horizontal_offset: field(10),
            image_vertical_offset: field(14),
            reference_tile_width: field(18),
            reference_tile_height: field(22),
            tile_horizontal_offset: field(26),
            tile_vertical_offset: field(30),
            components: components
                .chunks(3)
                .map(|c| ComponentSizing::from_ssiz(c[0], c[1], c[2]))
                .collect(),
        };
        sizing.validate()?;

        info!("SIZ end at byte offset {}", reader.stream_position()?);
        Ok(sizing)
    }

    // A.6.1 - Coding style default (COD)
    fn decode_cod<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<CodingParameters, CodestreamError> {
        info!("COD start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_COD)?;

        // Scod
        let coding_style = segment.u8("Scod")?;
        if coding_style & !0b111 != 0 {
            return Err(CodestreamError::out_of_range(
                MARKER_SYMBOL_COD,
                "Scod",
                coding_style,
            ));
        }

        // SGcod
        let progression_order = segment.u8("progression order")?;
        let progression_order = ProgressionOrder::new(progression_order).ok_or_else(|| {
            CodestreamError::out_of_range(MARKER_SYMBOL_COD, "progression order", progression_order)
        })?;
        let no_layers = segment.u16("number of layers")?;
        let mct = segment.u8("multiple component transformation")?;
        let multiple_component_transformation = MultipleComponentTransformation::new(mct)
            .ok_or_else(|| {
                CodestreamError::out_of_range(
                    MARKER_SYMBOL_COD,
                    "multiple component transformation",
                    mct,
                )
            })?;

        // SPcod
        let parameters = decode_coding_style_parameters(&mut segment, coding_style & 1 == 1)?;
        segment.finish(coding_style_length(10, &parameters))?;

        let coding = CodingParameters {
            coding_style,
            progression_order,
            no_layers,
            multiple_component_transformation,
            parameters,
        };
        coding.validate()?;

        info!("COD end at byte offset {}", reader.stream_position()?);
        Ok(coding)
    }

    // A.6.2 - Coding style component (COC)
    fn decode_coc<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
        no_components: u16,
    ) -> Result<(u16, ComponentCodingParameters), CodestreamError> {
        info!("COC start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_COC)?;

        let component = decode_component_index(&mut segment, no_components, "Ccoc")?;
        let coding_style = segment.u8("Scoc")?;
        if coding_style & !1 != 0 {
            return Err(CodestreamError::out_of_range(
                MARKER_SYMBOL_COC,
                "Scoc",
                coding_style,
            ));
        }

        let parameters = decode_coding_style_parameters(&mut segment, coding_style & 1 == 1)?;
        let index_size = if no_components < 257 { 1 } else { 2 };
        segment.finish(coding_style_length(6 + index_size, &parameters))?;
        parameters.validate(MARKER_SYMBOL_COC)?;

        info!("COC end at byte offset {}", reader.stream_position()?);
        Ok((component, parameters))
    }

    // A.6.4 - Quantization default (QCD)
    fn decode_qcd<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<SignalledQuantization, CodestreamError> {
        info!("QCD start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_QCD)?;

        let quantization = decode_quantization_values(&mut segment, "Sqcd")?;

        info!("QCD end at byte offset {}", reader.stream_position()?);
        Ok(quantization)
    }

    // A.6.5 - Quantization component (QCC)
    fn decode_qcc<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
        no_components: u16,
    ) -> Result<(u16, SignalledQuantization), CodestreamError> {
        info!("QCC start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_QCC)?;

        // Cqcc
        let component = decode_component_index(&mut segment, no_components, "Cqcc")?;
        // Sqcc, SPqcc
        let quantization = decode_quantization_values(&mut segment, "Sqcc")?;

        info!("QCC end at byte offset {}", reader.stream_position()?);
        Ok((component, quantization))
    }

    // A.9.2 - Comment (COM)
    fn decode_com<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<CommentMetadata>, CodestreamError> {
        info!("COM start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_COM)?;

        let registration = segment.u16("Rcom")?;
        let comment = match registration {
            COMMENT_REGISTRATION_LATIN => decode_latin_comment(segment.rest())?,
            COMMENT_REGISTRATION_BINARY => decode_binary_comment(segment.rest())?,
            registration => {
                warn!("skipping comment with registration value {}", registration);
                None
            }
        };

        info!("COM end at byte offset {}", reader.stream_position()?);
        Ok(comment)
    }

    // ISO/IEC 15444-2 A.2.6 - Component bit depth definition (CBD)
    fn decode_cbd<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<ComponentBitDepths, CodestreamError> {
        info!("CBD start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_CBD)?;

        let ncbd = segment.u16("Ncbd")?;
        let same = ncbd & 0x8000 != 0;
        let count = (ncbd & 0x7FFF) as usize;

        let values = if same {
            vec![segment.u8("BDcbd")?; count]
        } else {
            segment.bytes(count, "BDcbd")?.to_vec()
        };
        let expected = segment.length() - segment.remaining() as u16;
        segment.finish(expected)?;

        info!("CBD end at byte offset {}", reader.stream_position()?);
        Ok(ComponentBitDepths {
            depths: values
                .iter()
                .map(|value| ((value & 0x7F) + 1, value & 0x80 != 0))
                .collect(),
        })
    }

    // ISO/IEC 15444-2 A.3.7 - Multiple component transformation definition (MCT)
    fn decode_mct<R: io::Read + io::Seek>(&mut self, reader: &mut R) -> Result<(), CodestreamError> {
        info!("MCT start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_MCT)?;

        let zmct = segment.u16("Zmct")?;
        let imct = segment.u16("Imct")?;
        if zmct == 0 {
            // Ymct, the number of further MCT segments of this array.
            segment.u16("Ymct")?;
        }

        let index = (imct & 0xFF) as u8;
        let array_type = ((imct >> 8) & 0b11) as u8;
        let element_type = ArrayElementType::new((imct >> 10) as u8);

        match array_type {
            0 | 1 => {
                return Err(CodestreamError::unsupported(
                    UnsupportedFeature::ArrayTransform {
                        marker: MARKER_SYMBOL_MCT,
                        array_type,
                    },
                ));
            }
            2 => {}
            _ => {
                return Err(CodestreamError::out_of_range(
                    MARKER_SYMBOL_MCT,
                    "Imct array type",
                    array_type,
                ))
            }
        }

        let data = segment.rest();
        if data.len() % element_type.size() != 0 {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_MCT,
                error: format!(
                    "{} bytes of SPmct are not a whole number of {:?} elements",
                    data.len(),
                    element_type
                ),
            });
        }
        let values: Vec<f64> = data
            .chunks(element_type.size())
            .map(|bytes| decode_element(element_type, bytes))
            .collect();

        let offsets = &mut self.parts.multiple_component_transform.offsets;
        match offsets.iter_mut().find(|array| array.index == index) {
            Some(array) if zmct > 0 => array.values.extend(values),
            _ => offsets.push(OffsetArray {
                index,
                element_type,
                values,
            }),
        }

        info!("MCT end at byte offset {}", reader.stream_position()?);
        Ok(())
    }

    // ISO/IEC 15444-2 A.3.8 - Multiple component collection (MCC)
    fn decode_mcc<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<ComponentCollectionStage, CodestreamError> {
        info!("MCC start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_MCC)?;

        segment.u16("Zmcc")?;
        let index = segment.u8("Imcc")?;
        segment.u16("Ymcc")?;
        let no_collections = segment.u16("Qmcc")?;

        let mut collections = Vec::with_capacity(no_collections as usize);
        for _ in 0..no_collections {
            let collection_type = segment.u8("Xmcc")? & 0b11;
            match collection_type {
                0 | 1 => {
                    return Err(CodestreamError::unsupported(
                        UnsupportedFeature::ArrayTransform {
                            marker: MARKER_SYMBOL_MCC,
                            array_type: collection_type,
                        },
                    ))
                }
                3 => {}
                _ => {
                    return Err(CodestreamError::out_of_range(
                        MARKER_SYMBOL_MCC,
                        "Xmcc",
                        collection_type,
                    ))
                }
            }

            let input_components = decode_component_list(&mut segment, "Nmcc", "Cmcc")?;
            let output_components = decode_component_list(&mut segment, "Mmcc", "Wmcc")?;
            let tmcc = segment.u24("Tmcc")?;
            let offset = segment.u32("Omcc")?;

            collections.push(WaveletCollection {
                input_components,
                output_components,
                kernel_index: (tmcc & 0xFF) as u8,
                offset_index: ((tmcc >> 8) & 0xFF) as u8,
                decomposition_levels: ((tmcc >> 16) & 0x3F) as u8,
                offset,
            });
        }
        let expected = segment.length() - segment.remaining() as u16;
        segment.finish(expected)?;

        info!("MCC end at byte offset {}", reader.stream_position()?);
        Ok(ComponentCollectionStage { index, collections })
    }

    // ISO/IEC 15444-2 A.3.9 - Multiple component transformation ordering (MCO)
    fn decode_mco<R: io::Read + io::Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<Vec<u8>, CodestreamError> {
        info!("MCO start at byte offset {}", reader.stream_position()? - 2);
        let mut segment = SegmentBody::read(reader, MARKER_SYMBOL_MCO)?;

        let no_stages = segment.u8("Nmco")?;
        let ordering = segment.bytes(no_stages as usize, "Imco")?.to_vec();
        segment.finish(3 + no_stages as u16)?;

        info!("MCO end at byte offset {}", reader.stream_position()?);
        Ok(ordering)
    }
}

// Expected segment length for COD/COC given the bytes before SPcod/SPcoc.
fn coding_style_length(prefix: u16, parameters: &ComponentCodingParameters) -> u16 {
    let precincts = if parameters.has_defined_precinct_size() {
        parameters.no_resolution_levels() as u16
    } else {
        0
    };
    prefix + 2 + precincts
}

fn decode_component_index(
    segment: &mut SegmentBody,
    no_components: u16,
    field: &'static str,
) -> Result<u16, CodestreamError> {
    // Either 8 or 16 bits depending on Csiz value.
    let component = if no_components < 257 {
        segment.u8(field)? as u16
    } else {
        segment.u16(field)?
    };
    if component >= no_components {
        return Err(CodestreamError::out_of_range(segment.marker, field, component));
    }
    Ok(component)
}

fn decode_coding_style_parameters(
    segment: &mut SegmentBody,
    user_precincts: bool,
) -> Result<ComponentCodingParameters, CodestreamError> {
    let no_decomposition_levels = segment.u8("decomposition levels")?;
    let code_block_width = segment.u8("code-block width")?;
    let code_block_height = segment.u8("code-block height")?;
    let code_block_style = segment.u8("code-block style")?;
    let transformation = segment.u8("transformation")?;
    let transformation = TransformationFilter::new(transformation).ok_or_else(|| {
        CodestreamError::unsupported(UnsupportedFeature::TransformationKernel {
            value: transformation,
        })
    })?;

    if no_decomposition_levels > crate::parameters::MAX_DECOMPOSITION_LEVELS {
        return Err(CodestreamError::out_of_range(
            segment.marker,
            "decomposition levels",
            no_decomposition_levels,
        ));
    }

    let no_resolution_levels = no_decomposition_levels as usize + 1;
    let precinct_sizes = if user_precincts {
        // The first parameter (8 bits) corresponds to the N_L LL sub-band.
        // Each successive parameter corresponds to each successive resolution level in order.
        segment
            .bytes(no_resolution_levels, "precinct size")?
            .iter()
            .map(|value| PrecinctSize::from_byte(*value))
            .collect()
    } else {
        vec![PrecinctSize::default(); no_resolution_levels]
    };

    Ok(ComponentCodingParameters {
        user_precincts,
        no_decomposition_levels,
        code_block_width,
        code_block_height,
        code_block_style,
        transformation,
        precinct_sizes,
    })
}

fn decode_quantization_values(
    segment: &mut SegmentBody,
    field: &'static str,
) -> Result<SignalledQuantization, CodestreamError> {
    let byte = segment.u8(field)?;
    let style = QuantizationStyle::new(byte);

    let values = match style {
        // Reversible transformation values, one byte per subband.
        QuantizationStyle::No { .. } => segment
            .rest()
            .iter()
            .map(|value| StepSize::from_reversible(*value))
            .collect(),
        QuantizationStyle::ScalarDerived { .. } => {
            let value = segment.u16("SPqcd")?;
            let expected = segment.length() - segment.remaining() as u16;
            segment.finish(expected)?;
            vec![StepSize::from_irreversible(value)]
        }
        // Irreversible transformation values, two bytes per subband.
        QuantizationStyle::ScalarExpounded { .. } => {
            if segment.remaining() % 2 != 0 {
                return Err(CodestreamError::MarkerError {
                    marker: segment.marker,
                    error: format!(
                        "{} bytes of step sizes for scalar expounded quantization",
                        segment.remaining()
                    ),
                });
            }
            segment
                .rest()
                .chunks(2)
                .map(|value| StepSize::from_irreversible(u16::from_be_bytes([value[0], value[1]])))
                .collect()
        }
        QuantizationStyle::Reserved { .. } => {
            return Err(CodestreamError::out_of_range(
                segment.marker,
                field,
                byte & 0b0001_1111,
            ))
        }
    };

    if values.is_empty() {
        return Err(CodestreamError::MarkerError {
            marker: segment.marker,
            error: "no step sizes".to_string(),
        });
    }

    Ok(SignalledQuantization { style, values })
}

fn decode_component_list(
    segment: &mut SegmentBody,
    count_field: &'static str,
    list_field: &'static str,
) -> Result<Vec<u16>, CodestreamError> {
    let count = segment.u16(count_field)?;
    let wide = count & 0x8000 != 0;
    let count = count & 0x7FFF;

    (0..count)
        .map(|_| {
            if wide {
                segment.u16(list_field)
            } else {
                segment.u8(list_field).map(u16::from)
            }
        })
        .collect()
}

fn decode_element(element_type: ArrayElementType, bytes: &[u8]) -> f64 {
    match element_type {
        ArrayElementType::Int16 => i16::from_be_bytes([bytes[0], bytes[1]]) as f64,
        ArrayElementType::Int32 => {
            i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
        }
        ArrayElementType::Float32 => {
            f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
        }
        ArrayElementType::Float64 => {
            let mut value = [0u8; 8];
            value.copy_from_slice(&bytes[..8]);
            f64::from_be_bytes(value)
        }
    }
}

fn comment_error(error: String) -> CodestreamError {
    CodestreamError::MarkerError {
        marker: MARKER_SYMBOL_COM,
        error,
    }
}

// ISO/IEC 8859-15 maps every byte below 0x100 to a character; the few
// differences from Latin-1 do not matter for the recognised dialects.
fn decode_latin_comment(data: &[u8]) -> Result<Option<CommentMetadata>, CodestreamError> {
    let text: String = data.iter().map(|byte| *byte as char).collect();

    if !text.starts_with(KAKADU_LAYER_INFO) {
        debug!("unrecognised text comment {:?}", text);
        return Ok(Some(CommentMetadata::Text(text)));
    }

    // The first line names the columns, every other line is one layer.
    let mut layers = Vec::new();
    for line in text.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut columns = line.split(',').map(str::trim);
        let (Some(slope), Some(bytes), None) = (columns.next(), columns.next(), columns.next())
        else {
            return Err(comment_error(format!("malformed layer info line {:?}", line)));
        };
        let slope = slope
            .parse::<f64>()
            .map_err(|error| comment_error(format!("layer slope {:?}: {}", slope, error)))?;
        let bytes = bytes
            .parse::<f64>()
            .map_err(|error| comment_error(format!("layer bytes {:?}: {}", bytes, error)))?;
        layers.push(LayerRateInfo { slope, bytes });
    }

    Ok(Some(CommentMetadata::LayerInfo(layers)))
}

fn decode_binary_comment(data: &[u8]) -> Result<Option<CommentMetadata>, CodestreamError> {
    let f32_values = |data: &[u8], count: usize| -> Result<Vec<f32>, CodestreamError> {
        if data.len() != count * 4 {
            return Err(comment_error(format!(
                "{} bytes for {} values",
                data.len(),
                count
            )));
        }
        Ok(data
            .chunks(4)
            .map(|value| f32::from_be_bytes([value[0], value[1], value[2], value[3]]))
            .collect())
    };

    if let Some(payload) = data.strip_prefix(CADI_RATE_DISTORTION) {
        if payload.len() < 2 {
            return Err(comment_error("rate-distortion comment without layer count".to_string()));
        }
        let no_layers = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        let slopes = f32_values(&payload[2..], no_layers)?;
        return Ok(Some(CommentMetadata::RateDistortionSlopes(slopes)));
    }

    if let Some(payload) = data.strip_prefix(CADI_PREDICTIVE_MODEL) {
        if payload.len() < 3 {
            return Err(comment_error("predictive model comment without dimensions".to_string()));
        }
        let no_components = u16::from_be_bytes([payload[0], payload[1]]);
        let no_resolution_levels = payload[2];
        let values = f32_values(
            &payload[3..],
            no_components as usize * no_resolution_levels as usize,
        )?;
        return Ok(Some(CommentMetadata::PredictiveModel {
            no_components,
            no_resolution_levels,
            values,
        }));
    }

    debug!("skipping binary comment of {} bytes", data.len());
    Ok(None)
}
