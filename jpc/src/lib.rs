//! JPEG2000 codestream engine for JPIP.
//!
//! Decodes main headers (standard JPC markers or the compact JPK dialect),
//! derives the tile/component/resolution/precinct/codeblock hierarchy,
//! decodes packet headers incrementally from partially delivered data-bins
//! and walks precincts in progression order.

use std::error;
use std::fmt;
use std::io;

pub mod client;
pub mod codestream;
pub mod data_bin;
pub mod dialect;
pub mod header;
pub mod jpk;
pub mod marker;
pub mod packet;
pub mod parameters;
pub mod progression;
pub mod tag_tree;
pub mod target;
pub mod window;

pub use client::ClientDecoder;
pub use codestream::{CodestreamIndex, PacketRange};
pub use data_bin::{BitCursor, DataBin, DataBinGuard, DataBinRead, SliceReader, Unavailable};
pub use dialect::{decode_main_header, DecodeOptions, HeaderDialect};
pub use marker::MarkerSymbol;
pub use packet::{
    CodeblockContribution, CodeblockState, CodewordSegment, PacketContext, PacketHeader,
    PacketHeaderDecoder, PrecinctDecodeState,
};
pub use parameters::{
    CodingBlockStyle, CodingParameters, CommentMetadata, ComponentCodingParameters,
    ComponentSizing, LayerRateInfo, MainHeader, MultipleComponentTransformation, PrecinctSize,
    ProgressionOrder, QuantizationParameters, QuantizationStyle, SizingParameters, StepSize,
    TransformationFilter,
};
pub use progression::{PrecinctVisit, Traversal};
pub use tag_tree::TagTreeDecoder;
pub use target::{Rect, Subband, SubbandKind, Tile, Tcrp};
pub use window::{relevant_precincts, Round, ViewWindow};

use dialect::HeaderDialect as Dialect;
use marker::{marker_name, MarkerSymbol as Symbol};

/// Outcome of an operation that reads from a data-bin which may not hold all
/// of its bytes yet.
///
/// `Paused` is not a failure: decoding stopped because the bytes it needs
/// have not been delivered, every piece of state accumulated so far is kept,
/// and the same call may be repeated once more bytes arrive.
#[derive(Debug, PartialEq)]
pub enum Progress<T> {
    Complete(T),
    Paused,
}

impl<T> Progress<T> {
    pub fn is_paused(&self) -> bool {
        matches!(self, Progress::Paused)
    }

    pub fn complete(self) -> Option<T> {
        match self {
            Progress::Complete(value) => Some(value),
            Progress::Paused => None,
        }
    }
}

/// Coarse classification of a [`CodestreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The codestream is malformed or internally inconsistent.
    Corrupt,
    /// The codestream is valid but uses a feature outside the supported profile.
    Unsupported,
    /// The caller broke an API contract, e.g. decoded layers out of order.
    Contract,
    /// The underlying reader failed.
    Io,
}

/// Features outside the supported profile (single tile, single tile-part,
/// RESTART-only codeblocks, wavelet-based multiple component transforms).
#[derive(Debug, Clone, PartialEq)]
pub enum UnsupportedFeature {
    /// A marker that may not appear in the given context.
    Marker {
        marker: Symbol,
        context: &'static str,
    },
    /// More than one tile on the reference grid.
    MultipleTiles { tiles: u32 },
    /// A tile split into several tile-parts, or a non-zero tile index.
    MultipleTileParts {
        tile_index: u16,
        tile_part_index: u8,
        no_tile_parts: u8,
    },
    /// Codeblock style flags other than RESTART.
    CodeblockStyle { flags: Vec<CodingBlockStyle> },
    /// Wavelet kernels other than 9-7 irreversible and 5-3 reversible.
    TransformationKernel { value: u8 },
    /// Dependency or decorrelation array based multiple component transform.
    ArrayTransform { marker: Symbol, array_type: u8 },
    /// Coding or quantization parameters overridden in a tile-part header.
    TileHeaderParameters { marker: Symbol },
    /// More precincts in the tile than the precinct arena holds.
    PrecinctCount { count: u64 },
}

impl fmt::Display for UnsupportedFeature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Marker { marker, context } => {
                write!(f, "{} marker in {}", marker_name(*marker), context)
            }
            Self::MultipleTiles { tiles } => write!(f, "{} tiles (only one is supported)", tiles),
            Self::MultipleTileParts {
                tile_index,
                tile_part_index,
                no_tile_parts,
            } => write!(
                f,
                "tile-part Isot = {}, TPsot = {}, TNsot = {} (only one tile-part is supported)",
                tile_index, tile_part_index, no_tile_parts
            ),
            Self::CodeblockStyle { flags } => {
                write!(f, "codeblock style {:?} (only RESTART is supported)", flags)
            }
            Self::TransformationKernel { value } => {
                write!(f, "wavelet transformation kernel {}", value)
            }
            Self::ArrayTransform { marker, array_type } => write!(
                f,
                "{} array based multiple component transformation (type {})",
                marker_name(*marker),
                array_type
            ),
            Self::TileHeaderParameters { marker } => {
                write!(f, "{} marker segment in a tile-part header", marker_name(*marker))
            }
            Self::PrecinctCount { count } => write!(
                f,
                "{} precincts in the tile (at most {} are supported)",
                count,
                crate::target::MAX_PRECINCTS
            ),
        }
    }
}

#[derive(Debug)]
pub enum CodestreamError {
    MarkerError {
        marker: Symbol,
        error: String,
    },
    MarkerMissing {
        marker: Symbol,
    },
    MarkerUnexpected {
        marker: Symbol,
        offset: u64,
    },
    LengthMismatch {
        marker: Symbol,
        length: u16,
        expected: u16,
    },
    FieldOutOfRange {
        marker: Symbol,
        field: &'static str,
        value: u64,
    },
    TileSizeOverflow {
        image_horizontal_offset: u32,
        image_vertical_offset: u32,
        tile_horizontal_offset: u32,
        tile_vertical_offset: u32,
        reference_tile_width: u32,
        reference_tile_height: u32,
    },
    TileGridOffsetOverflow {
        tile_horizontal_offset: u32,
        tile_vertical_offset: u32,
        image_horizontal_offset: u32,
        image_vertical_offset: u32,
    },
    BadSignature {
        dialect: Dialect,
        offset: u64,
    },
    /// Malformed packet header at the given byte offset.
    PacketError {
        offset: u64,
        error: String,
    },
    Unsupported {
        feature: UnsupportedFeature,
    },
    ContractViolation {
        error: String,
    },
    DialectsExhausted {
        attempts: Vec<(Dialect, CodestreamError)>,
    },
    Io(io::Error),
}

impl CodestreamError {
    pub(crate) fn unsupported(feature: UnsupportedFeature) -> Self {
        CodestreamError::Unsupported { feature }
    }

    pub(crate) fn out_of_range(marker: Symbol, field: &'static str, value: impl Into<u64>) -> Self {
        CodestreamError::FieldOutOfRange {
            marker,
            field,
            value: value.into(),
        }
    }

    pub(crate) fn contract(error: impl Into<String>) -> Self {
        CodestreamError::ContractViolation {
            error: error.into(),
        }
    }

    /// The cause that best explains the failure.
    ///
    /// For a failed dialect fallback this is the error of the first dialect
    /// whose signature matched the input; otherwise it is `self`.
    pub fn root(&self) -> &CodestreamError {
        match self {
            Self::DialectsExhausted { attempts } => attempts
                .iter()
                .map(|(_, error)| error)
                .find(|error| !matches!(error, Self::BadSignature { .. }))
                .or_else(|| attempts.first().map(|(_, error)| error))
                .map(|error| error.root())
                .unwrap_or(self),
            _ => self,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::ContractViolation { .. } => ErrorKind::Contract,
            Self::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Corrupt,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }
}

impl error::Error for CodestreamError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for CodestreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MarkerError { marker, error } => {
                write!(
                    f,
                    "marker 0x{:0>2X?}{:0>2X?} ({}) error {:?}",
                    marker[0],
                    marker[1],
                    marker_name(*marker),
                    error
                )
            }
            Self::MarkerMissing { marker } => {
                write!(
                    f,
                    "missing marker 0x{:0>2X?}{:0>2X?} ({})",
                    marker[0],
                    marker[1],
                    marker_name(*marker)
                )
            }
            Self::MarkerUnexpected { marker, offset } => {
                write!(
                    f,
                    "unexpected marker 0x{:0>2X?}{:0>2X?} at byte offset {}",
                    marker[0], marker[1], offset
                )
            }
            Self::LengthMismatch {
                marker,
                length,
                expected,
            } => write!(
                f,
                "{} marker segment length {} does not match expected length {}",
                marker_name(*marker),
                length,
                expected
            ),
            Self::FieldOutOfRange {
                marker,
                field,
                value,
            } => write!(
                f,
                "{} field {} out of range: {}",
                marker_name(*marker),
                field,
                value
            ),
            Self::TileGridOffsetOverflow {
                image_horizontal_offset,
                image_vertical_offset,
                tile_horizontal_offset,
                tile_vertical_offset,
            } => {
                write!(
                    f,
                    "tile grid offset overflow: XOSiz = {:?}, YOsiz = {:?}, XTOsiz = {:?}, YTOsiz = {:?}",
                    image_horizontal_offset,
                    image_vertical_offset,
                    tile_horizontal_offset,
                    tile_vertical_offset,
                )
            }
            // XTsiz + XTOsiz > XOsiz
            // YTsiz + YTOsiz > YOsiz
            Self::TileSizeOverflow {
                image_horizontal_offset,
                image_vertical_offset,
                tile_horizontal_offset,
                tile_vertical_offset,
                reference_tile_width,
                reference_tile_height,
            } => {
                write!(
                    f,
                    "tile size overflow: XOSiz = {:?}, YOsiz = {:?}, XTOsiz = {:?}, YTOsiz = {:?}, XTsize = {:?}, YTsize = {:?}",
                    image_horizontal_offset,
                    image_vertical_offset,
                    tile_horizontal_offset,
                    tile_vertical_offset,
                    reference_tile_width,
                    reference_tile_height,
                )
            }
            Self::BadSignature { dialect, offset } => {
                write!(f, "no {} header signature at byte offset {}", dialect, offset)
            }
            Self::PacketError { offset, error } => {
                write!(f, "packet header error at byte offset {}: {}", offset, error)
            }
            Self::Unsupported { feature } => write!(f, "unsupported feature: {}", feature),
            Self::ContractViolation { error } => write!(f, "contract violation: {}", error),
            Self::DialectsExhausted { attempts } => {
                write!(f, "no header dialect could decode the codestream")?;
                for (dialect, error) in attempts {
                    write!(f, "; {}: {}", dialect, error)?;
                }
                Ok(())
            }
            Self::Io(error) => write!(f, "i/o error: {}", error),
        }
    }
}

impl From<io::Error> for CodestreamError {
    fn from(error: io::Error) -> Self {
        CodestreamError::Io(error)
    }
}

/// Decodes a whole single-tile codestream and indexes its packets per
/// precinct.
pub fn decode_jpc<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<CodestreamIndex, CodestreamError> {
    let mut index = CodestreamIndex::new(DecodeOptions::default());
    index.index(reader)?;
    Ok(index)
}
