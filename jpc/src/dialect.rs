//! Attempt-ordered main header dialects.

use std::fmt;
use std::io;

use log::{debug, info};

use crate::header::JpcHeaderDecoder;
use crate::jpk::JpkHeaderDecoder;
use crate::parameters::MainHeader;
use crate::CodestreamError;

/// Encodings of the main header this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderDialect {
    /// ISO/IEC 15444-1 marker segments, starting with SOC.
    Jpc,
    /// Compact packed-bit header, starting with the bytes "JPK".
    Jpk,
}

impl HeaderDialect {
    pub fn decode<R: io::Read + io::Seek>(
        self,
        reader: &mut R,
    ) -> Result<MainHeader, CodestreamError> {
        match self {
            HeaderDialect::Jpc => JpcHeaderDecoder::new().decode(reader),
            HeaderDialect::Jpk => JpkHeaderDecoder::new().decode(reader),
        }
    }
}

impl fmt::Display for HeaderDialect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeaderDialect::Jpc => f.write_str("JPC"),
            HeaderDialect::Jpk => f.write_str("JPK"),
        }
    }
}

/// Options of header decoding and codestream indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Dialects tried in order until one decodes the header.
    pub dialects: Vec<HeaderDialect>,

    /// Check Nsop of SOP marker segments against the running packet count.
    pub check_sop_sequence: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            dialects: vec![HeaderDialect::Jpc, HeaderDialect::Jpk],
            check_sop_sequence: true,
        }
    }
}

/// Decodes a main header with the first dialect of `options` that accepts
/// it. The reader is rewound to its starting position before every attempt.
///
/// When every dialect fails, all failures are returned in attempt order;
/// [`CodestreamError::root`] picks the one worth reporting.
pub fn decode_main_header<R: io::Read + io::Seek>(
    reader: &mut R,
    options: &DecodeOptions,
) -> Result<MainHeader, CodestreamError> {
    if options.dialects.is_empty() {
        return Err(CodestreamError::contract("no header dialect to try"));
    }

    let start = reader.stream_position()?;
    let mut attempts = Vec::with_capacity(options.dialects.len());

    for dialect in &options.dialects {
        reader.seek(io::SeekFrom::Start(start))?;
        match dialect.decode(reader) {
            Ok(header) => {
                info!("main header decoded as {} ({} bytes)", dialect, header.length());
                return Ok(header);
            }
            Err(error) => {
                debug!("{} header dialect failed: {}", dialect, error);
                attempts.push((*dialect, error));
            }
        }
    }

    Err(CodestreamError::DialectsExhausted { attempts })
}
