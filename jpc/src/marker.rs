//! Marker codes of the JPEG2000 codestream (ISO/IEC 15444-1 Annex A, 15444-2 Annex A).
//!
//! Every marker is two bytes, the first of which is always 0xFF. Markers in
//! the range 0xFF30..=0xFF3F and the delimiting markers SOC, SOD, EPH and EOC
//! stand alone; all other markers introduce a marker segment whose first two
//! bytes are its big-endian length (which counts itself but not the marker).

pub type MarkerSymbol = [u8; 2];

// Delimiting markers and marker segments
pub const MARKER_SYMBOL_SOC: MarkerSymbol = [255, 79]; // Start of codestream
pub const MARKER_SYMBOL_SOT: MarkerSymbol = [255, 144]; // Start of tile-part
pub const MARKER_SYMBOL_SOD: MarkerSymbol = [255, 147]; // Start of data
pub const MARKER_SYMBOL_EOC: MarkerSymbol = [255, 217]; // End of codestream

// Fixed information marker segments
pub const MARKER_SYMBOL_SIZ: MarkerSymbol = [255, 81]; // Image and tile size
pub const MARKER_SYMBOL_CAP: MarkerSymbol = [255, 80]; // Extended capabilities

// Functional marker segments
pub const MARKER_SYMBOL_COD: MarkerSymbol = [255, 82]; // Coding style default
pub const MARKER_SYMBOL_COC: MarkerSymbol = [255, 83]; // Coding style component
pub const MARKER_SYMBOL_RGN: MarkerSymbol = [255, 94]; // Region-of-interest
pub const MARKER_SYMBOL_QCD: MarkerSymbol = [255, 92]; // Quantization default
pub const MARKER_SYMBOL_QCC: MarkerSymbol = [255, 93]; // Quantization component
pub const MARKER_SYMBOL_POC: MarkerSymbol = [255, 95]; // Progression order change

// Pointer marker segments
pub const MARKER_SYMBOL_TLM: MarkerSymbol = [255, 85]; // Tile-part lengths
pub const MARKER_SYMBOL_PLM: MarkerSymbol = [255, 87]; // Packet length, main header
pub const MARKER_SYMBOL_PLT: MarkerSymbol = [255, 88]; // Packet length, tile-part header
pub const MARKER_SYMBOL_PPM: MarkerSymbol = [255, 96]; // Packed packet headers, main header
pub const MARKER_SYMBOL_PPT: MarkerSymbol = [255, 97]; // Packed packet headers, tile-part header

// In bit stream markers and marker segments
pub const MARKER_SYMBOL_SOP: MarkerSymbol = [255, 145]; // Start of packet
pub const MARKER_SYMBOL_EPH: MarkerSymbol = [255, 146]; // End of packet header

// Informational marker segments
pub const MARKER_SYMBOL_CRG: MarkerSymbol = [255, 99]; // Component registration
pub const MARKER_SYMBOL_COM: MarkerSymbol = [255, 100]; // Comment

// Part 2 multiple component transformation marker segments
pub const MARKER_SYMBOL_MCT: MarkerSymbol = [255, 116]; // Multiple component transformation definition
pub const MARKER_SYMBOL_MCC: MarkerSymbol = [255, 117]; // Multiple component collection
pub const MARKER_SYMBOL_MCO: MarkerSymbol = [255, 119]; // Multiple component transformation ordering
pub const MARKER_SYMBOL_CBD: MarkerSymbol = [255, 120]; // Component bit depth definition

/// Size in bytes of an SOP marker segment, marker included.
pub const SOP_SEGMENT_SIZE: usize = 6;

/// Fixed value of Lsop.
pub const SOP_SEGMENT_LENGTH: u16 = 4;

/// Fixed value of Lsot.
pub const SOT_SEGMENT_LENGTH: u16 = 10;

/// Mnemonic of a marker, for diagnostics.
pub fn marker_name(marker: MarkerSymbol) -> &'static str {
    match marker {
        MARKER_SYMBOL_SOC => "SOC",
        MARKER_SYMBOL_SOT => "SOT",
        MARKER_SYMBOL_SOD => "SOD",
        MARKER_SYMBOL_EOC => "EOC",
        MARKER_SYMBOL_SIZ => "SIZ",
        MARKER_SYMBOL_CAP => "CAP",
        MARKER_SYMBOL_COD => "COD",
        MARKER_SYMBOL_COC => "COC",
        MARKER_SYMBOL_RGN => "RGN",
        MARKER_SYMBOL_QCD => "QCD",
        MARKER_SYMBOL_QCC => "QCC",
        MARKER_SYMBOL_POC => "POC",
        MARKER_SYMBOL_TLM => "TLM",
        MARKER_SYMBOL_PLM => "PLM",
        MARKER_SYMBOL_PLT => "PLT",
        MARKER_SYMBOL_PPM => "PPM",
        MARKER_SYMBOL_PPT => "PPT",
        MARKER_SYMBOL_SOP => "SOP",
        MARKER_SYMBOL_EPH => "EPH",
        MARKER_SYMBOL_CRG => "CRG",
        MARKER_SYMBOL_COM => "COM",
        MARKER_SYMBOL_MCT => "MCT",
        MARKER_SYMBOL_MCC => "MCC",
        MARKER_SYMBOL_MCO => "MCO",
        MARKER_SYMBOL_CBD => "CBD",
        _ => "unknown",
    }
}

/// Whether the marker is followed by a length-prefixed marker segment.
pub fn has_segment(marker: MarkerSymbol) -> bool {
    if marker[0] != 0xFF {
        return false;
    }
    match marker {
        MARKER_SYMBOL_SOC | MARKER_SYMBOL_SOD | MARKER_SYMBOL_EPH | MARKER_SYMBOL_EOC => false,
        [_, 0x30..=0x3F] => false,
        _ => true,
    }
}

/// Markers this implementation rejects wherever they appear.
pub fn is_always_unsupported(marker: MarkerSymbol) -> bool {
    matches!(
        marker,
        MARKER_SYMBOL_RGN | MARKER_SYMBOL_POC | MARKER_SYMBOL_TLM | MARKER_SYMBOL_PLM | MARKER_SYMBOL_PPM
    )
}
