//! Decoded coding parameters shared by both header dialects.
//!
//! Everything here is plain data produced by the JPC decoder in
//! [`crate::header`] or the JPK decoder in [`crate::jpk`]; the validation
//! routines are shared so both dialects enforce the same ranges.

use std::fmt;

use crate::dialect::HeaderDialect;
use crate::marker::{
    MarkerSymbol, MARKER_SYMBOL_COD, MARKER_SYMBOL_QCC, MARKER_SYMBOL_QCD, MARKER_SYMBOL_SIZ,
};
use crate::{CodestreamError, UnsupportedFeature};

/// Csiz upper bound (ISO/IEC 15444-1 Table A.9).
pub const MAX_COMPONENTS: u16 = 16384;

/// Largest number of decomposition levels, N_L.
pub const MAX_DECOMPOSITION_LEVELS: u8 = 32;

/// PPx = PPy = 15 is used when no precinct sizes are signalled.
pub const DEFAULT_PRECINCT_EXPONENT: u8 = 15;

/// Largest component bit depth, Ssiz + 1.
pub const MAX_PRECISION: u8 = 38;

pub const CODE_BLOCK_STYLE_RESTART: u8 = 0b0000_0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressionOrder {
    // 0000 0000 Layer-resolution level-component-position progression
    Lrcp,

    // 0000 0001 Resolution level-layer-component-position progression
    Rlcp,

    // 0000 0010 Resolution level-position-component-layer progression
    Rpcl,

    // 0000 0011 Position-component-resolution level-layer progression
    Pcrl,

    // 0000 0100 Component-position-resolution level-layer progression
    Cprl,
}

impl ProgressionOrder {
    pub fn new(value: u8) -> Option<ProgressionOrder> {
        match value {
            0b0000_0000 => Some(ProgressionOrder::Lrcp),
            0b0000_0001 => Some(ProgressionOrder::Rlcp),
            0b0000_0010 => Some(ProgressionOrder::Rpcl),
            0b0000_0011 => Some(ProgressionOrder::Pcrl),
            0b0000_0100 => Some(ProgressionOrder::Cprl),
            _ => None,
        }
    }

    pub fn value(self) -> u8 {
        match self {
            ProgressionOrder::Lrcp => 0,
            ProgressionOrder::Rlcp => 1,
            ProgressionOrder::Rpcl => 2,
            ProgressionOrder::Pcrl => 3,
            ProgressionOrder::Cprl => 4,
        }
    }

    /// Orders that never come back to a precinct once it was visited.
    pub fn visits_precinct_once(self) -> bool {
        matches!(
            self,
            ProgressionOrder::Rpcl | ProgressionOrder::Pcrl | ProgressionOrder::Cprl
        )
    }
}

impl fmt::Display for ProgressionOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProgressionOrder::Lrcp => "LRCP",
            ProgressionOrder::Rlcp => "RLCP",
            ProgressionOrder::Rpcl => "RPCL",
            ProgressionOrder::Pcrl => "PCRL",
            ProgressionOrder::Cprl => "CPRL",
        };
        f.write_str(name)
    }
}

const MULTIPLE_COMPONENT_TRANSFORMATION_NONE: u8 = 0b_0000_0000;
const MULTIPLE_COMPONENT_TRANSFORMATION_MULTIPLE: u8 = 0b_0000_0001;
const MULTIPLE_COMPONENT_TRANSFORMATION_GENERIC: u8 = 0b_0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipleComponentTransformation {
    // No multiple component transformation specified.
    None,

    // Component transformation used on components 0, 1, 2 for coding efficiency.
    // Irreversible component transformation used with the 9-7 irreversible filter.
    // Reversible component transformation used with the 5-3 reversible filter.
    Multiple,

    // ISO/IEC 15444-2: transformation described by MCT, MCC and MCO marker
    // segments.
    Generic,
}

impl MultipleComponentTransformation {
    pub fn new(value: u8) -> Option<MultipleComponentTransformation> {
        match value {
            MULTIPLE_COMPONENT_TRANSFORMATION_NONE => Some(MultipleComponentTransformation::None),
            MULTIPLE_COMPONENT_TRANSFORMATION_MULTIPLE => {
                Some(MultipleComponentTransformation::Multiple)
            }
            MULTIPLE_COMPONENT_TRANSFORMATION_GENERIC => {
                Some(MultipleComponentTransformation::Generic)
            }
            _ => None,
        }
    }
}

const TRANSFORMATION_FILTER_IRREVERSIBLE: u8 = 0;
const TRANSFORMATION_FILTER_REVERSIBLE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationFilter {
    // 9-7 irreversible filter
    Irreversible,
    // 5-3 reversible filter
    Reversible,
}

impl TransformationFilter {
    pub fn new(value: u8) -> Option<TransformationFilter> {
        match value {
            TRANSFORMATION_FILTER_IRREVERSIBLE => Some(TransformationFilter::Irreversible),
            TRANSFORMATION_FILTER_REVERSIBLE => Some(TransformationFilter::Reversible),
            _ => None,
        }
    }
}

/// Flags of the code-block style byte (Table A.19). Only the flags that are
/// set are listed by [`CodingBlockStyle::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingBlockStyle {
    // xxxx xxx1 - Selective arithmetic coding bypass
    SelectiveArithmeticCodingBypass,

    // xxxx xx1x - Reset context probabilities on coding pass boundaries
    ResetContextProbabilities,

    // xxxx x1xx - Termination on each coding pass (RESTART)
    TerminationOnEachCodingPass,

    // xxxx 1xxx - Vertically causal context
    VerticallyCausalContext,

    // xxx1 xxxx - Predictable termination
    PredictableTermination,

    // xx1x xxxx - Segmentation symbols are used
    SegmentationSymbolsAreUsed,

    // x1xx xxxx - High throughput block coder (ISO/IEC 15444-15)
    HighThroughput,

    // 1xxx xxxx - reserved
    Reserved,
}

impl CodingBlockStyle {
    pub fn new(value: u8) -> Vec<CodingBlockStyle> {
        const FLAGS: [(u8, CodingBlockStyle); 8] = [
            (0b0000_0001, CodingBlockStyle::SelectiveArithmeticCodingBypass),
            (0b0000_0010, CodingBlockStyle::ResetContextProbabilities),
            (0b0000_0100, CodingBlockStyle::TerminationOnEachCodingPass),
            (0b0000_1000, CodingBlockStyle::VerticallyCausalContext),
            (0b0001_0000, CodingBlockStyle::PredictableTermination),
            (0b0010_0000, CodingBlockStyle::SegmentationSymbolsAreUsed),
            (0b0100_0000, CodingBlockStyle::HighThroughput),
            (0b1000_0000, CodingBlockStyle::Reserved),
        ];

        FLAGS
            .iter()
            .filter(|(bit, _)| value & bit != 0)
            .map(|(_, style)| *style)
            .collect()
    }
}

/// Precinct size exponents for one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecinctSize {
    value: u8,
}

impl PrecinctSize {
    pub fn new(width_exponent: u8, height_exponent: u8) -> PrecinctSize {
        PrecinctSize {
            value: (height_exponent << 4) | (width_exponent & 0x0F),
        }
    }

    pub(crate) fn from_byte(value: u8) -> PrecinctSize {
        PrecinctSize { value }
    }

    // 4 LSBs are the precinct width exponent, PPx
    pub fn width_exponent(&self) -> u8 {
        self.value & 0x0F
    }

    // 4 MSBs are the precinct height exponent, PPy
    pub fn height_exponent(&self) -> u8 {
        self.value >> 4
    }
}

impl Default for PrecinctSize {
    fn default() -> Self {
        PrecinctSize::new(DEFAULT_PRECINCT_EXPONENT, DEFAULT_PRECINCT_EXPONENT)
    }
}

/// SPcod / SPcoc: the per-component part of a coding style.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentCodingParameters {
    // Scod/Scoc bit 0: precinct sizes are signalled.
    pub(crate) user_precincts: bool,

    // Number of decomposition levels, N_L, Zero implies no transformation
    pub(crate) no_decomposition_levels: u8,

    // Code-block width exponent offset value, xcb - 2
    pub(crate) code_block_width: u8,

    // Code-block height exponent offset value, ycb - 2
    pub(crate) code_block_height: u8,

    // Style of the code-block coding passes
    pub(crate) code_block_style: u8,

    // Wavelet transformation used.
    pub(crate) transformation: TransformationFilter,

    // One entry per resolution level, the first for the N_L LL subband.
    pub(crate) precinct_sizes: Vec<PrecinctSize>,
}

impl Default for ComponentCodingParameters {
    fn default() -> Self {
        ComponentCodingParameters {
            user_precincts: false,
            no_decomposition_levels: 5,
            code_block_width: 4,
            code_block_height: 4,
            code_block_style: 0,
            transformation: TransformationFilter::Reversible,
            precinct_sizes: vec![PrecinctSize::default(); 6],
        }
    }
}

impl ComponentCodingParameters {
    pub fn no_decomposition_levels(&self) -> u8 {
        self.no_decomposition_levels
    }

    pub fn no_resolution_levels(&self) -> u8 {
        self.no_decomposition_levels + 1
    }

    // A.18
    //
    // Code-block width and height exponent offset value xcb = value + 2 or
    // ycb = value + 2.
    pub fn code_block_width_exponent(&self) -> u8 {
        self.code_block_width + 2
    }

    pub fn code_block_height_exponent(&self) -> u8 {
        self.code_block_height + 2
    }

    pub fn code_block_width(&self) -> u16 {
        1u16 << self.code_block_width_exponent()
    }

    pub fn code_block_height(&self) -> u16 {
        1u16 << self.code_block_height_exponent()
    }

    pub fn code_block_style(&self) -> u8 {
        self.code_block_style
    }

    pub fn coding_block_styles(&self) -> Vec<CodingBlockStyle> {
        CodingBlockStyle::new(self.code_block_style)
    }

    /// Every coding pass is terminated, i.e. one codeword segment per pass.
    pub fn restart(&self) -> bool {
        self.code_block_style & CODE_BLOCK_STYLE_RESTART != 0
    }

    pub fn transformation(&self) -> TransformationFilter {
        self.transformation
    }

    pub fn has_defined_precinct_size(&self) -> bool {
        self.user_precincts
    }

    pub fn precinct_sizes(&self) -> &[PrecinctSize] {
        &self.precinct_sizes
    }

    /// Precinct size of resolution level `r`, default when not signalled.
    pub fn precinct_size(&self, r: u8) -> PrecinctSize {
        self.precinct_sizes
            .get(r as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Range checks shared by COD, COC and the JPK dialect.
    pub(crate) fn validate(&self, marker: MarkerSymbol) -> Result<(), CodestreamError> {
        if self.no_decomposition_levels > MAX_DECOMPOSITION_LEVELS {
            return Err(CodestreamError::out_of_range(
                marker,
                "decomposition levels",
                self.no_decomposition_levels,
            ));
        }

        // The code-block width and height are limited to powers of two with
        // the minimum size being 2^2 and the maximum being 2^10. Furthermore,
        // the code-block size is restricted so that xcb + ycb <= 12.
        if self.code_block_width > 8 {
            return Err(CodestreamError::out_of_range(
                marker,
                "code-block width exponent",
                self.code_block_width_exponent(),
            ));
        }
        if self.code_block_height > 8 {
            return Err(CodestreamError::out_of_range(
                marker,
                "code-block height exponent",
                self.code_block_height_exponent(),
            ));
        }
        if self.code_block_width + self.code_block_height > 8 {
            return Err(CodestreamError::out_of_range(
                marker,
                "code-block area exponent",
                self.code_block_width_exponent() + self.code_block_height_exponent(),
            ));
        }

        if self.code_block_style & !CODE_BLOCK_STYLE_RESTART != 0 {
            let flags = CodingBlockStyle::new(self.code_block_style & !CODE_BLOCK_STYLE_RESTART);
            return Err(CodestreamError::unsupported(
                UnsupportedFeature::CodeblockStyle { flags },
            ));
        }

        if self.precinct_sizes.len() != self.no_resolution_levels() as usize {
            return Err(CodestreamError::MarkerError {
                marker,
                error: format!(
                    "{} precinct sizes for {} resolution levels",
                    self.precinct_sizes.len(),
                    self.no_resolution_levels()
                ),
            });
        }

        // PPx and PPy may only be zero for the N_L LL subband.
        for precinct_size in self.precinct_sizes.iter().skip(1) {
            if precinct_size.width_exponent() == 0 {
                return Err(CodestreamError::out_of_range(
                    marker,
                    "precinct width exponent",
                    precinct_size.width_exponent(),
                ));
            }
            if precinct_size.height_exponent() == 0 {
                return Err(CodestreamError::out_of_range(
                    marker,
                    "precinct height exponent",
                    precinct_size.height_exponent(),
                ));
            }
        }

        Ok(())
    }
}

/// COD: coding style default.
#[derive(Debug, Clone, PartialEq)]
pub struct CodingParameters {
    // Scod
    pub(crate) coding_style: u8,

    // Progression order
    pub(crate) progression_order: ProgressionOrder,

    // Number of layers
    pub(crate) no_layers: u16,

    // Multiple component transformation
    pub(crate) multiple_component_transformation: MultipleComponentTransformation,

    // SPcod, the default for all components without a COC
    pub(crate) parameters: ComponentCodingParameters,
}

impl Default for CodingParameters {
    fn default() -> Self {
        CodingParameters {
            coding_style: 0,
            progression_order: ProgressionOrder::Lrcp,
            no_layers: 1,
            multiple_component_transformation: MultipleComponentTransformation::None,
            parameters: ComponentCodingParameters::default(),
        }
    }
}

impl CodingParameters {
    pub fn coding_style(&self) -> u8 {
        self.coding_style
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.progression_order
    }

    pub fn no_layers(&self) -> u16 {
        self.no_layers
    }

    pub fn multiple_component_transformation(&self) -> MultipleComponentTransformation {
        self.multiple_component_transformation
    }

    pub fn parameters(&self) -> &ComponentCodingParameters {
        &self.parameters
    }

    // xxxx xx1x SOP marker segments may be used
    pub fn sop_allowed(&self) -> bool {
        self.coding_style & 0b010 != 0
    }

    // xxxx x1xx EPH marker used
    pub fn eph_used(&self) -> bool {
        self.coding_style & 0b100 != 0
    }

    pub(crate) fn validate(&self) -> Result<(), CodestreamError> {
        if self.no_layers == 0 {
            return Err(CodestreamError::out_of_range(
                MARKER_SYMBOL_COD,
                "number of layers",
                self.no_layers,
            ));
        }
        self.parameters.validate(MARKER_SYMBOL_COD)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationStyle {
    No { guard: u8 },
    ScalarDerived { guard: u8 },
    ScalarExpounded { guard: u8 },
    Reserved { value: u8 },
}

impl QuantizationStyle {
    pub fn new(byte: u8) -> QuantizationStyle {
        let value = byte & 0b0001_1111;

        // 000x xxxx to 111x xxxx, Number of guard bits: 0 to 7
        let guard = byte >> 5;

        match value {
            // No quantization
            0b0000_0000 => QuantizationStyle::No { guard },

            // Scalar derived (values signalled for NLLL subband only).
            0b0000_0001 => QuantizationStyle::ScalarDerived { guard },

            // Scalar expounded (values signalled for each subband). There are
            // as many step sizes signalled as there are subbands.
            0b0000_0010 => QuantizationStyle::ScalarExpounded { guard },

            _ => QuantizationStyle::Reserved { value: byte },
        }
    }

    pub fn guard_bits(&self) -> u8 {
        match self {
            QuantizationStyle::No { guard }
            | QuantizationStyle::ScalarDerived { guard }
            | QuantizationStyle::ScalarExpounded { guard } => *guard,
            QuantizationStyle::Reserved { value } => value >> 5,
        }
    }
}

/// One quantization step size; mantissa is zero without quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepSize {
    pub exponent: u8,
    pub mantissa: u16,
}

impl StepSize {
    // SPqcd for reversible transformation: exponent in the 5 MSBs.
    pub(crate) fn from_reversible(value: u8) -> StepSize {
        StepSize {
            exponent: value >> 3,
            mantissa: 0,
        }
    }

    // SPqcd for irreversible transformation: 5 bits exponent, 11 bits mantissa.
    pub(crate) fn from_irreversible(value: u16) -> StepSize {
        StepSize {
            exponent: (value >> 11) as u8,
            mantissa: value & 0x07FF,
        }
    }
}

/// Quantization values as signalled, before they are spread over the
/// resolution levels of a component.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SignalledQuantization {
    pub(crate) style: QuantizationStyle,
    pub(crate) values: Vec<StepSize>,
}

/// Resolved quantization of one component, indexed [resolution level][subband].
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizationParameters {
    pub(crate) style: QuantizationStyle,
    pub(crate) step_sizes: Vec<Vec<StepSize>>,
}

impl Default for SignalledQuantization {
    fn default() -> Self {
        SignalledQuantization {
            style: QuantizationStyle::No { guard: 0 },
            values: Vec::new(),
        }
    }
}

impl QuantizationParameters {
    /// Spreads the signalled values over `no_decomposition_levels + 1`
    /// resolution levels. Level 0 holds the LL subband, every other level
    /// holds HL, LH and HH.
    pub(crate) fn resolve(
        signalled: &SignalledQuantization,
        no_decomposition_levels: u8,
        marker: MarkerSymbol,
    ) -> Result<QuantizationParameters, CodestreamError> {
        let no_subbands = 3 * no_decomposition_levels as usize + 1;

        let step_sizes = match signalled.style {
            QuantizationStyle::No { .. } | QuantizationStyle::ScalarExpounded { .. } => {
                if signalled.values.len() != no_subbands {
                    return Err(CodestreamError::MarkerError {
                        marker,
                        error: format!(
                            "{} step sizes signalled for {} subbands",
                            signalled.values.len(),
                            no_subbands
                        ),
                    });
                }
                let mut step_sizes = vec![vec![signalled.values[0]]];
                for level in signalled.values[1..].chunks(3) {
                    step_sizes.push(level.to_vec());
                }
                step_sizes
            }
            QuantizationStyle::ScalarDerived { .. } => {
                let base = match signalled.values.as_slice() {
                    [base] => *base,
                    _ => {
                        return Err(CodestreamError::MarkerError {
                            marker,
                            error: format!(
                                "{} step sizes signalled for scalar derived quantization",
                                signalled.values.len()
                            ),
                        })
                    }
                };
                derive_step_sizes(base, no_decomposition_levels, marker)?
            }
            QuantizationStyle::Reserved { value } => {
                return Err(CodestreamError::out_of_range(
                    marker,
                    "quantization style",
                    value & 0b0001_1111,
                ))
            }
        };

        Ok(QuantizationParameters {
            style: signalled.style,
            step_sizes,
        })
    }

    pub fn style(&self) -> QuantizationStyle {
        self.style
    }

    pub fn guard_bits(&self) -> u8 {
        self.style.guard_bits()
    }

    pub fn step_sizes(&self, resolution_level: u8) -> &[StepSize] {
        &self.step_sizes[resolution_level as usize]
    }

    pub fn exponent(&self, resolution_level: u8, subband: usize) -> u8 {
        self.step_sizes[resolution_level as usize][subband].exponent
    }

    pub fn mantissa(&self, resolution_level: u8, subband: usize) -> u16 {
        self.step_sizes[resolution_level as usize][subband].mantissa
    }

    pub fn exponents(&self) -> Vec<u8> {
        self.step_sizes
            .iter()
            .flatten()
            .map(|step_size| step_size.exponent)
            .collect()
    }
}

// E.1.1.1: for scalar derived quantization the step size of subband b is
// (ε_0 - N_L + n_b, μ_0), n_b being the decomposition level of b. Resolution
// level r >= 1 holds the subbands of decomposition level N_L - r + 1, so every
// level lowers the exponent by one, starting from ε_0 at level 1.
fn derive_step_sizes(
    base: StepSize,
    no_decomposition_levels: u8,
    marker: MarkerSymbol,
) -> Result<Vec<Vec<StepSize>>, CodestreamError> {
    let mut step_sizes = Vec::with_capacity(no_decomposition_levels as usize + 1);
    step_sizes.push(vec![base]);

    for r in 1..=no_decomposition_levels {
        let exponent = (base.exponent as i16) + 1 - (r as i16);
        if exponent < 0 {
            return Err(CodestreamError::MarkerError {
                marker,
                error: format!(
                    "derived exponent of resolution level {} is negative (base exponent {})",
                    r, base.exponent
                ),
            });
        }
        let step_size = StepSize {
            exponent: exponent as u8,
            mantissa: base.mantissa,
        };
        step_sizes.push(vec![step_size; 3]);
    }

    Ok(step_sizes)
}

/// Ssiz, XRsiz and YRsiz of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSizing {
    // Bit depth, 1 to 38
    pub(crate) precision: u8,
    pub(crate) signed: bool,
    pub(crate) horizontal_separation: u8,
    pub(crate) vertical_separation: u8,
}

impl ComponentSizing {
    pub fn new(
        precision: u8,
        signed: bool,
        horizontal_separation: u8,
        vertical_separation: u8,
    ) -> ComponentSizing {
        ComponentSizing {
            precision,
            signed,
            horizontal_separation,
            vertical_separation,
        }
    }

    pub(crate) fn from_ssiz(ssiz: u8, horizontal_separation: u8, vertical_separation: u8) -> Self {
        ComponentSizing {
            // ISO/IEC 15444-1:2019 Table A.11, component bit depth is value + 1.
            precision: (ssiz & 0x7f) + 1,
            signed: ssiz & 0x80 == 0x80,
            horizontal_separation,
            vertical_separation,
        }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn values_are_signed(&self) -> bool {
        self.signed
    }

    pub fn horizontal_separation(&self) -> u8 {
        self.horizontal_separation
    }

    pub fn vertical_separation(&self) -> u8 {
        self.vertical_separation
    }
}

/// SIZ: image and tile size.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SizingParameters {
    // Rsiz: Denotes capabilities that a decoder needs to properly decode the
    // codestream.
    pub(crate) decoder_capabilities: u16,

    // XSiz, YSiz: Size of the reference grid.
    pub(crate) reference_grid_width: u32,
    pub(crate) reference_grid_height: u32,

    // XOsiz, YOsiz: Offset from the origin of the reference grid to the
    // image area.
    pub(crate) image_horizontal_offset: u32,
    pub(crate) image_vertical_offset: u32,

    // XTsiz, YTsiz: Size of one reference tile.
    pub(crate) reference_tile_width: u32,
    pub(crate) reference_tile_height: u32,

    // XTOsiz, YTOsiz: Offset from the origin of the reference grid to the
    // first tile.
    pub(crate) tile_horizontal_offset: u32,
    pub(crate) tile_vertical_offset: u32,

    // One entry per component, Csiz entries.
    pub(crate) components: Vec<ComponentSizing>,
}

impl SizingParameters {
    pub fn decoder_capabilities(&self) -> u16 {
        self.decoder_capabilities
    }

    pub fn reference_grid_width(&self) -> u32 {
        self.reference_grid_width
    }

    pub fn reference_grid_height(&self) -> u32 {
        self.reference_grid_height
    }

    pub fn image_horizontal_offset(&self) -> u32 {
        self.image_horizontal_offset
    }

    pub fn image_vertical_offset(&self) -> u32 {
        self.image_vertical_offset
    }

    pub fn reference_tile_width(&self) -> u32 {
        self.reference_tile_width
    }

    pub fn reference_tile_height(&self) -> u32 {
        self.reference_tile_height
    }

    pub fn tile_horizontal_offset(&self) -> u32 {
        self.tile_horizontal_offset
    }

    pub fn tile_vertical_offset(&self) -> u32 {
        self.tile_vertical_offset
    }

    /// Csiz, also called zSize.
    pub fn no_components(&self) -> u16 {
        self.components.len() as u16
    }

    pub fn components(&self) -> &[ComponentSizing] {
        &self.components
    }

    pub fn component(&self, i: u16) -> &ComponentSizing {
        &self.components[i as usize]
    }

    // The number of tiles in the X direction (numXtiles) and the Y direction
    // (numYtiles) is the following
    //
    // numXtiles = ⌈(Xsiz - XTOsiz) / XTsiz⌉
    // numYtiles = ⌈(Ysiz - YTOsiz) / YTsiz⌉
    pub fn num_x_tiles(&self) -> u32 {
        (self.reference_grid_width - self.tile_horizontal_offset)
            .div_ceil(self.reference_tile_width)
    }

    pub fn num_y_tiles(&self) -> u32 {
        (self.reference_grid_height - self.tile_vertical_offset)
            .div_ceil(self.reference_tile_height)
    }

    pub fn num_tiles(&self) -> u32 {
        self.num_x_tiles() * self.num_y_tiles()
    }

    /// Range checks shared by SIZ and the JPK dialect, followed by the
    /// single-tile restriction.
    pub(crate) fn validate(&self) -> Result<(), CodestreamError> {
        let marker = MARKER_SYMBOL_SIZ;
        let no_components = self.components.len();
        if no_components == 0 || no_components > MAX_COMPONENTS as usize {
            return Err(CodestreamError::out_of_range(
                marker,
                "Csiz",
                no_components as u64,
            ));
        }
        if self.reference_grid_width <= self.image_horizontal_offset {
            return Err(CodestreamError::out_of_range(
                marker,
                "Xsiz",
                self.reference_grid_width,
            ));
        }
        if self.reference_grid_height <= self.image_vertical_offset {
            return Err(CodestreamError::out_of_range(
                marker,
                "Ysiz",
                self.reference_grid_height,
            ));
        }
        if self.reference_tile_width == 0 {
            return Err(CodestreamError::out_of_range(marker, "XTsiz", 0u32));
        }
        if self.reference_tile_height == 0 {
            return Err(CodestreamError::out_of_range(marker, "YTsiz", 0u32));
        }

        // The tile grid offsets (XTOsiz, YTOsiz) are constrained to be no
        // greater than the image area offsets. This is expressed by the
        // following ranges
        // 0 ≤ XTOsiz ≤ XOsiz
        // 0 ≤ YTOsiz ≤ YOsiz
        if self.tile_horizontal_offset > self.image_horizontal_offset
            || self.tile_vertical_offset > self.image_vertical_offset
        {
            return Err(CodestreamError::TileGridOffsetOverflow {
                tile_horizontal_offset: self.tile_horizontal_offset,
                image_horizontal_offset: self.image_horizontal_offset,
                tile_vertical_offset: self.tile_vertical_offset,
                image_vertical_offset: self.image_vertical_offset,
            });
        }

        // Also, the tile size plus the tile offset shall be greater than the image
        // area offset. This ensures that the first tile (tile 0) will contain at least
        // one reference grid point from the image area.
        //
        // XTsiz + XTOsiz > XOsiz
        // YTsiz + YTOsiz > YOsiz
        if (self.reference_tile_width as u64 + self.tile_horizontal_offset as u64)
            <= self.image_horizontal_offset as u64
            || (self.reference_tile_height as u64 + self.tile_vertical_offset as u64)
                <= self.image_vertical_offset as u64
        {
            return Err(CodestreamError::TileSizeOverflow {
                image_horizontal_offset: self.image_horizontal_offset,
                image_vertical_offset: self.image_vertical_offset,
                tile_horizontal_offset: self.tile_horizontal_offset,
                tile_vertical_offset: self.tile_vertical_offset,
                reference_tile_width: self.reference_tile_width,
                reference_tile_height: self.reference_tile_height,
            });
        }

        for component in &self.components {
            if component.precision == 0 || component.precision > MAX_PRECISION {
                return Err(CodestreamError::out_of_range(
                    marker,
                    "Ssiz",
                    component.precision,
                ));
            }
            if component.horizontal_separation == 0 {
                return Err(CodestreamError::out_of_range(marker, "XRsiz", 0u8));
            }
            if component.vertical_separation == 0 {
                return Err(CodestreamError::out_of_range(marker, "YRsiz", 0u8));
            }
        }

        let tiles = self.num_tiles();
        if tiles != 1 {
            return Err(CodestreamError::unsupported(
                UnsupportedFeature::MultipleTiles { tiles },
            ));
        }

        Ok(())
    }
}

/// One line of a Kakadu `Kdu-Layer-Info` comment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerRateInfo {
    /// log2 of the distortion-length slope threshold of the layer.
    pub slope: f64,
    /// Cumulative number of bytes up to and including the layer.
    pub bytes: f64,
}

/// Auxiliary metadata carried in recognised COM marker segments.
#[derive(Debug, Clone, PartialEq)]
pub enum CommentMetadata {
    /// Latin text comment in no recognised dialect.
    Text(String),

    /// Kakadu `Kdu-Layer-Info` text comment.
    LayerInfo(Vec<LayerRateInfo>),

    /// CADI binary rate-distortion slope thresholds, one per layer.
    RateDistortionSlopes(Vec<f32>),

    /// CADI binary predictive model: predicted bits per sample for each
    /// component and resolution level.
    PredictiveModel {
        no_components: u16,
        no_resolution_levels: u8,
        values: Vec<f32>,
    },
}

/// CBD: bit depth of the components output by the multiple component
/// transformation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComponentBitDepths {
    pub(crate) depths: Vec<(u8, bool)>,
}

impl ComponentBitDepths {
    /// (precision, signed) per output component.
    pub fn depths(&self) -> &[(u8, bool)] {
        &self.depths
    }
}

/// Element type of an MCT array, Imct bits 10-11.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayElementType {
    Int16,
    Int32,
    Float32,
    Float64,
}

impl ArrayElementType {
    pub(crate) fn new(value: u8) -> ArrayElementType {
        match value & 0b11 {
            0 => ArrayElementType::Int16,
            1 => ArrayElementType::Int32,
            2 => ArrayElementType::Float32,
            _ => ArrayElementType::Float64,
        }
    }

    pub(crate) fn size(self) -> usize {
        match self {
            ArrayElementType::Int16 => 2,
            ArrayElementType::Int32 | ArrayElementType::Float32 => 4,
            ArrayElementType::Float64 => 8,
        }
    }
}

/// MCT offset array; dependency and decorrelation arrays are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetArray {
    pub(crate) index: u8,
    pub(crate) element_type: ArrayElementType,
    pub(crate) values: Vec<f64>,
}

impl OffsetArray {
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn element_type(&self) -> ArrayElementType {
        self.element_type
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// One wavelet based component collection of an MCC marker segment.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveletCollection {
    pub(crate) input_components: Vec<u16>,
    pub(crate) output_components: Vec<u16>,
    pub(crate) kernel_index: u8,
    pub(crate) offset_index: u8,
    pub(crate) decomposition_levels: u8,
    pub(crate) offset: u32,
}

impl WaveletCollection {
    pub fn input_components(&self) -> &[u16] {
        &self.input_components
    }

    pub fn output_components(&self) -> &[u16] {
        &self.output_components
    }

    pub fn kernel_index(&self) -> u8 {
        self.kernel_index
    }

    pub fn offset_index(&self) -> u8 {
        self.offset_index
    }

    pub fn decomposition_levels(&self) -> u8 {
        self.decomposition_levels
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

/// MCC: one transformation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentCollectionStage {
    pub(crate) index: u8,
    pub(crate) collections: Vec<WaveletCollection>,
}

impl ComponentCollectionStage {
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn collections(&self) -> &[WaveletCollection] {
        &self.collections
    }
}

/// Everything signalled by CBD, MCT, MCC and MCO.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipleComponentTransform {
    pub(crate) bit_depths: Option<ComponentBitDepths>,
    pub(crate) offsets: Vec<OffsetArray>,
    pub(crate) stages: Vec<ComponentCollectionStage>,
    pub(crate) ordering: Vec<u8>,
}

impl MultipleComponentTransform {
    pub fn bit_depths(&self) -> Option<&ComponentBitDepths> {
        self.bit_depths.as_ref()
    }

    pub fn offsets(&self) -> &[OffsetArray] {
        &self.offsets
    }

    pub fn stages(&self) -> &[ComponentCollectionStage] {
        &self.stages
    }

    /// MCO: stage indices in the order they are applied.
    pub fn ordering(&self) -> &[u8] {
        &self.ordering
    }

    pub fn is_empty(&self) -> bool {
        self.bit_depths.is_none()
            && self.offsets.is_empty()
            && self.stages.is_empty()
            && self.ordering.is_empty()
    }
}

/// Coding and quantization of one component after COC/QCC overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentParameters {
    pub(crate) coding: ComponentCodingParameters,
    pub(crate) quantization: QuantizationParameters,
}

impl ComponentParameters {
    pub fn coding(&self) -> &ComponentCodingParameters {
        &self.coding
    }

    pub fn quantization(&self) -> &QuantizationParameters {
        &self.quantization
    }
}

/// Decoded main header, identical in shape for both dialects.
#[derive(Debug, Clone, PartialEq)]
pub struct MainHeader {
    pub(crate) dialect: HeaderDialect,

    // Byte offset of the first header byte and number of header bytes.
    pub(crate) offset: u64,
    pub(crate) length: u64,

    pub(crate) sizing: SizingParameters,
    pub(crate) coding: CodingParameters,
    pub(crate) components: Vec<ComponentParameters>,
    pub(crate) comments: Vec<CommentMetadata>,
    pub(crate) multiple_component_transform: MultipleComponentTransform,
}

impl MainHeader {
    pub fn dialect(&self) -> HeaderDialect {
        self.dialect
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn sizing(&self) -> &SizingParameters {
        &self.sizing
    }

    pub fn coding(&self) -> &CodingParameters {
        &self.coding
    }

    pub fn component(&self, component: u16) -> &ComponentParameters {
        &self.components[component as usize]
    }

    pub fn components(&self) -> &[ComponentParameters] {
        &self.components
    }

    pub fn comments(&self) -> &[CommentMetadata] {
        &self.comments
    }

    pub fn multiple_component_transform(&self) -> &MultipleComponentTransform {
        &self.multiple_component_transform
    }

    pub fn no_layers(&self) -> u16 {
        self.coding.no_layers
    }

    /// Largest number of resolution levels over all components.
    pub fn max_resolution_levels(&self) -> u8 {
        self.components
            .iter()
            .map(|component| component.coding.no_resolution_levels())
            .max()
            .unwrap_or(0)
    }

    /// Resolves COC/QCC overrides into per-component parameters. Sizing and
    /// coding parameters are validated by the dialect decoders as they are read.
    pub(crate) fn assemble(
        dialect: HeaderDialect,
        offset: u64,
        length: u64,
        parts: HeaderParts,
    ) -> Result<MainHeader, CodestreamError> {
        let HeaderParts {
            sizing,
            coding,
            coc,
            qcd,
            qcc,
            comments,
            multiple_component_transform,
        } = parts;

        let mut components = Vec::with_capacity(sizing.components.len());
        for (c, (coc, qcc)) in coc.into_iter().zip(qcc).enumerate() {
            let component_coding = coc.unwrap_or_else(|| coding.parameters.clone());
            let (signalled, marker) = match &qcc {
                Some(signalled) => (signalled, MARKER_SYMBOL_QCC),
                None => (&qcd, MARKER_SYMBOL_QCD),
            };
            let quantization = QuantizationParameters::resolve(
                signalled,
                component_coding.no_decomposition_levels,
                marker,
            )
            .map_err(|error| match error {
                CodestreamError::MarkerError { marker, error } => CodestreamError::MarkerError {
                    marker,
                    error: format!("component {}: {}", c, error),
                },
                error => error,
            })?;

            if component_coding.transformation == TransformationFilter::Reversible
                && !matches!(signalled.style, QuantizationStyle::No { .. })
            {
                log::warn!(
                    "component {} uses the reversible filter with quantization {:?}",
                    c,
                    signalled.style
                );
            }

            components.push(ComponentParameters {
                coding: component_coding,
                quantization,
            });
        }

        Ok(MainHeader {
            dialect,
            offset,
            length,
            sizing,
            coding,
            components,
            comments,
            multiple_component_transform,
        })
    }
}

/// Everything a dialect decoder collects before the header is assembled.
/// `coc` and `qcc` hold one optional override per component.
#[derive(Debug, Default)]
pub(crate) struct HeaderParts {
    pub(crate) sizing: SizingParameters,
    pub(crate) coding: CodingParameters,
    pub(crate) coc: Vec<Option<ComponentCodingParameters>>,
    pub(crate) qcd: SignalledQuantization,
    pub(crate) qcc: Vec<Option<SignalledQuantization>>,
    pub(crate) comments: Vec<CommentMetadata>,
    pub(crate) multiple_component_transform: MultipleComponentTransform,
}
