//! Tile, component, resolution level, precinct and codeblock geometry
//! (ISO/IEC 15444-1 B.5 to B.7) derived from a decoded main header.
//!
//! The hierarchy is built once per main header and never changes shape.
//! Precinct entries live in a per-resolution arena indexed by precinct
//! number; the packet decode state of a precinct is created on first use and
//! stays with the entry until it is reset.

use std::fmt;

use crate::packet::PrecinctDecodeState;
use crate::parameters::{MainHeader, ProgressionOrder};
use crate::{CodestreamError, UnsupportedFeature};

/// Largest number of precincts a tile may have over all of its components
/// and resolution levels. Precinct entries are allocated up front.
pub const MAX_PRECINCTS: u64 = 1 << 22;

/// Half-open rectangle [x0, x1) x [y0, y1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Rect {
        Rect { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        Rect {
            x0,
            y0,
            x1: self.x1.min(other.x1).max(x0),
            y1: self.y1.min(other.y1).max(y0),
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersection(other).is_empty()
    }

    /// ⌈x / dx⌉, ⌈y / dy⌉ for every corner, e.g. tile to tile-component.
    pub fn scale_down(&self, dx: u32, dy: u32) -> Rect {
        Rect {
            x0: ceil_div(self.x0, dx),
            y0: ceil_div(self.y0, dy),
            x1: ceil_div(self.x1, dx),
            y1: ceil_div(self.y1, dy),
        }
    }

    /// ⌈x / 2^n⌉, ⌈y / 2^n⌉ for every corner.
    pub fn shift_down(&self, n: u8) -> Rect {
        Rect {
            x0: ceil_shift(self.x0, n),
            y0: ceil_shift(self.y0, n),
            x1: ceil_shift(self.x1, n),
            y1: ceil_shift(self.y1, n),
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}) x [{}, {})", self.x0, self.x1, self.y0, self.y1)
    }
}

pub(crate) fn ceil_div(a: u32, b: u32) -> u32 {
    ((a as u64 + b as u64 - 1) / b as u64) as u32
}

pub(crate) fn ceil_shift(a: u32, n: u8) -> u32 {
    ((a as u64 + (1u64 << n) - 1) >> n) as u32
}

// ⌈(a - b) / 2^n⌉ clamped at zero, a - b may be negative.
fn ceil_shift_signed(a: u32, b: u64, n: u8) -> u32 {
    let numerator = a as i64 - b as i64;
    let denominator = 1i64 << n;
    (-((-numerator).div_euclid(denominator))).max(0) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubbandKind {
    LL,
    HL,
    LH,
    HH,
}

impl SubbandKind {
    /// Subbands of a resolution level in packet order.
    pub fn for_resolution(resolution: u8) -> &'static [SubbandKind] {
        if resolution == 0 {
            &[SubbandKind::LL]
        } else {
            &[SubbandKind::HL, SubbandKind::LH, SubbandKind::HH]
        }
    }

    // (xob, yob) of Table B.1
    fn offsets(self) -> (u64, u64) {
        match self {
            SubbandKind::LL => (0, 0),
            SubbandKind::HL => (1, 0),
            SubbandKind::LH => (0, 1),
            SubbandKind::HH => (1, 1),
        }
    }
}

impl fmt::Display for SubbandKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SubbandKind::LL => "LL",
            SubbandKind::HL => "HL",
            SubbandKind::LH => "LH",
            SubbandKind::HH => "HH",
        };
        f.write_str(name)
    }
}

/// A whole subband of one resolution level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subband {
    kind: SubbandKind,
    decomposition_level: u8,
    rect: Rect,
    code_block_width_exponent: u8,
    code_block_height_exponent: u8,
}

impl Subband {
    pub fn kind(&self) -> SubbandKind {
        self.kind
    }

    /// n_b, the number of decompositions that produced the subband.
    pub fn decomposition_level(&self) -> u8 {
        self.decomposition_level
    }

    /// Extent in subband coordinates.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn codeblocks_wide(&self) -> u32 {
        blocks_across(self.rect.x0, self.rect.x1, self.code_block_width_exponent)
    }

    pub fn codeblocks_high(&self) -> u32 {
        blocks_across(self.rect.y0, self.rect.y1, self.code_block_height_exponent)
    }
}

fn blocks_across(start: u32, end: u32, exponent: u8) -> u32 {
    if end <= start {
        return 0;
    }
    ceil_shift(end, exponent) - (start >> exponent)
}

/// The part of one subband covered by one precinct, with its codeblock grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecinctSubband {
    pub kind: SubbandKind,
    /// Extent in subband coordinates, clipped to the subband.
    pub rect: Rect,
    /// Column and row of the first codeblock in the subband's codeblock grid.
    pub first_block_x: u32,
    pub first_block_y: u32,
    pub blocks_wide: u32,
    pub blocks_high: u32,
    pub code_block_width_exponent: u8,
    pub code_block_height_exponent: u8,
}

impl PrecinctSubband {
    pub fn no_codeblocks(&self) -> usize {
        self.blocks_wide as usize * self.blocks_high as usize
    }

    /// Subband coordinates of the codeblock at (row, column) of the precinct.
    pub fn codeblock_rect(&self, row: u32, column: u32) -> Rect {
        let x = (self.first_block_x + column) as u64;
        let y = (self.first_block_y + row) as u64;
        let cell = Rect {
            x0: (x << self.code_block_width_exponent) as u32,
            y0: (y << self.code_block_height_exponent) as u32,
            x1: ((x + 1) << self.code_block_width_exponent).min(u32::MAX as u64) as u32,
            y1: ((y + 1) << self.code_block_height_exponent).min(u32::MAX as u64) as u32,
        };
        cell.intersection(&self.rect)
    }
}

/// Precinct arena entry.
#[derive(Debug)]
pub struct Precinct {
    index: u32,
    in_class_id: u64,
    state: Option<Box<PrecinctDecodeState>>,
}

impl Precinct {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn in_class_id(&self) -> u64 {
        self.in_class_id
    }

    pub fn state(&self) -> Option<&PrecinctDecodeState> {
        self.state.as_deref()
    }
}

#[derive(Debug)]
pub struct ResolutionLevel {
    resolution: u8,
    rect: Rect,
    precinct_width_exponent: u8,
    precinct_height_exponent: u8,
    // ⌊trx0 / 2^PPx⌋, ⌊try0 / 2^PPy⌋
    precinct_origin_x: u32,
    precinct_origin_y: u32,
    precincts_wide: u32,
    precincts_high: u32,
    code_block_width_exponent: u8,
    code_block_height_exponent: u8,
    subbands: Vec<Subband>,
    // Sum of the precinct counts of all lower resolution levels.
    precinct_base: u64,
    precincts: Vec<Precinct>,
}

impl ResolutionLevel {
    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    /// Extent in the coordinates of this resolution level.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn precinct_width_exponent(&self) -> u8 {
        self.precinct_width_exponent
    }

    pub fn precinct_height_exponent(&self) -> u8 {
        self.precinct_height_exponent
    }

    pub fn precincts_wide(&self) -> u32 {
        self.precincts_wide
    }

    pub fn precincts_high(&self) -> u32 {
        self.precincts_high
    }

    pub fn no_precincts(&self) -> u32 {
        self.precincts.len() as u32
    }

    /// xcb' and ycb', the codeblock size exponents used at this level.
    pub fn code_block_exponents(&self) -> (u8, u8) {
        (self.code_block_width_exponent, self.code_block_height_exponent)
    }

    pub fn subbands(&self) -> &[Subband] {
        &self.subbands
    }

    pub fn subband(&self, kind: SubbandKind) -> Option<&Subband> {
        self.subbands.iter().find(|subband| subband.kind == kind)
    }

    pub fn precincts(&self) -> &[Precinct] {
        &self.precincts
    }

    /// Precinct partition cell of precinct `p`, not clipped to the level.
    pub fn precinct_cell(&self, p: u32) -> Rect {
        self.partition_cell(p, self.precinct_width_exponent, self.precinct_height_exponent)
    }

    /// Precinct `p` in resolution level coordinates, clipped to the level.
    pub fn precinct_rect(&self, p: u32) -> Rect {
        self.precinct_cell(p).intersection(&self.rect)
    }

    fn partition_cell(&self, p: u32, width_exponent: u8, height_exponent: u8) -> Rect {
        if self.precincts_wide == 0 {
            return Rect::default();
        }
        let px = (self.precinct_origin_x + p % self.precincts_wide) as u64;
        let py = (self.precinct_origin_y + p / self.precincts_wide) as u64;
        let clamp = |value: u64| value.min(u32::MAX as u64) as u32;
        Rect {
            x0: clamp(px << width_exponent),
            y0: clamp(py << height_exponent),
            x1: clamp((px + 1) << width_exponent),
            y1: clamp((py + 1) << height_exponent),
        }
    }

    /// Subband parts and codeblock grids of precinct `p`, in packet order.
    pub fn precinct_subbands(&self, p: u32) -> Vec<PrecinctSubband> {
        // Subbands of levels above zero are half the size of the level, so
        // are their precinct partition cells.
        let shrink = if self.resolution == 0 { 0 } else { 1 };
        let cell = self.partition_cell(
            p,
            self.precinct_width_exponent - shrink,
            self.precinct_height_exponent - shrink,
        );

        self.subbands
            .iter()
            .map(|subband| {
                let rect = cell.intersection(&subband.rect);
                let (xcb, ycb) = (self.code_block_width_exponent, self.code_block_height_exponent);
                let (blocks_wide, blocks_high) = if rect.is_empty() {
                    (0, 0)
                } else {
                    (
                        blocks_across(rect.x0, rect.x1, xcb),
                        blocks_across(rect.y0, rect.y1, ycb),
                    )
                };
                PrecinctSubband {
                    kind: subband.kind,
                    rect,
                    first_block_x: rect.x0 >> xcb,
                    first_block_y: rect.y0 >> ycb,
                    blocks_wide,
                    blocks_high,
                    code_block_width_exponent: xcb,
                    code_block_height_exponent: ycb,
                }
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct Component {
    index: u16,
    rect: Rect,
    horizontal_separation: u8,
    vertical_separation: u8,
    no_decomposition_levels: u8,
    resolutions: Vec<ResolutionLevel>,
}

impl Component {
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Tile-component extent in component coordinates.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn horizontal_separation(&self) -> u8 {
        self.horizontal_separation
    }

    pub fn vertical_separation(&self) -> u8 {
        self.vertical_separation
    }

    pub fn no_decomposition_levels(&self) -> u8 {
        self.no_decomposition_levels
    }

    pub fn no_resolution_levels(&self) -> u8 {
        self.resolutions.len() as u8
    }

    pub fn resolutions(&self) -> &[ResolutionLevel] {
        &self.resolutions
    }

    pub fn resolution(&self, r: u8) -> Option<&ResolutionLevel> {
        self.resolutions.get(r as usize)
    }

    /// Total number of precincts over all resolution levels.
    pub fn no_precincts(&self) -> u64 {
        self.resolutions
            .iter()
            .map(|level| level.no_precincts() as u64)
            .sum()
    }
}

/// Tile, component, resolution level and precinct index of a precinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tcrp {
    pub tile: u32,
    pub component: u16,
    pub resolution: u8,
    pub precinct: u32,
}

impl fmt::Display for Tcrp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "t{} c{} r{} p{}",
            self.tile, self.component, self.resolution, self.precinct
        )
    }
}

/// The single tile of a codestream and everything below it.
#[derive(Debug)]
pub struct Tile {
    index: u32,
    no_tiles: u32,
    rect: Rect,
    no_layers: u16,
    progression_order: ProgressionOrder,
    components: Vec<Component>,
    reference_precincts_wide: u32,
    reference_precincts_high: u32,
}

impl Tile {
    /// Fails with [`UnsupportedFeature::PrecinctCount`] when the tile has
    /// more than [`MAX_PRECINCTS`] precincts.
    pub fn new(header: &MainHeader) -> Result<Tile, CodestreamError> {
        let sizing = header.sizing();

        // B.3 tile 0: p = q = 0
        let rect = Rect {
            x0: sizing
                .tile_horizontal_offset()
                .max(sizing.image_horizontal_offset()),
            y0: sizing
                .tile_vertical_offset()
                .max(sizing.image_vertical_offset()),
            x1: (sizing.tile_horizontal_offset() as u64 + sizing.reference_tile_width() as u64)
                .min(sizing.reference_grid_width() as u64) as u32,
            y1: (sizing.tile_vertical_offset() as u64 + sizing.reference_tile_height() as u64)
                .min(sizing.reference_grid_height() as u64) as u32,
        };

        // Count first so that no precinct arena is allocated for a tile
        // that is rejected.
        let mut total = 0u64;
        for (component_sizing, parameters) in sizing.components().iter().zip(header.components()) {
            let coding = parameters.coding();
            let tile_component = rect.scale_down(
                component_sizing.horizontal_separation() as u32,
                component_sizing.vertical_separation() as u32,
            );
            for r in 0..=coding.no_decomposition_levels() {
                let (wide, high) = precinct_grid(tile_component, coding, r);
                total = total.saturating_add(wide as u64 * high as u64);
            }
        }
        if total > MAX_PRECINCTS {
            return Err(CodestreamError::unsupported(UnsupportedFeature::PrecinctCount {
                count: total,
            }));
        }

        let mut components = Vec::with_capacity(sizing.components().len());
        for (c, (component_sizing, parameters)) in
            sizing.components().iter().zip(header.components()).enumerate()
        {
            let coding = parameters.coding();
            let tile_component = rect.scale_down(
                component_sizing.horizontal_separation() as u32,
                component_sizing.vertical_separation() as u32,
            );
            let no_decomposition_levels = coding.no_decomposition_levels();

            let mut precinct_base = 0u64;
            let mut resolutions = Vec::with_capacity(no_decomposition_levels as usize + 1);
            for r in 0..=no_decomposition_levels {
                let level = build_resolution_level(
                    c as u16,
                    sizing.no_components(),
                    r,
                    tile_component,
                    coding,
                    precinct_base,
                );
                precinct_base += level.no_precincts() as u64;
                resolutions.push(level);
            }

            components.push(Component {
                index: c as u16,
                rect: tile_component,
                horizontal_separation: component_sizing.horizontal_separation(),
                vertical_separation: component_sizing.vertical_separation(),
                no_decomposition_levels,
                resolutions,
            });
        }

        let levels = || components.iter().flat_map(|component| component.resolutions.iter());
        let reference_precincts_wide = levels().map(|l| l.precincts_wide).max().unwrap_or(0);
        let reference_precincts_high = levels().map(|l| l.precincts_high).max().unwrap_or(0);

        Ok(Tile {
            index: 0,
            no_tiles: sizing.num_tiles(),
            rect,
            no_layers: header.no_layers(),
            progression_order: header.coding().progression_order(),
            components,
            reference_precincts_wide,
            reference_precincts_high,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Extent on the reference grid.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn no_layers(&self) -> u16 {
        self.no_layers
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.progression_order
    }

    pub fn no_components(&self) -> u16 {
        self.components.len() as u16
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, c: u16) -> Option<&Component> {
        self.components.get(c as usize)
    }

    /// Largest number of resolution levels over all components.
    pub fn max_resolution_levels(&self) -> u8 {
        self.components
            .iter()
            .map(Component::no_resolution_levels)
            .max()
            .unwrap_or(0)
    }

    /// Precinct grid of the reference level: the largest precinct counts
    /// over all components and resolution levels.
    pub fn reference_precincts(&self) -> (u32, u32) {
        (self.reference_precincts_wide, self.reference_precincts_high)
    }

    pub fn resolution_level(&self, c: u16, r: u8) -> Result<&ResolutionLevel, CodestreamError> {
        self.component(c)
            .and_then(|component| component.resolution(r))
            .ok_or_else(|| {
                CodestreamError::contract(format!(
                    "component {} resolution level {} does not exist",
                    c, r
                ))
            })
    }

    fn check_precinct(&self, c: u16, r: u8, p: u32) -> Result<&ResolutionLevel, CodestreamError> {
        let level = self.resolution_level(c, r)?;
        if p >= level.no_precincts() {
            return Err(CodestreamError::contract(format!(
                "precinct {} of component {} resolution level {} does not exist",
                p, c, r
            )));
        }
        Ok(level)
    }

    pub fn precinct(&self, c: u16, r: u8, p: u32) -> Result<&Precinct, CodestreamError> {
        let level = self.check_precinct(c, r, p)?;
        Ok(&level.precincts[p as usize])
    }

    /// ISO/IEC 15444-9 A.3.2.1: I = t + (c + s * Csiz) * numTiles with s the
    /// sequence number of the precinct over all resolution levels of the
    /// tile-component.
    pub fn in_class_id(&self, c: u16, r: u8, p: u32) -> Result<u64, CodestreamError> {
        let level = self.check_precinct(c, r, p)?;
        Ok(in_class_id(
            self.index,
            self.no_tiles,
            c,
            self.no_components(),
            level.precinct_base + p as u64,
        ))
    }

    pub fn find_tcrp(&self, in_class_id: u64) -> Result<Tcrp, CodestreamError> {
        let no_tiles = self.no_tiles.max(1) as u64;
        let no_components = self.no_components() as u64;

        let tile = (in_class_id % no_tiles) as u32;
        let rest = in_class_id / no_tiles;
        let component = (rest % no_components) as u16;
        let sequence = rest / no_components;

        let out_of_range =
            || CodestreamError::contract(format!("in-class identifier {} is out of range", in_class_id));
        if tile != self.index {
            return Err(out_of_range());
        }

        let component_levels = self.component(component).ok_or_else(out_of_range)?;
        component_levels
            .resolutions
            .iter()
            .find(|level| sequence < level.precinct_base + level.no_precincts() as u64)
            .map(|level| Tcrp {
                tile,
                component,
                resolution: level.resolution,
                precinct: (sequence - level.precinct_base) as u32,
            })
            .ok_or_else(out_of_range)
    }

    /// Maps a precinct position of the reference grid to the precinct of
    /// component `c` at resolution level `r` covering it.
    ///
    /// The level's precinct grid is doubled until it is at least as large
    /// as the reference grid; the reference position divided by the number
    /// of doublings is the corresponding position. Levels whose grid is not a
    /// power-of-two fraction of the reference grid are not reached at every
    /// position, which traversal makes up for.
    pub fn corresponding_precinct(&self, c: u16, r: u8, px: u32, py: u32) -> Option<u32> {
        let level = self.component(c)?.resolution(r)?;
        if level.no_precincts() == 0 {
            return None;
        }

        let x = corresponding_index(px, level.precincts_wide, self.reference_precincts_wide)?;
        let y = corresponding_index(py, level.precincts_high, self.reference_precincts_high)?;
        Some(y * level.precincts_wide + x)
    }

    /// Precinct partition cell of (c, r, p) mapped onto the reference grid.
    pub fn precinct_reference_rect(&self, c: u16, r: u8, p: u32) -> Result<Rect, CodestreamError> {
        let level = self.check_precinct(c, r, p)?;
        let component = &self.components[c as usize];
        let scale = component.no_decomposition_levels - r;
        let cell = level.precinct_cell(p);

        let up = |value: u32, separation: u8| -> u32 {
            ((value as u64) << scale)
                .saturating_mul(separation as u64)
                .min(u32::MAX as u64) as u32
        };
        Ok(Rect {
            x0: up(cell.x0, component.horizontal_separation),
            y0: up(cell.y0, component.vertical_separation),
            x1: up(cell.x1, component.horizontal_separation),
            y1: up(cell.y1, component.vertical_separation),
        })
    }

    /// Packet decode state of a precinct, created on first use.
    pub fn precinct_state_mut(
        &mut self,
        c: u16,
        r: u8,
        p: u32,
    ) -> Result<&mut PrecinctDecodeState, CodestreamError> {
        let subbands = self.check_precinct(c, r, p)?.precinct_subbands(p);
        let precinct =
            &mut self.components[c as usize].resolutions[r as usize].precincts[p as usize];
        Ok(precinct
            .state
            .get_or_insert_with(|| Box::new(PrecinctDecodeState::new(&subbands)))
            .as_mut())
    }

    /// Drops the decode state of a precinct, e.g. when its data-bin was
    /// evicted from the cache.
    pub fn reset_precinct(&mut self, c: u16, r: u8, p: u32) -> Result<(), CodestreamError> {
        self.check_precinct(c, r, p)?;
        let precinct =
            &mut self.components[c as usize].resolutions[r as usize].precincts[p as usize];
        if let Some(state) = precinct.state.as_mut() {
            state.reset();
        }
        Ok(())
    }
}

fn corresponding_index(position: u32, count: u32, reference: u32) -> Option<u32> {
    let mut ratio = 1u64;
    while (count as u64) * ratio < reference as u64 {
        ratio *= 2;
    }
    let index = (position as u64 / ratio) as u32;
    if index < count {
        Some(index)
    } else {
        None
    }
}

pub(crate) fn in_class_id(tile: u32, no_tiles: u32, c: u16, no_components: u16, s: u64) -> u64 {
    tile as u64 + (c as u64 + s * no_components as u64) * no_tiles.max(1) as u64
}

/// Precincts across and down resolution level `r` of a tile-component.
fn precinct_grid(
    tile_component: Rect,
    coding: &crate::parameters::ComponentCodingParameters,
    r: u8,
) -> (u32, u32) {
    let rect = tile_component.shift_down(coding.no_decomposition_levels() - r);
    let precinct_size = coding.precinct_size(r);
    (
        blocks_across(rect.x0, rect.x1, precinct_size.width_exponent()),
        blocks_across(rect.y0, rect.y1, precinct_size.height_exponent()),
    )
}

fn build_resolution_level(
    c: u16,
    no_components: u16,
    r: u8,
    tile_component: Rect,
    coding: &crate::parameters::ComponentCodingParameters,
    precinct_base: u64,
) -> ResolutionLevel {
    let no_decomposition_levels = coding.no_decomposition_levels();
    let rect = tile_component.shift_down(no_decomposition_levels - r);

    let precinct_size = coding.precinct_size(r);
    let ppx = precinct_size.width_exponent();
    let ppy = precinct_size.height_exponent();

    let (precincts_wide, precincts_high) = precinct_grid(tile_component, coding, r);

    // B.7: xcb' = min(xcb, PPx - 1) above resolution level 0.
    let shrink = if r == 0 { 0 } else { 1 };
    let code_block_width_exponent = coding.code_block_width_exponent().min(ppx - shrink);
    let code_block_height_exponent = coding.code_block_height_exponent().min(ppy - shrink);

    let subbands = SubbandKind::for_resolution(r)
        .iter()
        .map(|kind| {
            let decomposition_level = if r == 0 {
                no_decomposition_levels
            } else {
                no_decomposition_levels - r + 1
            };
            let (xob, yob) = kind.offsets();
            let half = |n: u8| if n == 0 { 0 } else { 1u64 << (n - 1) };
            let offset_x = half(decomposition_level) * xob;
            let offset_y = half(decomposition_level) * yob;
            Subband {
                kind: *kind,
                decomposition_level,
                rect: Rect {
                    x0: ceil_shift_signed(tile_component.x0, offset_x, decomposition_level),
                    y0: ceil_shift_signed(tile_component.y0, offset_y, decomposition_level),
                    x1: ceil_shift_signed(tile_component.x1, offset_x, decomposition_level),
                    y1: ceil_shift_signed(tile_component.y1, offset_y, decomposition_level),
                },
                code_block_width_exponent,
                code_block_height_exponent,
            }
        })
        .collect();

    let precincts = (0..precincts_wide * precincts_high)
        .map(|p| Precinct {
            index: p,
            in_class_id: in_class_id(0, 1, c, no_components, precinct_base + p as u64),
            state: None,
        })
        .collect();

    ResolutionLevel {
        resolution: r,
        rect,
        precinct_width_exponent: ppx,
        precinct_height_exponent: ppy,
        precinct_origin_x: rect.x0 >> ppx,
        precinct_origin_y: rect.y0 >> ppy,
        precincts_wide,
        precincts_high,
        code_block_width_exponent,
        code_block_height_exponent,
        subbands,
        precinct_base,
        precincts,
    }
}
