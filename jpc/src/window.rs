//! View windows of JPIP requests (ISO/IEC 15444-9 C.4): frame size, region
//! offset and size, components and layers, mapped to the precincts needed to
//! answer them.

use std::collections::HashSet;

use log::debug;

use crate::progression::Traversal;
use crate::target::{ceil_shift, Rect, Tile};

/// How a requested frame size is matched to an available resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Round {
    /// The largest frame that fits within the requested size.
    #[default]
    Down,
    /// The smallest frame that covers the requested size.
    Up,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewWindow {
    /// fsiz
    pub frame_size: (u32, u32),
    /// roff, in frame coordinates.
    pub offset: (u32, u32),
    /// rsiz, in frame coordinates; the rest of the frame when absent.
    pub size: Option<(u32, u32)>,
    pub components: Option<Vec<u16>>,
    pub layers: Option<u16>,
    pub round: Round,
}

impl ViewWindow {
    pub fn new(width: u32, height: u32) -> Self {
        ViewWindow {
            frame_size: (width, height),
            offset: (0, 0),
            size: None,
            components: None,
            layers: None,
            round: Round::Down,
        }
    }

    /// Number of highest resolution levels not needed for the frame size.
    pub fn discard_levels(&self, tile: &Tile) -> u8 {
        let image = tile.rect();
        let max_discard = tile.max_resolution_levels().saturating_sub(1);
        let (width, height) = self.frame_size;

        match self.round {
            Round::Down => (0..=max_discard)
                .find(|&d| {
                    let frame = image.shift_down(d);
                    frame.width() <= width && frame.height() <= height
                })
                .unwrap_or(max_discard),
            Round::Up => (0..=max_discard)
                .rev()
                .find(|&d| {
                    let frame = image.shift_down(d);
                    frame.width() >= width && frame.height() >= height
                })
                .unwrap_or(0),
        }
    }

    /// The requested region on the reference grid.
    pub fn region(&self, tile: &Tile) -> Rect {
        let image = tile.rect();
        let d = self.discard_levels(tile);
        let frame = image.shift_down(d);

        let up = |value: u64| (value << d).min(u32::MAX as u64) as u32;
        let x0 = frame.x0 as u64 + self.offset.0 as u64;
        let y0 = frame.y0 as u64 + self.offset.1 as u64;
        let (x1, y1) = match self.size {
            Some((width, height)) => (x0 + width as u64, y0 + height as u64),
            None => (frame.x1 as u64, frame.y1 as u64),
        };

        Rect::new(up(x0), up(y0), up(x1), up(y1)).intersection(&image)
    }
}

/// In-class identifiers of the precincts a view window needs, in the
/// tile's progression order.
pub fn relevant_precincts(tile: &Tile, window: &ViewWindow) -> Vec<u64> {
    let discard_levels = window.discard_levels(tile);
    let region = window.region(tile);
    debug!(
        "view window {:?}: {} discarded levels, reference region {}",
        window, discard_levels, region
    );
    if region.is_empty() {
        return Vec::new();
    }

    let mut traversal = Traversal::new(tile)
        .discard_levels(discard_levels)
        .region(region);
    if let Some(layers) = window.layers {
        traversal = traversal.layers(layers);
    }
    if let Some(components) = &window.components {
        traversal = traversal.components(components.clone());
    }

    let mut seen = HashSet::new();
    traversal
        .visits()
        .into_iter()
        .map(|visit| visit.in_class_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Frame size of the image at `discard_levels`.
pub fn frame_size(tile: &Tile, discard_levels: u8) -> (u32, u32) {
    let image = tile.rect();
    (
        ceil_shift(image.x1, discard_levels) - ceil_shift(image.x0, discard_levels),
        ceil_shift(image.y1, discard_levels) - ceil_shift(image.y0, discard_levels),
    )
}
