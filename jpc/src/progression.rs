//! Precinct visiting order of the five progression orders (B.12).

use std::collections::HashSet;
use std::ops::ControlFlow;

use log::debug;

use crate::parameters::ProgressionOrder;
use crate::target::{Component, Rect, Tile};

/// One visit of a precinct and the layers read at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrecinctVisit {
    pub component: u16,
    pub resolution: u8,
    pub precinct: u32,
    pub in_class_id: u64,
    pub first_layer: u16,
    pub layer_count: u16,
}

/// Walks the precincts of a tile in a progression order.
///
/// LRCP and RLCP visit a precinct once per layer. RPCL, PCRL and CPRL
/// visit a precinct once and read all of its layers at that visit.
#[derive(Debug, Clone)]
pub struct Traversal<'t> {
    tile: &'t Tile,
    order: ProgressionOrder,
    layer_limit: u16,
    region: Option<Rect>,
    discard_levels: u8,
    components: Option<Vec<u16>>,
}

impl<'t> Traversal<'t> {
    pub fn new(tile: &'t Tile) -> Self {
        Traversal {
            tile,
            order: tile.progression_order(),
            layer_limit: tile.no_layers(),
            region: None,
            discard_levels: 0,
            components: None,
        }
    }

    pub fn order(mut self, order: ProgressionOrder) -> Self {
        self.order = order;
        self
    }

    /// Visits layers below `layers` only.
    pub fn layers(mut self, layers: u16) -> Self {
        self.layer_limit = layers.min(self.tile.no_layers());
        self
    }

    /// Visits only precincts overlapping `region` on the reference grid.
    pub fn region(mut self, region: Rect) -> Self {
        self.region = Some(region);
        self
    }

    /// Skips the `levels` highest resolution levels of every component.
    pub fn discard_levels(mut self, levels: u8) -> Self {
        self.discard_levels = levels;
        self
    }

    pub fn components(mut self, components: Vec<u16>) -> Self {
        self.components = Some(components);
        self
    }

    /// Calls `visitor` for every visit in order until it breaks.
    pub fn visit<B, F>(&self, mut visitor: F) -> ControlFlow<B>
    where
        F: FnMut(&PrecinctVisit) -> ControlFlow<B>,
    {
        if self.layer_limit == 0 {
            return ControlFlow::Continue(());
        }
        debug!(
            "{} traversal of {} layers, {} discarded levels, region {:?}",
            self.order, self.layer_limit, self.discard_levels, self.region
        );

        match self.order {
            ProgressionOrder::Lrcp => {
                for layer in 0..self.layer_limit {
                    for r in 0..self.max_resolution_levels() {
                        self.visit_components_at(r, layer, 1, &mut visitor)?;
                    }
                }
            }
            ProgressionOrder::Rlcp => {
                for r in 0..self.max_resolution_levels() {
                    for layer in 0..self.layer_limit {
                        self.visit_components_at(r, layer, 1, &mut visitor)?;
                    }
                }
            }
            ProgressionOrder::Rpcl => {
                for r in 0..self.max_resolution_levels() {
                    let no_precincts = self
                        .selected_components()
                        .filter_map(|component| component.resolution(r))
                        .map(|level| level.no_precincts())
                        .max()
                        .unwrap_or(0);
                    for p in 0..no_precincts {
                        for component in self.selected_components() {
                            self.visit_precinct(component, r, p, 0, self.layer_limit, &mut visitor)?;
                        }
                    }
                }
            }
            ProgressionOrder::Pcrl => {
                let mut visited = HashSet::new();
                let (wide, high) = self.tile.reference_precincts();
                for py in 0..high {
                    for px in 0..wide {
                        for component in self.selected_components() {
                            for r in 0..self.resolution_levels(component) {
                                self.visit_corresponding(component, r, px, py, &mut visited, &mut visitor)?;
                            }
                        }
                    }
                }
                self.visit_remaining(&visited, &mut visitor)?;
            }
            ProgressionOrder::Cprl => {
                let mut visited = HashSet::new();
                let (wide, high) = self.tile.reference_precincts();
                for component in self.selected_components() {
                    for py in 0..high {
                        for px in 0..wide {
                            for r in 0..self.resolution_levels(component) {
                                self.visit_corresponding(component, r, px, py, &mut visited, &mut visitor)?;
                            }
                        }
                    }
                }
                self.visit_remaining(&visited, &mut visitor)?;
            }
        }

        ControlFlow::Continue(())
    }

    /// Every visit in order.
    pub fn visits(&self) -> Vec<PrecinctVisit> {
        let mut visits = Vec::new();
        let _ = self.visit(|visit| {
            visits.push(*visit);
            ControlFlow::<()>::Continue(())
        });
        visits
    }

    fn selected_components(&self) -> impl Iterator<Item = &'t Component> + '_ {
        self.tile.components().iter().filter(move |component| {
            self.components
                .as_ref()
                .map_or(true, |selected| selected.contains(&component.index()))
        })
    }

    fn resolution_levels(&self, component: &Component) -> u8 {
        component
            .no_decomposition_levels()
            .saturating_sub(self.discard_levels)
            + 1
    }

    // Largest over all components, whose level counts may differ.
    fn max_resolution_levels(&self) -> u8 {
        self.selected_components()
            .map(|component| self.resolution_levels(component))
            .max()
            .unwrap_or(0)
    }

    fn is_selected(&self, component: &Component, r: u8, p: u32) -> bool {
        if r >= self.resolution_levels(component) {
            return false;
        }
        match self.region {
            None => true,
            Some(region) => self
                .tile
                .precinct_reference_rect(component.index(), r, p)
                .map(|rect| rect.intersects(&region))
                .unwrap_or(false),
        }
    }

    fn visit_components_at<B, F>(
        &self,
        r: u8,
        layer: u16,
        layer_count: u16,
        visitor: &mut F,
    ) -> ControlFlow<B>
    where
        F: FnMut(&PrecinctVisit) -> ControlFlow<B>,
    {
        for component in self.selected_components() {
            let Some(level) = component.resolution(r) else {
                continue;
            };
            for p in 0..level.no_precincts() {
                self.visit_precinct(component, r, p, layer, layer_count, visitor)?;
            }
        }
        ControlFlow::Continue(())
    }

    fn visit_precinct<B, F>(
        &self,
        component: &Component,
        r: u8,
        p: u32,
        first_layer: u16,
        layer_count: u16,
        visitor: &mut F,
    ) -> ControlFlow<B>
    where
        F: FnMut(&PrecinctVisit) -> ControlFlow<B>,
    {
        let Some(precinct) = component
            .resolution(r)
            .and_then(|level| level.precincts().get(p as usize))
        else {
            return ControlFlow::Continue(());
        };
        if !self.is_selected(component, r, p) {
            return ControlFlow::Continue(());
        }

        visitor(&PrecinctVisit {
            component: component.index(),
            resolution: r,
            precinct: p,
            in_class_id: precinct.in_class_id(),
            first_layer,
            layer_count,
        })
    }

    fn visit_corresponding<B, F>(
        &self,
        component: &Component,
        r: u8,
        px: u32,
        py: u32,
        visited: &mut HashSet<u64>,
        visitor: &mut F,
    ) -> ControlFlow<B>
    where
        F: FnMut(&PrecinctVisit) -> ControlFlow<B>,
    {
        let Some(p) = self.tile.corresponding_precinct(component.index(), r, px, py) else {
            return ControlFlow::Continue(());
        };
        let Some(precinct) = component
            .resolution(r)
            .and_then(|level| level.precincts().get(p as usize))
        else {
            return ControlFlow::Continue(());
        };
        if !visited.insert(precinct.in_class_id()) {
            return ControlFlow::Continue(());
        }
        self.visit_precinct(component, r, p, 0, self.layer_limit, visitor)
    }

    // Precincts of levels whose grid is not a power-of-two fraction of the
    // reference grid are not reached by every correspondence.
    fn visit_remaining<B, F>(&self, visited: &HashSet<u64>, visitor: &mut F) -> ControlFlow<B>
    where
        F: FnMut(&PrecinctVisit) -> ControlFlow<B>,
    {
        for component in self.selected_components() {
            for r in 0..self.resolution_levels(component) {
                let Some(level) = component.resolution(r) else {
                    continue;
                };
                for precinct in level.precincts() {
                    if visited.contains(&precinct.in_class_id()) {
                        continue;
                    }
                    debug!(
                        "precinct {} of component {} level {} not reached by correspondence",
                        precinct.index(),
                        component.index(),
                        r
                    );
                    self.visit_precinct(component, r, precinct.index(), 0, self.layer_limit, visitor)?;
                }
            }
        }
        ControlFlow::Continue(())
    }
}
