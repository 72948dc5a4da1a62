// This file is part of Oblate.
//
// Oblate is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Oblate is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Oblate.  If not, see <http://www.gnu.org/licenses/>.

// The load pump: drains provider reply inboxes, then walks the load queue
// advancing terrain and imagery state machines until the wall-clock budget
// runs out. Providers never mutate engine state directly; every async
// completion arrives here and is validated against the slot it was issued
// for before it is applied.
use crate::{
    imagery::{ImageryLayer, ImageryState},
    provider::TerrainReply,
    render::Context,
    tile::{TerrainState, TileId},
    Surface,
};
use log::{trace, warn};
use std::time::Instant;

impl Surface {
    pub(crate) fn process_tile_load_queue(&mut self, ctx: &mut dyn Context) {
        self.drain_terrain_inbox();
        for layer in self.layers.iter_mut() {
            layer.drain_inbox();
        }

        if self.load_queue.is_empty() {
            return;
        }
        let deadline = Instant::now() + self.load_budget;

        let mut cursor = self.load_queue.head();
        while let Some(id) = cursor {
            if Instant::now() >= deadline {
                break;
            }
            let next = self.tiles.get(id).load_next;
            self.process_tile(ctx, id, deadline);
            // Processing can evict carryover tiles (cache trim); if the
            // captured successor was swept up, finish next frame.
            cursor = match next {
                Some(next)
                    if self.tiles.is_occupied(next)
                        && self.load_queue.contains(&self.tiles, next) =>
                {
                    Some(next)
                }
                _ => None,
            };
        }
    }

    fn drain_terrain_inbox(&mut self) {
        while let Ok(envelope) = self.terrain_receiver.try_recv() {
            if !self.tiles.matches(envelope.tile, &envelope.key) {
                trace!("dropping stale terrain reply for {:?}", envelope.key);
                continue;
            }
            let tile = self.tiles.get_mut(envelope.tile);
            if tile.terrain_state != TerrainState::Transitioning {
                trace!(
                    "dropping terrain reply for {:?} in state {:?}",
                    envelope.key,
                    tile.terrain_state
                );
                continue;
            }
            match envelope.reply {
                TerrainReply::Geometry(geometry) => {
                    tile.geometry = Some(geometry);
                    tile.terrain_state = TerrainState::Received;
                }
                TerrainReply::Mesh(mesh) => {
                    tile.min_height = mesh.min_height;
                    tile.max_height = mesh.max_height;
                    tile.mesh = Some(mesh);
                    tile.terrain_state = TerrainState::Transformed;
                    tile.recompute_bounds(&self.ellipsoid, &self.occluder);
                }
                TerrainReply::Failed => {
                    tile.terrain_state = TerrainState::Failed;
                    if !tile.terrain_failure_logged {
                        tile.terrain_failure_logged = true;
                        warn!(
                            "terrain failed for tile L{} ({}, {}); tile will not render",
                            envelope.key.level, envelope.key.x, envelope.key.y
                        );
                    }
                }
            }
        }
    }

    fn process_tile(&mut self, ctx: &mut dyn Context, id: TileId, deadline: Instant) {
        self.process_terrain_state(ctx, id);
        let finished_imagery = self.process_imagery_states(ctx, id, deadline);

        // Done-ness is only decided on a pass that saw every entry.
        let Some((all_terminal, any_ready)) = finished_imagery else {
            return;
        };
        let tile = self.tiles.get_mut(id);
        let terrain_ready = tile.terrain_state == TerrainState::Ready;
        tile.renderable = terrain_ready && (tile.imagery.is_empty() || any_ready);
        if terrain_ready && all_terminal {
            tile.done_loading = true;
            self.load_queue.remove(&mut self.tiles, id);
        }
    }

    // At most one terrain transition per tile per frame keeps per-frame
    // work bounded; async steps park the tile in Transitioning until their
    // reply lands in the inbox.
    fn process_terrain_state(&mut self, ctx: &mut dyn Context, id: TileId) {
        match self.tiles.get(id).terrain_state {
            TerrainState::Unloaded => {
                let key = {
                    let tile = self.tiles.get_mut(id);
                    tile.terrain_state = TerrainState::Transitioning;
                    tile.key
                };
                self.terrain_provider
                    .request_tile_geometry(id, key, &self.terrain_sender);

                // The tile now holds resources: it becomes resident, the
                // cache gets trimmed, and every layer lays down skeletons.
                self.replacement_queue
                    .mark_tile_rendered(&mut self.tiles, id);
                self.replacement_queue.trim_tiles(
                    &mut self.tiles,
                    &mut self.layers,
                    &mut self.load_queue,
                    self.tile_cache_floor,
                );
                let Self {
                    tiles,
                    layers,
                    terrain_provider,
                    ..
                } = self;
                let tile = tiles.get_mut(id);
                for layer in layers.iter_mut() {
                    layer.create_tile_imagery_skeletons(tile, &**terrain_provider, None);
                }
            }
            TerrainState::Received => {
                let (key, geometry) = {
                    let tile = self.tiles.get_mut(id);
                    tile.terrain_state = TerrainState::Transitioning;
                    let Some(geometry) = tile.geometry.take() else {
                        tile.terrain_state = TerrainState::Failed;
                        return;
                    };
                    (tile.key, geometry)
                };
                self.terrain_provider
                    .transform_geometry(ctx, id, key, geometry, &self.terrain_sender);
            }
            TerrainState::Transformed => {
                let Self {
                    tiles,
                    terrain_provider,
                    ..
                } = self;
                let tile = tiles.get_mut(id);
                let key = tile.key;
                let Some(mesh) = tile.mesh.as_ref() else {
                    tile.terrain_state = TerrainState::Failed;
                    return;
                };
                match terrain_provider.create_resources(ctx, key, mesh) {
                    Ok(vertex_array) => {
                        tile.vertex_array = Some(vertex_array);
                        tile.terrain_state = TerrainState::Ready;
                    }
                    Err(err) => {
                        warn!(
                            "vertex array creation failed for tile L{} ({}, {}): {err:#}",
                            key.level, key.x, key.y
                        );
                        tile.terrain_state = TerrainState::Failed;
                    }
                }
            }
            TerrainState::Transitioning | TerrainState::Ready | TerrainState::Failed => {}
        }
    }

    // Walk the imagery stack advancing each entry one step. Returns None on
    // budget exhaustion, otherwise (all entries terminal, any entry ready).
    fn process_imagery_states(
        &mut self,
        ctx: &mut dyn Context,
        id: TileId,
        deadline: Instant,
    ) -> Option<(bool, bool)> {
        let mut all_terminal = true;
        let mut any_ready = false;

        let mut index = 0;
        while index < self.tiles.get(id).imagery.len() {
            if Instant::now() >= deadline {
                return None;
            }
            let (layer_id, imagery_id) = {
                let entry = &self.tiles.get(id).imagery[index];
                (entry.layer, entry.imagery)
            };
            let Some(layer) = self.layers.get(layer_id) else {
                index += 1;
                continue;
            };
            let state = layer.pool().get(imagery_id).state();

            match state {
                ImageryState::Placeholder => {
                    if layer.provider_ready() {
                        // The provider came up: replace the placeholder with
                        // real skeletons at the same stack position and
                        // reprocess this index.
                        let entry = self.tiles.get_mut(id).imagery.remove(index);
                        self.layers.release_tile_imagery(&entry);
                        let Self {
                            tiles,
                            layers,
                            terrain_provider,
                            ..
                        } = self;
                        if let Some(layer) = layers.get_mut(layer_id) {
                            layer.create_tile_imagery_skeletons(
                                tiles.get_mut(id),
                                &**terrain_provider,
                                Some(index),
                            );
                        }
                        continue;
                    }
                    all_terminal = false;
                }
                ImageryState::Unloaded => {
                    if let Some(layer) = self.layers.get_mut(layer_id) {
                        layer.request_imagery(imagery_id);
                    }
                    all_terminal = false;
                }
                ImageryState::Received => {
                    if let Some(layer) = self.layers.get_mut(layer_id) {
                        layer.create_texture(ctx, imagery_id);
                    }
                    all_terminal = false;
                }
                ImageryState::TextureLoaded => {
                    if let Some(layer) = self.layers.get_mut(layer_id) {
                        layer.reproject_texture(ctx, imagery_id);
                    }
                    all_terminal = false;
                }
                ImageryState::Transitioning => {
                    all_terminal = false;
                }
                ImageryState::Failed | ImageryState::Invalid => {
                    if self.substitute_failed_imagery(id, index) {
                        // A fresh ancestor took over; it may still need to
                        // load.
                        all_terminal = false;
                    }
                    // No usable ancestor: the entry is hopeless and stops
                    // gating done-ness; the tile renders without it.
                }
                ImageryState::Ready => {
                    any_ready = true;
                    self.ensure_translation_and_scale(id, index);
                }
            }
            index += 1;
        }
        Some((all_terminal, any_ready))
    }

    // Walk the ancestor chain for the nearest non-failed imagery and point
    // the entry at it, keeping the failed original referenced. Siblings
    // sharing the ancestor render at reduced texel density, which beats a
    // hole.
    fn substitute_failed_imagery(&mut self, id: TileId, index: usize) -> bool {
        let (layer_id, current, original) = {
            let entry = &self.tiles.get(id).imagery[index];
            (entry.layer, entry.imagery, entry.original_imagery)
        };
        let Some(layer) = self.layers.get(layer_id) else {
            return false;
        };
        let mut cursor = layer.pool().get(current).parent();
        while let Some(candidate) = cursor {
            let imagery = layer.pool().get(candidate);
            if !matches!(
                imagery.state(),
                ImageryState::Failed | ImageryState::Invalid
            ) {
                break;
            }
            cursor = imagery.parent();
        }
        let Some(ancestor) = cursor else {
            return false;
        };

        let Some(layer) = self.layers.get_mut(layer_id) else {
            return false;
        };
        layer.pool_mut().add_reference(ancestor);
        if original.is_some() {
            // The current imagery was itself a substitute; drop it.
            layer.pool_mut().release_reference(current);
        }
        let entry = &mut self.tiles.get_mut(id).imagery[index];
        if entry.original_imagery.is_none() {
            entry.original_imagery = Some(current);
        }
        entry.imagery = ancestor;
        entry.translation_and_scale = None;
        true
    }

    fn ensure_translation_and_scale(&mut self, id: TileId, index: usize) {
        let (layer_id, imagery_id, missing) = {
            let entry = &self.tiles.get(id).imagery[index];
            (entry.layer, entry.imagery, entry.translation_and_scale.is_none())
        };
        if !missing {
            return;
        }
        let Some(layer) = self.layers.get(layer_id) else {
            return;
        };
        let imagery_rectangle = *layer.pool().get(imagery_id).rectangle();
        let tile_rectangle = self.tiles.get(id).rectangle;
        let translation_and_scale = ImageryLayer::calculate_texture_translation_and_scale(
            &tile_rectangle,
            &imagery_rectangle,
        );
        self.tiles.get_mut(id).imagery[index].translation_and_scale =
            Some(translation_and_scale);
    }
}
