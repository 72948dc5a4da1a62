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

// The central-body surface engine. Each frame, `Surface::update` selects a
// level-of-detail cut through the tile quadtree, advances tile and imagery
// loading inside a fixed time budget, applies any imagery layer list
// mutations to resident tiles, and emits draw commands for the selected
// tiles.
mod draw;
mod pump;
mod select;

pub mod imagery;
pub mod provider;
pub mod render;
pub mod tile;

use crate::{
    imagery::{ImageryLayer, ImageryLayerCollection, LayerChange, LayerId, TileImagery},
    provider::{TerrainProvider, TerrainReceiver, TerrainSender},
    render::{Context, DrawCommand, GlobeUniforms, RenderState, ShaderSet},
    tile::{
        load_queue::TileLoadQueue, replacement_queue::TileReplacementQueue, Tile, TileArena,
        TileId,
    },
};
use anyhow::{ensure, Result};
use crossbeam::channel::unbounded;
use geom::{
    BoundingSphere, Cartographic, CullingVolume, Ellipsoid, EllipsoidalOccluder, MapProjection,
};
use log::debug;
use nalgebra::{Matrix4, Point3, Vector3};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SceneMode {
    Scene3D,
    Scene2D,
    ColumbusView,
    Morphing,
}

// Everything the engine needs to know about the camera and output surface
// for one frame. The culling volume lives in world space in 3D and in
// projected space in 2D and Columbus View.
#[derive(Clone, Debug)]
pub struct FrameState {
    pub mode: SceneMode,
    pub frame_number: u64,
    pub camera_position: Point3<f64>,
    pub camera_position_cartographic: Cartographic,
    pub culling_volume: CullingVolume,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub fovy: f64,
    // Orthographic frustum plane dimensions, used for the 2D pixel-size
    // error metric. Zero outside 2D.
    pub frustum_width: f64,
    pub frustum_height: f64,
    pub view_matrix: Matrix4<f64>,
    pub projection_matrix: Matrix4<f64>,
}

impl FrameState {
    // A ready-made 3D perspective frame looking along `direction`.
    #[allow(clippy::too_many_arguments)]
    pub fn perspective_3d(
        ellipsoid: &Ellipsoid,
        camera_position: Point3<f64>,
        direction: Vector3<f64>,
        up: Vector3<f64>,
        fovy: f64,
        viewport_width: u32,
        viewport_height: u32,
        frame_number: u64,
    ) -> Self {
        let near = 1_f64;
        let far = 1e9_f64;
        let aspect = viewport_width as f64 / viewport_height as f64;
        let target = camera_position + direction;
        Self {
            mode: SceneMode::Scene3D,
            frame_number,
            camera_position,
            camera_position_cartographic: ellipsoid.cartesian_to_cartographic(&camera_position),
            culling_volume: CullingVolume::from_perspective(
                &camera_position,
                &direction,
                &up,
                fovy,
                aspect,
                near,
                far,
            ),
            viewport_width,
            viewport_height,
            fovy,
            frustum_width: 0_f64,
            frustum_height: 0_f64,
            view_matrix: Matrix4::look_at_rh(&camera_position, &target, &up),
            projection_matrix: Matrix4::new_perspective(aspect, fovy, near, far),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub tiles_visited: usize,
    pub tiles_rendered: usize,
    pub tiles_culled: usize,
    pub tiles_waiting_for_children: usize,
    pub textures_rendered: usize,
    pub max_depth: u32,
    pub load_queue_length: usize,
    pub resident_tiles: usize,
    pub commands_emitted: usize,
}

pub struct SurfaceOptions {
    pub terrain_provider: Box<dyn TerrainProvider>,
    pub imagery_layers: ImageryLayerCollection,
    pub ellipsoid: Ellipsoid,
    pub max_screen_space_error: f64,
    pub tile_cache_floor: usize,
    pub load_budget: Duration,
}

impl SurfaceOptions {
    pub fn new(
        terrain_provider: Box<dyn TerrainProvider>,
        imagery_layers: ImageryLayerCollection,
    ) -> Self {
        Self {
            terrain_provider,
            imagery_layers,
            ellipsoid: Ellipsoid::wgs84(),
            max_screen_space_error: 2_f64,
            tile_cache_floor: 100,
            load_budget: Duration::from_millis(10),
        }
    }
}

// The engine owns its terrain provider and imagery layer collection;
// dropping the surface releases exactly those. The rendering context and
// shader set are borrowed per update and never retained.
pub struct Surface {
    pub(crate) terrain_provider: Box<dyn TerrainProvider>,
    pub(crate) layers: ImageryLayerCollection,
    pub(crate) ellipsoid: Ellipsoid,
    pub(crate) occluder: EllipsoidalOccluder,

    pub(crate) tiles: TileArena,
    pub(crate) roots: Vec<TileId>,
    pub(crate) load_queue: TileLoadQueue,
    pub(crate) replacement_queue: TileReplacementQueue,
    pub(crate) traversal_queue: VecDeque<TileId>,
    pub(crate) render_buckets: Vec<Vec<TileId>>,

    pub(crate) terrain_sender: TerrainSender,
    pub(crate) terrain_receiver: TerrainReceiver,

    pub(crate) max_screen_space_error: f64,
    pub(crate) tile_cache_floor: usize,
    pub(crate) load_budget: Duration,

    pub(crate) suspend_lod_update: bool,
    pub(crate) debug_wireframe: bool,
    pub(crate) stats: FrameStats,

    // Pooled commands, reused frame to frame and truncated to what was
    // actually written so no stale entry pins a dead texture.
    pub(crate) tile_commands: Vec<DrawCommand>,
}

impl Surface {
    pub fn new(options: SurfaceOptions) -> Result<Self> {
        ensure!(
            options.max_screen_space_error > 0_f64,
            "max screen space error must be positive"
        );
        let scheme = options.terrain_provider.tiling_scheme();
        ensure!(
            scheme.number_of_level_zero_tiles_x() > 0 && scheme.number_of_level_zero_tiles_y() > 0,
            "terrain tiling scheme has no level-zero tiles"
        );
        let (terrain_sender, terrain_receiver) = unbounded();
        let occluder = EllipsoidalOccluder::new(&options.ellipsoid);
        Ok(Self {
            terrain_provider: options.terrain_provider,
            layers: options.imagery_layers,
            ellipsoid: options.ellipsoid,
            occluder,
            tiles: TileArena::new(),
            roots: Vec::new(),
            load_queue: TileLoadQueue::new(),
            replacement_queue: TileReplacementQueue::new(),
            traversal_queue: VecDeque::new(),
            render_buckets: Vec::new(),
            terrain_sender,
            terrain_receiver,
            max_screen_space_error: options.max_screen_space_error,
            tile_cache_floor: options.tile_cache_floor,
            load_budget: options.load_budget,
            suspend_lod_update: false,
            debug_wireframe: false,
            stats: FrameStats::default(),
            tile_commands: Vec::new(),
        })
    }

    // One frame: select, pump loads, apply layer mutations, emit commands.
    // Tiles that became renderable during this frame's pump are picked up
    // by the next frame's selection.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        ctx: &mut dyn Context,
        frame: &FrameState,
        projection: &dyn MapProjection,
        shader_set: &mut dyn ShaderSet,
        render_state: &RenderState,
        globe_uniforms: &GlobeUniforms,
        commands: &mut Vec<DrawCommand>,
    ) {
        if !self.suspend_lod_update {
            self.select_tiles_for_rendering(frame, projection);
        }
        self.process_tile_load_queue(ctx);
        self.apply_layer_changes();
        self.assemble_commands(
            ctx,
            frame,
            projection,
            shader_set,
            render_state,
            globe_uniforms,
            commands,
        );
    }

    pub fn layers(&self) -> &ImageryLayerCollection {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut ImageryLayerCollection {
        &mut self.layers
    }

    pub fn terrain_provider(&self) -> &dyn TerrainProvider {
        &*self.terrain_provider
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn roots(&self) -> &[TileId] {
        &self.roots
    }

    pub fn tile(&self, id: TileId) -> &Tile {
        self.tiles.get(id)
    }

    pub fn load_queue_length(&self) -> usize {
        self.load_queue.len()
    }

    pub fn load_queue_tiles(&self) -> Vec<TileId> {
        let mut out = Vec::with_capacity(self.load_queue.len());
        let mut cursor = self.load_queue.head();
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.tiles.get(id).load_next;
        }
        out
    }

    pub fn resident_tile_count(&self) -> usize {
        self.replacement_queue.len()
    }

    pub fn resident_tiles(&self) -> Vec<TileId> {
        self.replacement_queue.collect_ids(&self.tiles)
    }

    pub fn render_bucket_count(&self) -> usize {
        self.render_buckets.len()
    }

    pub fn render_bucket(&self, texture_count: usize) -> &[TileId] {
        static EMPTY: [TileId; 0] = [];
        self.render_buckets
            .get(texture_count)
            .map(|bucket| bucket.as_slice())
            .unwrap_or(&EMPTY)
    }

    pub fn rendered_tiles(&self) -> impl Iterator<Item = TileId> + '_ {
        self.render_buckets.iter().flatten().copied()
    }

    // Debug: freeze selection, keep drawing the last cut.
    pub fn toggle_lod_update(&mut self) {
        self.suspend_lod_update = !self.suspend_lod_update;
        debug!("lod update suspended: {}", self.suspend_lod_update);
    }

    pub fn lod_update_suspended(&self) -> bool {
        self.suspend_lod_update
    }

    pub fn set_wireframe(&mut self, wireframe: bool) {
        self.debug_wireframe = wireframe;
    }

    // Debug: the bounding sphere of the rendered tile containing the picked
    // position, if any.
    pub fn debug_bounding_sphere_at(&self, pick: &Cartographic) -> Option<BoundingSphere> {
        for id in self.rendered_tiles() {
            let tile = self.tiles.get(id);
            if tile.rectangle.contains(pick) {
                return Some(tile.bounding_sphere_3d);
            }
        }
        None
    }

    fn apply_layer_changes(&mut self) {
        for change in self.layers.drain_changes() {
            match change {
                LayerChange::Added { layer, .. } => self.on_layer_added(layer),
                LayerChange::Removed { layer } => self.on_layer_removed(layer),
                LayerChange::Moved { layer, .. } => self.on_layer_moved(layer),
            }
        }
    }

    // Give the new layer a block on every resident tile, then slot that
    // block into stack order to match the collection. Tiles that started
    // loading after the layer entered the collection already have its block
    // in the right position and are left alone.
    fn on_layer_added(&mut self, layer_id: LayerId) {
        let next = self.layers.layer_after(layer_id);
        for id in self.replacement_queue.collect_ids(&self.tiles) {
            let Some(layer) = self.layers.get_mut(layer_id) else {
                return;
            };
            let tile = self.tiles.get_mut(id);
            if tile.imagery.iter().any(|entry| entry.layer == layer_id) {
                continue;
            }
            let created =
                layer.create_tile_imagery_skeletons(tile, &*self.terrain_provider, None);
            if created {
                tile.done_loading = false;
            }
            if next.is_some() {
                move_layer_block(tile, layer_id, next);
            }
        }
    }

    fn on_layer_removed(&mut self, mut removed: ImageryLayer) {
        let layer_id = removed.id();
        for id in self.replacement_queue.collect_ids(&self.tiles) {
            let tile = self.tiles.get_mut(id);
            let mut index = 0;
            while index < tile.imagery.len() {
                if tile.imagery[index].layer != layer_id {
                    index += 1;
                    continue;
                }
                let entry = tile.imagery.remove(index);
                removed.pool_mut().release_reference(entry.imagery);
                if let Some(original) = entry.original_imagery {
                    removed.pool_mut().release_reference(original);
                }
            }
            if tile.imagery.is_empty() {
                tile.renderable = false;
            }
        }
    }

    fn on_layer_moved(&mut self, layer_id: LayerId) {
        let next = self.layers.layer_after(layer_id);
        for id in self.replacement_queue.collect_ids(&self.tiles) {
            move_layer_block(self.tiles.get_mut(id), layer_id, next);
        }
    }
}

// Splice the contiguous block belonging to `layer` to just before the block
// belonging to `before` (or to the end of the stack).
fn move_layer_block(tile: &mut Tile, layer: LayerId, before: Option<LayerId>) {
    let Some(start) = tile.imagery.iter().position(|entry| entry.layer == layer) else {
        return;
    };
    let length = tile.imagery[start..]
        .iter()
        .take_while(|entry| entry.layer == layer)
        .count();
    let block: Vec<TileImagery> = tile.imagery.drain(start..start + length).collect();
    let insert_at = match before {
        Some(before) => tile
            .imagery
            .iter()
            .position(|entry| entry.layer == before)
            .unwrap_or(tile.imagery.len()),
        None => tile.imagery.len(),
    };
    tile.imagery.splice(insert_at..insert_at, block);
}
