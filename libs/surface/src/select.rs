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

// Per-frame tile selection: a breadth-first cut through the quadtree gated
// by screen-space error. Breadth-first order loads the big cheap tiles
// first and keeps detail even across the scene; a tile only refines when
// all four children can be rendered, so the cut never shows seams.
use crate::{
    imagery::ImageryState,
    tile::{Tile, TileId, TileKey},
    FrameState, FrameStats, SceneMode, Surface,
};
use geom::{BoundingSphere, Cartographic, MapProjection, Visibility};
use log::trace;
use nalgebra::Point3;

impl Surface {
    pub(crate) fn select_tiles_for_rendering(
        &mut self,
        frame: &FrameState,
        projection: &dyn MapProjection,
    ) {
        self.stats = FrameStats::default();
        for bucket in &mut self.render_buckets {
            bucket.clear();
        }

        if !self.terrain_provider.ready() {
            return;
        }
        if self.roots.is_empty() {
            self.create_level_zero_tiles();
        }

        self.load_queue.mark_insertion_point();
        self.replacement_queue
            .mark_start_of_render_frame(frame.frame_number);
        self.occluder.set_camera_position(&frame.camera_position);

        self.traversal_queue.clear();
        for index in 0..self.roots.len() {
            let root = self.roots[index];
            if !self.tiles.get(root).done_loading {
                self.load_queue
                    .insert_before_insertion_point(&mut self.tiles, root);
            }
            if self.tiles.get(root).renderable && self.tile_visible(root, frame, projection) {
                self.traversal_queue.push_back(root);
            } else {
                self.stats.tiles_culled += 1;
            }
        }

        while let Some(id) = self.traversal_queue.pop_front() {
            self.stats.tiles_visited += 1;
            self.replacement_queue
                .mark_tile_rendered(&mut self.tiles, id);
            let level = self.tiles.get(id).key.level;
            self.stats.max_depth = self.stats.max_depth.max(level);

            if self.screen_space_error(id, frame, projection) < self.max_screen_space_error {
                // Good enough at this detail.
                self.add_to_render_list(id);
            } else if level >= self.terrain_provider.max_level() {
                self.add_to_render_list(id);
            } else if self.queue_children_and_check_renderable(id) {
                if let Some(children) = self.tiles.get(id).children {
                    for child in children {
                        if self.tile_visible(child, frame, projection) {
                            self.traversal_queue.push_back(child);
                        } else {
                            self.stats.tiles_culled += 1;
                        }
                    }
                }
            } else {
                // Render coarse rather than refine partially.
                self.stats.tiles_waiting_for_children += 1;
                self.add_to_render_list(id);
            }
        }

        self.stats.load_queue_length = self.load_queue.len();
        self.stats.resident_tiles = self.replacement_queue.len();
        trace!(
            "selection: {} rendered, {} culled, {} waiting, depth {}, {} queued for load",
            self.stats.tiles_rendered,
            self.stats.tiles_culled,
            self.stats.tiles_waiting_for_children,
            self.stats.max_depth,
            self.stats.load_queue_length,
        );
    }

    fn create_level_zero_tiles(&mut self) {
        let scheme = self.terrain_provider.tiling_scheme().clone();
        let (tiles_x, tiles_y) = scheme.tiles_at_level(0);
        for y in 0..tiles_y {
            for x in 0..tiles_x {
                let key = TileKey::new(0, x, y);
                let rectangle = scheme.tile_rectangle(&key);
                let tile = Tile::new(key, rectangle, None, &self.ellipsoid, &self.occluder);
                let id = self.tiles.allocate(tile);
                self.roots.push(id);
            }
        }
        trace!("created {} level-zero tiles", self.roots.len());
    }

    // Create children on first refinement attempt, queue any that still
    // need loading, and report whether all four can be rendered now.
    fn queue_children_and_check_renderable(&mut self, id: TileId) -> bool {
        self.ensure_children(id);
        let Some(children) = self.tiles.get(id).children else {
            return false;
        };
        let mut all_renderable = true;
        for child in children {
            if !self.tiles.get(child).done_loading {
                self.load_queue
                    .insert_before_insertion_point(&mut self.tiles, child);
            }
            if !self.tiles.get(child).renderable {
                all_renderable = false;
            }
        }
        all_renderable
    }

    fn ensure_children(&mut self, id: TileId) {
        if self.tiles.get(id).children.is_some() {
            return;
        }
        let parent_key = self.tiles.get(id).key;
        let scheme = self.terrain_provider.tiling_scheme().clone();
        let mut children = Vec::with_capacity(4);
        for index in 0..4 {
            let key = parent_key.child(index);
            let rectangle = scheme.tile_rectangle(&key);
            let child = Tile::new(key, rectangle, Some(id), &self.ellipsoid, &self.occluder);
            children.push(self.tiles.allocate(child));
        }
        self.tiles.get_mut(id).children =
            Some([children[0], children[1], children[2], children[3]]);
    }

    pub(crate) fn tile_visible(
        &self,
        id: TileId,
        frame: &FrameState,
        projection: &dyn MapProjection,
    ) -> bool {
        let tile = self.tiles.get(id);
        match frame.mode {
            SceneMode::Scene3D => {
                if frame.culling_volume.visibility(&tile.bounding_sphere_3d) == Visibility::None {
                    return false;
                }
                match &tile.occludee_point_in_scaled_space {
                    Some(occludee) => self.occluder.is_scaled_space_point_visible(occludee),
                    None => true,
                }
            }
            SceneMode::Scene2D | SceneMode::ColumbusView => {
                let sphere = bounding_sphere_2d(tile, projection);
                frame.culling_volume.visibility(&sphere) != Visibility::None
            }
            SceneMode::Morphing => {
                let sphere = bounding_sphere_2d(tile, projection).union(&tile.bounding_sphere_3d);
                frame.culling_volume.visibility(&sphere) != Visibility::None
            }
        }
    }

    // Projected geometric error in pixels; also stores the camera distance
    // on the tile for the front-to-back command sort.
    pub(crate) fn screen_space_error(
        &mut self,
        id: TileId,
        frame: &FrameState,
        _projection: &dyn MapProjection,
    ) -> f64 {
        let (level, latitude_factor) = {
            let tile = self.tiles.get(id);
            (
                tile.key.level,
                tile.rectangle.closest_latitude_to_equator().cos(),
            )
        };
        let max_geometric_error =
            latitude_factor * self.terrain_provider.level_maximum_geometric_error(level);

        if frame.mode == SceneMode::Scene2D {
            self.tiles.get_mut(id).distance = 0_f64;
            let frustum = frame.frustum_width.max(frame.frustum_height);
            let viewport = frame.viewport_width.max(frame.viewport_height) as f64;
            if frustum <= 0_f64 || viewport <= 0_f64 {
                return max_geometric_error;
            }
            let pixel_size = frustum / viewport;
            return max_geometric_error / pixel_size;
        }

        let distance = self.distance_squared_to_tile(id, frame).sqrt();
        self.tiles.get_mut(id).distance = distance;
        if distance == 0_f64 {
            return f64::INFINITY;
        }
        (max_geometric_error * frame.viewport_height as f64)
            / (2_f64 * distance * (frame.fovy * 0.5).tan())
    }

    // Squared distance from the camera to the slab bounding the tile:
    // positive signed distances to the west-or-east and south-or-north
    // planes, plus the camera height over the tile's ceiling.
    fn distance_squared_to_tile(&self, id: TileId, frame: &FrameState) -> f64 {
        let tile = self.tiles.get(id);
        let from_southwest = frame.camera_position - tile.southwest_corner;
        let from_northeast = frame.camera_position - tile.northeast_corner;

        let to_west = from_southwest.dot(&tile.west_normal);
        let to_south = from_southwest.dot(&tile.south_normal);
        let to_east = from_northeast.dot(&tile.east_normal);
        let to_north = from_northeast.dot(&tile.north_normal);

        let mut result = 0_f64;
        if to_west > 0_f64 {
            result += to_west * to_west;
        } else if to_east > 0_f64 {
            result += to_east * to_east;
        }
        if to_south > 0_f64 {
            result += to_south * to_south;
        } else if to_north > 0_f64 {
            result += to_north * to_north;
        }

        let from_top = frame.camera_position_cartographic.height - tile.max_height;
        if from_top > 0_f64 {
            result += from_top * from_top;
        }
        result
    }

    pub(crate) fn add_to_render_list(&mut self, id: TileId) {
        let ready_count = self.ready_texture_count(id);
        if self.render_buckets.len() <= ready_count {
            self.render_buckets.resize_with(ready_count + 1, Vec::new);
        }
        self.render_buckets[ready_count].push(id);
        self.stats.tiles_rendered += 1;
    }

    pub(crate) fn ready_texture_count(&self, id: TileId) -> usize {
        self.tiles
            .get(id)
            .imagery
            .iter()
            .filter(|entry| {
                self.layers.get(entry.layer).map_or(false, |layer| {
                    layer.pool().get(entry.imagery).state() == ImageryState::Ready
                })
            })
            .count()
    }
}

pub(crate) fn bounding_sphere_2d(tile: &Tile, projection: &dyn MapProjection) -> BoundingSphere {
    let southwest = projection.project(&Cartographic::new(
        tile.rectangle.west,
        tile.rectangle.south,
        0_f64,
    ));
    let northeast = projection.project(&Cartographic::new(
        tile.rectangle.east,
        tile.rectangle.north,
        0_f64,
    ));
    let center = Point3::from((southwest.coords + northeast.coords) * 0.5);
    let radius = (northeast - southwest).magnitude() * 0.5;
    BoundingSphere::from_center_and_radius(&center, radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        imagery::ImageryLayerCollection,
        provider::{
            TerrainEnvelope, TerrainProvider, TerrainReply, TerrainSender, TileGeometry,
            TileMesh, TilingScheme,
        },
        render::{Context, VertexArray, VertexArrayResource},
        Surface, SurfaceOptions,
    };
    use geom::{Ellipsoid, GeographicProjection};
    use nalgebra::Vector3;
    use std::rc::Rc;

    #[derive(Debug)]
    struct UnitVertexArray;

    impl VertexArrayResource for UnitVertexArray {
        fn vertex_count(&self) -> u32 {
            4
        }
        fn index_count(&self) -> u32 {
            6
        }
    }

    #[derive(Debug)]
    struct FlatTerrain {
        scheme: TilingScheme,
    }

    impl TerrainProvider for FlatTerrain {
        fn tiling_scheme(&self) -> &TilingScheme {
            &self.scheme
        }
        fn max_level(&self) -> u32 {
            18
        }
        fn level_maximum_geometric_error(&self, level: u32) -> f64 {
            40_000_f64 / (1 << level) as f64
        }
        fn request_tile_geometry(&mut self, tile: TileId, key: TileKey, reply: &TerrainSender) {
            let _ = reply.send(TerrainEnvelope {
                tile,
                key,
                reply: TerrainReply::Geometry(TileGeometry { data: Vec::new() }),
            });
        }
        fn transform_geometry(
            &mut self,
            _ctx: &mut dyn Context,
            tile: TileId,
            key: TileKey,
            _geometry: TileGeometry,
            reply: &TerrainSender,
        ) {
            let _ = reply.send(TerrainEnvelope {
                tile,
                key,
                reply: TerrainReply::Mesh(TileMesh {
                    positions: Vec::new(),
                    texture_coordinates: Vec::new(),
                    indices: Vec::new(),
                    min_height: 0_f64,
                    max_height: 0_f64,
                }),
            });
        }
        fn create_resources(
            &mut self,
            _ctx: &mut dyn Context,
            _key: TileKey,
            _mesh: &TileMesh,
        ) -> anyhow::Result<VertexArray> {
            Ok(Rc::new(UnitVertexArray))
        }
    }

    fn test_surface() -> Surface {
        Surface::new(SurfaceOptions::new(
            Box::new(FlatTerrain {
                scheme: TilingScheme::geographic(),
            }),
            ImageryLayerCollection::new(),
        ))
        .unwrap()
    }

    fn frame_above(longitude_deg: f64, latitude_deg: f64, height: f64, frame: u64) -> FrameState {
        let ellipsoid = Ellipsoid::wgs84();
        let position = ellipsoid.cartographic_to_cartesian(&Cartographic::from_degrees(
            longitude_deg,
            latitude_deg,
            height,
        ));
        let down = -ellipsoid.geodetic_surface_normal(&position);
        let up = Vector3::z();
        FrameState::perspective_3d(
            &ellipsoid,
            position,
            down,
            up,
            std::f64::consts::FRAC_PI_3,
            1024,
            768,
            frame,
        )
    }

    #[test]
    fn test_distance_to_overhead_tile_is_camera_height() {
        let mut surface = test_surface();
        surface.create_level_zero_tiles();
        let frame = frame_above(-90_f64, 0_f64, 250_000_f64, 1);
        let projection = GeographicProjection::new(&Ellipsoid::wgs84());
        // Camera is inside the west root's east/west and north/south slabs,
        // so only the height term contributes.
        let west_root = surface.roots()[0];
        surface.screen_space_error(west_root, &frame, &projection);
        approx::assert_relative_eq!(
            surface.tile(west_root).distance(),
            250_000_f64,
            max_relative = 1e-3
        );
    }

    #[test]
    fn test_sse_strictly_decreases_on_children() {
        let mut surface = test_surface();
        surface.create_level_zero_tiles();
        let frame = frame_above(-90_f64, 20_f64, 1_000_000_f64, 1);
        let projection = GeographicProjection::new(&Ellipsoid::wgs84());
        let root = surface.roots()[0];
        surface.ensure_children(root);
        let parent_error = surface.screen_space_error(root, &frame, &projection);
        for child in surface.tile(root).children().unwrap() {
            let child_error = surface.screen_space_error(child, &frame, &projection);
            assert!(
                child_error < parent_error,
                "child sse {child_error} not below parent {parent_error}"
            );
        }
    }

    #[test]
    fn test_sse_shrinks_with_altitude() {
        let mut surface = test_surface();
        surface.create_level_zero_tiles();
        let projection = GeographicProjection::new(&Ellipsoid::wgs84());
        let root = surface.roots()[0];
        let low = frame_above(-90_f64, 0_f64, 100_000_f64, 1);
        let high = frame_above(-90_f64, 0_f64, 20_000_000_f64, 2);
        let sse_low = surface.screen_space_error(root, &low, &projection);
        let sse_high = surface.screen_space_error(root, &high, &projection);
        assert!(sse_high < sse_low);
        // At 20,000 km even a level-zero tile is below the default
        // threshold of 2 pixels.
        assert!(sse_high < 2_f64);
        assert!(sse_low > 2_f64);
    }
}
