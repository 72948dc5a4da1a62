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
pub(crate) mod load_queue;
pub(crate) mod replacement_queue;

use crate::{
    imagery::{ImageryLayerCollection, TileImagery},
    provider::{TileGeometry, TileMesh},
    render::VertexArray,
};
use geom::{BoundingSphere, Cartographic, Ellipsoid, EllipsoidalOccluder, Rectangle};
use nalgebra::{Point3, Vector3};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TileKey {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    // Children in the order SW, SE, NW, NE. Row index grows southward, so
    // the northern children share the parent's row * 2.
    pub fn child(&self, index: usize) -> Self {
        let (dx, dy) = match index {
            0 => (0, 1),
            1 => (1, 1),
            2 => (0, 0),
            3 => (1, 0),
            _ => panic!("tile child index out of range: {index}"),
        };
        Self {
            level: self.level + 1,
            x: self.x * 2 + dx,
            y: self.y * 2 + dy,
        }
    }
}

// Stable handle into the tile arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TileId {
    id: u32,
}

impl TileId {
    fn new(id: usize) -> Self {
        assert!(id < u32::MAX as usize);
        Self { id: id as u32 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.id as usize
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerrainState {
    Unloaded,
    Transitioning,
    Received,
    Transformed,
    Ready,
    Failed,
}

#[derive(Debug)]
pub struct Tile {
    pub(crate) key: TileKey,
    pub(crate) rectangle: Rectangle,

    // Tree links. Parent is a non-owning back reference; children are owned
    // and either all four present or absent.
    pub(crate) parent: Option<TileId>,
    pub(crate) children: Option<[TileId; 4]>,

    // Culling aids, recomputed when real heights arrive with the mesh.
    pub(crate) center: Point3<f64>,
    pub(crate) southwest_corner: Point3<f64>,
    pub(crate) northeast_corner: Point3<f64>,
    pub(crate) west_normal: Vector3<f64>,
    pub(crate) east_normal: Vector3<f64>,
    pub(crate) south_normal: Vector3<f64>,
    pub(crate) north_normal: Vector3<f64>,
    pub(crate) min_height: f64,
    pub(crate) max_height: f64,
    pub(crate) bounding_sphere_3d: BoundingSphere,
    pub(crate) occludee_point_in_scaled_space: Option<Vector3<f64>>,

    // Terrain state machine and its stage payloads.
    pub(crate) terrain_state: TerrainState,
    pub(crate) geometry: Option<TileGeometry>,
    pub(crate) mesh: Option<TileMesh>,
    pub(crate) vertex_array: Option<VertexArray>,

    // Imagery stack, contiguous per layer, in collection order.
    pub(crate) imagery: Vec<TileImagery>,

    pub(crate) renderable: bool,
    pub(crate) done_loading: bool,
    pub(crate) terrain_failure_logged: bool,

    // Intrusive queue links.
    pub(crate) load_prev: Option<TileId>,
    pub(crate) load_next: Option<TileId>,
    pub(crate) replacement_prev: Option<TileId>,
    pub(crate) replacement_next: Option<TileId>,

    pub(crate) last_selection_frame: u64,

    // Scratch written by the selector, read by the command sorter.
    pub(crate) distance: f64,
}

impl Tile {
    pub(crate) fn new(
        key: TileKey,
        rectangle: Rectangle,
        parent: Option<TileId>,
        ellipsoid: &Ellipsoid,
        occluder: &EllipsoidalOccluder,
    ) -> Self {
        let mut tile = Self {
            key,
            rectangle,
            parent,
            children: None,
            center: Point3::origin(),
            southwest_corner: Point3::origin(),
            northeast_corner: Point3::origin(),
            west_normal: Vector3::zeros(),
            east_normal: Vector3::zeros(),
            south_normal: Vector3::zeros(),
            north_normal: Vector3::zeros(),
            min_height: 0_f64,
            max_height: 0_f64,
            bounding_sphere_3d: BoundingSphere::default(),
            occludee_point_in_scaled_space: None,
            terrain_state: TerrainState::Unloaded,
            geometry: None,
            mesh: None,
            vertex_array: None,
            imagery: Vec::new(),
            renderable: false,
            done_loading: false,
            terrain_failure_logged: false,
            load_prev: None,
            load_next: None,
            replacement_prev: None,
            replacement_next: None,
            last_selection_frame: 0,
            distance: 0_f64,
        };
        tile.recompute_bounds(ellipsoid, occluder);
        tile
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn rectangle(&self) -> &Rectangle {
        &self.rectangle
    }

    pub fn parent(&self) -> Option<TileId> {
        self.parent
    }

    pub fn children(&self) -> Option<[TileId; 4]> {
        self.children
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn renderable(&self) -> bool {
        self.renderable
    }

    pub fn done_loading(&self) -> bool {
        self.done_loading
    }

    pub fn terrain_state(&self) -> TerrainState {
        self.terrain_state
    }

    pub fn bounding_sphere_3d(&self) -> &BoundingSphere {
        &self.bounding_sphere_3d
    }

    pub fn imagery(&self) -> &[TileImagery] {
        &self.imagery
    }

    pub(crate) fn recompute_bounds(
        &mut self,
        ellipsoid: &Ellipsoid,
        occluder: &EllipsoidalOccluder,
    ) {
        let rect = &self.rectangle;
        let mid_latitude = (rect.south + rect.north) * 0.5;
        let mid_longitude = (rect.west + rect.east) * 0.5;

        self.center = ellipsoid.cartographic_to_cartesian(&rect.center());
        self.southwest_corner =
            ellipsoid.cartographic_to_cartesian(&Cartographic::new(rect.west, rect.south, 0_f64));
        self.northeast_corner =
            ellipsoid.cartographic_to_cartesian(&Cartographic::new(rect.east, rect.north, 0_f64));

        // Outward normals of the planes bounding the tile's slab. West and
        // east planes contain the polar axis; south and north planes follow
        // the edge and the local up.
        let western_midpoint = ellipsoid
            .cartographic_to_cartesian(&Cartographic::new(rect.west, mid_latitude, 0_f64));
        let eastern_midpoint = ellipsoid
            .cartographic_to_cartesian(&Cartographic::new(rect.east, mid_latitude, 0_f64));
        self.west_normal = western_midpoint.coords.cross(&Vector3::z()).normalize();
        self.east_normal = Vector3::z().cross(&eastern_midpoint.coords).normalize();

        let east_vector = (eastern_midpoint - western_midpoint).normalize();
        let south_up = ellipsoid
            .geodetic_surface_normal_cartographic(&Cartographic::new(mid_longitude, rect.south, 0_f64));
        let north_up = ellipsoid
            .geodetic_surface_normal_cartographic(&Cartographic::new(mid_longitude, rect.north, 0_f64));
        self.south_normal = east_vector.cross(&south_up).normalize();
        self.north_normal = north_up.cross(&east_vector).normalize();

        let corner_positions = |height: f64| {
            [
                ellipsoid.cartographic_to_cartesian(&Cartographic::new(rect.west, rect.south, height)),
                ellipsoid.cartographic_to_cartesian(&Cartographic::new(rect.east, rect.south, height)),
                ellipsoid.cartographic_to_cartesian(&Cartographic::new(rect.west, rect.north, height)),
                ellipsoid.cartographic_to_cartesian(&Cartographic::new(rect.east, rect.north, height)),
            ]
        };
        let lower = corner_positions(self.min_height);
        let upper = corner_positions(self.max_height);
        let top_center = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
            mid_longitude,
            mid_latitude,
            self.max_height,
        ));
        let mut points = Vec::with_capacity(9);
        points.extend_from_slice(&lower);
        points.extend_from_slice(&upper);
        points.push(top_center);
        self.bounding_sphere_3d = BoundingSphere::from_points(&points);

        let mut occludee_inputs = upper.to_vec();
        occludee_inputs.push(top_center);
        self.occludee_point_in_scaled_space =
            occluder.compute_horizon_culling_point(&self.center.coords, &occludee_inputs);
    }
}

#[derive(Debug, Default)]
pub struct TileArena {
    slots: Vec<Option<Tile>>,
    free: Vec<u32>,
    occupied: usize,
}

impl TileArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, tile: Tile) -> TileId {
        self.occupied += 1;
        if let Some(index) = self.free.pop() {
            let id = TileId { id: index };
            self.slots[id.offset()] = Some(tile);
            return id;
        }
        let id = TileId::new(self.slots.len());
        self.slots.push(Some(tile));
        id
    }

    pub fn release(&mut self, id: TileId) {
        let slot = &mut self.slots[id.offset()];
        assert!(slot.is_some(), "releasing free tile slot {id:?}");
        *slot = None;
        self.free.push(id.id);
        self.occupied -= 1;
    }

    pub fn get(&self, id: TileId) -> &Tile {
        match &self.slots[id.offset()] {
            Some(tile) => tile,
            None => panic!("tile slot {id:?} is free"),
        }
    }

    pub fn get_mut(&mut self, id: TileId) -> &mut Tile {
        match &mut self.slots[id.offset()] {
            Some(tile) => tile,
            None => panic!("tile slot {id:?} is free"),
        }
    }

    pub fn is_occupied(&self, id: TileId) -> bool {
        id.offset() < self.slots.len() && self.slots[id.offset()].is_some()
    }

    // Whether `id` still refers to the tile a reply was issued for; slots
    // recycle, so a bare id is not proof enough.
    pub fn matches(&self, id: TileId, key: &TileKey) -> bool {
        id.offset() < self.slots.len()
            && matches!(&self.slots[id.offset()], Some(tile) if tile.key == *key)
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }
}

// Tear a tile back down to Unloaded: drop GPU and stage payloads, release
// imagery references, and destroy the child subtree outright. The tile's own
// arena slot stays live; it is still referenced from its parent.
pub(crate) fn free_tile_resources(
    tiles: &mut TileArena,
    layers: &mut ImageryLayerCollection,
    load_queue: &mut load_queue::TileLoadQueue,
    replacement_queue: &mut replacement_queue::TileReplacementQueue,
    id: TileId,
) {
    let tile = tiles.get_mut(id);
    tile.terrain_state = TerrainState::Unloaded;
    tile.renderable = false;
    tile.done_loading = false;
    tile.terrain_failure_logged = false;
    tile.geometry = None;
    tile.mesh = None;
    tile.vertex_array = None;

    let imagery = std::mem::take(&mut tile.imagery);
    let children = tile.children.take();

    for tile_imagery in &imagery {
        layers.release_tile_imagery(tile_imagery);
    }

    if let Some(children) = children {
        for child in children {
            load_queue.remove(tiles, child);
            replacement_queue.remove(tiles, child);
            free_tile_resources(tiles, layers, load_queue, replacement_queue, child);
            tiles.release(child);
        }
    }
}
