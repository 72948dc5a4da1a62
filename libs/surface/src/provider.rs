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
use crate::{
    imagery::{ImageryId, ImageryKey},
    render::{Context, VertexArray},
    tile::{TileId, TileKey},
};
use anyhow::Result;
use crossbeam::channel::{Receiver, Sender};
use geom::{Rectangle, WebMercatorProjection};
use std::fmt::Debug;

// How a provider's pyramid subdivides the world. Row 0 is the northernmost
// row; a level-N tile splits into a 2x2 block at level N+1.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SchemeKind {
    Geographic,
    WebMercator,
}

#[derive(Clone, Debug)]
pub struct TilingScheme {
    rectangle: Rectangle,
    number_of_level_zero_tiles_x: u32,
    number_of_level_zero_tiles_y: u32,
    kind: SchemeKind,
}

impl TilingScheme {
    pub fn geographic() -> Self {
        Self {
            rectangle: Rectangle::MAX_VALUE,
            number_of_level_zero_tiles_x: 2,
            number_of_level_zero_tiles_y: 1,
            kind: SchemeKind::Geographic,
        }
    }

    pub fn web_mercator(
        number_of_level_zero_tiles_x: u32,
        number_of_level_zero_tiles_y: u32,
    ) -> Self {
        let limit = WebMercatorProjection::MAXIMUM_LATITUDE;
        Self {
            rectangle: Rectangle::new(
                -std::f64::consts::PI,
                -limit,
                std::f64::consts::PI,
                limit,
            ),
            number_of_level_zero_tiles_x,
            number_of_level_zero_tiles_y,
            kind: SchemeKind::WebMercator,
        }
    }

    pub fn rectangle(&self) -> &Rectangle {
        &self.rectangle
    }

    pub fn number_of_level_zero_tiles_x(&self) -> u32 {
        self.number_of_level_zero_tiles_x
    }

    pub fn number_of_level_zero_tiles_y(&self) -> u32 {
        self.number_of_level_zero_tiles_y
    }

    pub fn tiles_at_level(&self, level: u32) -> (u32, u32) {
        (
            self.number_of_level_zero_tiles_x << level,
            self.number_of_level_zero_tiles_y << level,
        )
    }

    // Width of one tile at `level`, in radians of longitude.
    pub fn tile_angular_width(&self, level: u32) -> f64 {
        self.rectangle.width() / self.tiles_at_level(level).0 as f64
    }

    pub fn tile_rectangle(&self, key: &TileKey) -> Rectangle {
        let (tiles_x, tiles_y) = self.tiles_at_level(key.level);
        let west =
            self.rectangle.west + self.rectangle.width() * key.x as f64 / tiles_x as f64;
        let east =
            self.rectangle.west + self.rectangle.width() * (key.x + 1) as f64 / tiles_x as f64;
        let (south, north) = match self.kind {
            SchemeKind::Geographic => {
                let height = self.rectangle.height();
                (
                    self.rectangle.north - height * (key.y + 1) as f64 / tiles_y as f64,
                    self.rectangle.north - height * key.y as f64 / tiles_y as f64,
                )
            }
            SchemeKind::WebMercator => {
                // Rows are equal spans of mercator angle, not latitude.
                let m_south =
                    WebMercatorProjection::geodetic_latitude_to_mercator_angle(self.rectangle.south);
                let m_north =
                    WebMercatorProjection::geodetic_latitude_to_mercator_angle(self.rectangle.north);
                let m_height = m_north - m_south;
                (
                    WebMercatorProjection::mercator_angle_to_geodetic_latitude(
                        m_north - m_height * (key.y + 1) as f64 / tiles_y as f64,
                    ),
                    WebMercatorProjection::mercator_angle_to_geodetic_latitude(
                        m_north - m_height * key.y as f64 / tiles_y as f64,
                    ),
                )
            }
        };
        Rectangle::new(west, south, east, north)
    }

    pub fn position_to_key(&self, position: &geom::Cartographic, level: u32) -> Option<TileKey> {
        if !self.rectangle.contains(position) {
            return None;
        }
        let (tiles_x, tiles_y) = self.tiles_at_level(level);
        let x_frac = (position.longitude - self.rectangle.west) / self.rectangle.width();
        let y_frac = match self.kind {
            SchemeKind::Geographic => {
                (self.rectangle.north - position.latitude) / self.rectangle.height()
            }
            SchemeKind::WebMercator => {
                let m_south =
                    WebMercatorProjection::geodetic_latitude_to_mercator_angle(self.rectangle.south);
                let m_north =
                    WebMercatorProjection::geodetic_latitude_to_mercator_angle(self.rectangle.north);
                let m = WebMercatorProjection::geodetic_latitude_to_mercator_angle(
                    position.latitude,
                );
                (m_north - m) / (m_north - m_south)
            }
        };
        let x = ((x_frac * tiles_x as f64) as u32).min(tiles_x - 1);
        let y = ((y_frac * tiles_y as f64) as u32).min(tiles_y - 1);
        Some(TileKey::new(level, x, y))
    }
}

// Raw geometry as fetched; opaque to the engine, which only ferries it from
// the request reply into transform_geometry.
#[derive(Clone, Debug)]
pub struct TileGeometry {
    pub data: Vec<u8>,
}

// Transformed, render-ready mesh data. Positions are relative to the tile
// center so the vertex array keeps f32 precision far from the origin.
#[derive(Clone, Debug)]
pub struct TileMesh {
    pub positions: Vec<[f32; 3]>,
    pub texture_coordinates: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub min_height: f64,
    pub max_height: f64,
}

// Decoded imagery pixels, RGBA8 row-major.
#[derive(Clone, Debug)]
pub struct ImageryImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug)]
pub enum TerrainReply {
    Geometry(TileGeometry),
    Mesh(TileMesh),
    Failed,
}

// Replies carry the key they were issued for; the pump drops envelopes whose
// arena slot has been recycled since the request went out.
#[derive(Debug)]
pub struct TerrainEnvelope {
    pub tile: TileId,
    pub key: TileKey,
    pub reply: TerrainReply,
}

pub type TerrainSender = Sender<TerrainEnvelope>;
pub type TerrainReceiver = Receiver<TerrainEnvelope>;

#[derive(Debug)]
pub enum ImageryReply {
    Image(ImageryImage),
    Failed,
    Invalid,
}

#[derive(Debug)]
pub struct ImageryEnvelope {
    pub imagery: ImageryId,
    pub key: ImageryKey,
    pub reply: ImageryReply,
}

pub type ImagerySender = Sender<ImageryEnvelope>;
pub type ImageryReceiver = Receiver<ImageryEnvelope>;

// Terrain geometry source. Request and transform may answer asynchronously
// through the reply sender, from any thread; resource creation is a
// render-thread call and returns its result directly.
pub trait TerrainProvider: Debug {
    fn ready(&self) -> bool {
        true
    }

    fn tiling_scheme(&self) -> &TilingScheme;

    fn max_level(&self) -> u32;

    // Meters of error in the level's geometry at the equator.
    fn level_maximum_geometric_error(&self, level: u32) -> f64;

    fn request_tile_geometry(&mut self, tile: TileId, key: TileKey, reply: &TerrainSender);

    fn transform_geometry(
        &mut self,
        ctx: &mut dyn Context,
        tile: TileId,
        key: TileKey,
        geometry: TileGeometry,
        reply: &TerrainSender,
    );

    fn create_resources(
        &mut self,
        ctx: &mut dyn Context,
        key: TileKey,
        mesh: &TileMesh,
    ) -> Result<VertexArray>;
}

pub trait ImageryProvider: Debug {
    fn ready(&self) -> bool;

    fn tiling_scheme(&self) -> &TilingScheme;

    fn min_level(&self) -> u32 {
        0
    }

    fn max_level(&self) -> u32;

    fn request_imagery(&mut self, imagery: ImageryId, key: ImageryKey, reply: &ImagerySender);
}
