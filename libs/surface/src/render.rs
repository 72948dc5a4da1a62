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

// The seam between the engine and whatever actually draws. Resources are
// refcounted handles; dropping the last clone on the render thread releases
// the backing GPU object.
use crate::provider::{ImageryImage, TileMesh};
use anyhow::Result;
use geom::{BoundingSphere, Rectangle};
use nalgebra::Matrix4;
use smallvec::SmallVec;
use std::{fmt::Debug, rc::Rc};

pub trait TextureResource: Debug {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

pub type Texture = Rc<dyn TextureResource>;

pub trait VertexArrayResource: Debug {
    fn vertex_count(&self) -> u32;
    fn index_count(&self) -> u32;
}

pub type VertexArray = Rc<dyn VertexArrayResource>;

pub trait ShaderProgramResource: Debug {
    fn texture_unit_count(&self) -> usize;
}

pub type ShaderProgram = Rc<dyn ShaderProgramResource>;

pub trait RenderStateResource: Debug {}

pub type RenderState = Rc<dyn RenderStateResource>;

// Caller-supplied uniforms shared by every surface command in a frame
// (lighting, fog, sun position, ...). Opaque to the engine.
pub trait UniformSource: Debug {}

pub type GlobeUniforms = Rc<dyn UniformSource>;

pub trait Context {
    fn maximum_texture_units(&self) -> usize;

    fn create_texture_2d(&mut self, image: &ImageryImage) -> Result<Texture>;

    // Re-grid a texture onto the terrain tiling's projection. Backends whose
    // imagery and terrain share a projection return the input unchanged.
    fn reproject_texture(&mut self, texture: Texture, rectangle: &Rectangle) -> Result<Texture>;

    fn create_vertex_array(&mut self, mesh: &TileMesh) -> Result<VertexArray>;
}

pub trait ShaderSet {
    // A program specialized to sample `texture_count` imagery layers.
    fn shader_program(&mut self, ctx: &mut dyn Context, texture_count: usize) -> ShaderProgram;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrimitiveType {
    Triangles,
    Lines,
}

// One bound imagery texture within a command.
#[derive(Clone, Debug)]
pub struct TextureSlot {
    pub texture: Texture,
    pub translation_and_scale: [f32; 4],
    pub texture_coordinate_rectangle: [f32; 4],
    pub alpha: f32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UniformId {
    Center3D,
    ModifiedModelView,
    ModifiedModelViewProjection,
    TileRectangle,
    SouthAndNorthLatitude,
    SouthMercatorYAndOneOverHeight,
    DayTextureCount,
}

#[derive(Clone, Debug)]
pub enum UniformValue<'a> {
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    DVec3([f64; 3]),
    DVec4([f64; 4]),
    DMat4(&'a Matrix4<f64>),
}

// Per-tile uniform record. Scalar and matrix uniforms are fetched through
// `value`; the texture slots are structured data the backend walks directly.
#[derive(Clone, Debug)]
pub struct TileUniforms {
    pub center_3d: [f64; 3],
    pub modified_model_view: Matrix4<f64>,
    pub modified_model_view_projection: Matrix4<f64>,
    // Projected extent relative to the center, [west, south, east, north];
    // zero in 3D where the mesh itself carries positions.
    pub tile_rectangle: [f64; 4],
    pub south_and_north_latitude: [f32; 2],
    pub south_mercator_y_high: f32,
    pub south_mercator_y_low: f32,
    pub one_over_mercator_height: f32,
    pub day_textures: SmallVec<[TextureSlot; 4]>,
}

impl Default for TileUniforms {
    fn default() -> Self {
        Self {
            center_3d: [0_f64; 3],
            modified_model_view: Matrix4::identity(),
            modified_model_view_projection: Matrix4::identity(),
            tile_rectangle: [0_f64; 4],
            south_and_north_latitude: [0_f32; 2],
            south_mercator_y_high: 0_f32,
            south_mercator_y_low: 0_f32,
            one_over_mercator_height: 0_f32,
            day_textures: SmallVec::new(),
        }
    }
}

impl TileUniforms {
    pub fn value(&self, id: UniformId) -> UniformValue<'_> {
        match id {
            UniformId::Center3D => UniformValue::DVec3(self.center_3d),
            UniformId::ModifiedModelView => UniformValue::DMat4(&self.modified_model_view),
            UniformId::ModifiedModelViewProjection => {
                UniformValue::DMat4(&self.modified_model_view_projection)
            }
            UniformId::TileRectangle => UniformValue::DVec4(self.tile_rectangle),
            UniformId::SouthAndNorthLatitude => {
                UniformValue::Vec2(self.south_and_north_latitude)
            }
            UniformId::SouthMercatorYAndOneOverHeight => UniformValue::Vec3([
                self.south_mercator_y_high,
                self.south_mercator_y_low,
                self.one_over_mercator_height,
            ]),
            UniformId::DayTextureCount => UniformValue::Int(self.day_textures.len() as i32),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DrawCommand {
    pub shader_program: ShaderProgram,
    pub render_state: RenderState,
    pub primitive_type: PrimitiveType,
    pub vertex_array: VertexArray,
    pub uniforms: TileUniforms,
    pub globe_uniforms: GlobeUniforms,
    pub bounding_volume: BoundingSphere,
}
