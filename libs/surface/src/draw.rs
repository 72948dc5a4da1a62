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

// Command assembly: selected tiles become draw commands, front-to-back
// within each texture-count bucket, with ready imagery packed into batches
// of at most the hardware texture unit count. Vertex positions are
// relative-to-center, undone by replacing the view matrix's translation
// column with the view-space tile center.
use crate::{
    imagery::ImageryState,
    render::{
        Context, DrawCommand, GlobeUniforms, PrimitiveType, RenderState, ShaderSet, TextureSlot,
        TileUniforms,
    },
    select::bounding_sphere_2d,
    tile::TileId,
    FrameState, SceneMode, Surface,
};
use float_ord::FloatOrd;
use geom::{BoundingSphere, Cartographic, MapProjection, WebMercatorProjection};
use nalgebra::{Point3, Vector4};
use smallvec::SmallVec;

impl Surface {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble_commands(
        &mut self,
        ctx: &mut dyn Context,
        frame: &FrameState,
        projection: &dyn MapProjection,
        shader_set: &mut dyn ShaderSet,
        render_state: &RenderState,
        globe_uniforms: &GlobeUniforms,
        out: &mut Vec<DrawCommand>,
    ) {
        let max_textures = ctx.maximum_texture_units().max(1);
        let mut used = 0_usize;

        for bucket_index in 0..self.render_buckets.len() {
            if self.render_buckets[bucket_index].is_empty() {
                continue;
            }
            let mut bucket = std::mem::take(&mut self.render_buckets[bucket_index]);
            // Front-to-back: depth-buffer wins and early-z helps.
            bucket.sort_by_key(|&id| FloatOrd(self.tiles.get(id).distance));
            for &id in &bucket {
                self.emit_tile_commands(
                    ctx,
                    frame,
                    projection,
                    shader_set,
                    render_state,
                    globe_uniforms,
                    id,
                    max_textures,
                    &mut used,
                );
            }
            self.render_buckets[bucket_index] = bucket;
        }

        // Drop pooled commands beyond what this frame wrote so stale ones
        // do not keep destroyed textures alive.
        self.tile_commands.truncate(used);
        self.stats.commands_emitted = used;
        out.extend(self.tile_commands.iter().cloned());
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_tile_commands(
        &mut self,
        ctx: &mut dyn Context,
        frame: &FrameState,
        projection: &dyn MapProjection,
        shader_set: &mut dyn ShaderSet,
        render_state: &RenderState,
        globe_uniforms: &GlobeUniforms,
        id: TileId,
        max_textures: usize,
        used: &mut usize,
    ) {
        let tile = self.tiles.get(id);
        let Some(vertex_array) = tile.vertex_array.clone() else {
            return;
        };

        let in_3d = matches!(frame.mode, SceneMode::Scene3D | SceneMode::Morphing);
        let center = if in_3d {
            tile.center
        } else {
            let projected = projection.project(&tile.rectangle.center());
            Point3::new(projected.x, projected.y, 0_f64)
        };

        // Relative-to-center transform: the translation column becomes the
        // view-space center, so f32 vertex positions stay precise.
        let mut modified_model_view = frame.view_matrix;
        let center_eye =
            frame.view_matrix * Vector4::new(center.x, center.y, center.z, 1_f64);
        modified_model_view.set_column(3, &center_eye);
        let modified_model_view_projection = frame.projection_matrix * modified_model_view;

        let tile_rectangle = if in_3d {
            [0_f64; 4]
        } else {
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
            [
                southwest.x - center.x,
                southwest.y - center.y,
                northeast.x - center.x,
                northeast.y - center.y,
            ]
        };

        // Mercator precision quad: the fragment shader re-derives texture
        // latitude from a high/low split of the southern mercator angle.
        let (south_and_north_latitude, south_mercator_y_high, south_mercator_y_low, one_over_height) =
            if !in_3d && projection.as_web_mercator().is_some() {
                let south = tile.rectangle.south;
                let north = tile.rectangle.north;
                let south_mercator_y =
                    WebMercatorProjection::geodetic_latitude_to_mercator_angle(south);
                let north_mercator_y =
                    WebMercatorProjection::geodetic_latitude_to_mercator_angle(north);
                let high = south_mercator_y as f32;
                let low = (south_mercator_y - high as f64) as f32;
                (
                    [south as f32, north as f32],
                    high,
                    low,
                    (1_f64 / (north_mercator_y - south_mercator_y)) as f32,
                )
            } else {
                ([0_f32; 2], 0_f32, 0_f32, 0_f32)
            };

        let bounding_volume: BoundingSphere = match frame.mode {
            SceneMode::Scene3D => tile.bounding_sphere_3d,
            SceneMode::Morphing => {
                bounding_sphere_2d(tile, projection).union(&tile.bounding_sphere_3d)
            }
            SceneMode::Scene2D | SceneMode::ColumbusView => bounding_sphere_2d(tile, projection),
        };

        let primitive_type = if self.debug_wireframe {
            PrimitiveType::Lines
        } else {
            PrimitiveType::Triangles
        };

        // Batch loop: pack ready imagery into commands of at most
        // max_textures slots; always at least one command, so terrain draws
        // untextured while imagery is still on its way.
        let mut imagery_index = 0;
        let mut textures_rendered = 0_usize;
        loop {
            let mut slots: SmallVec<[TextureSlot; 4]> = SmallVec::new();
            while imagery_index < tile.imagery.len() && slots.len() < max_textures {
                let entry = &tile.imagery[imagery_index];
                imagery_index += 1;
                let Some(layer) = self.layers.get(entry.layer) else {
                    continue;
                };
                let imagery = layer.pool().get(entry.imagery);
                if imagery.state() != ImageryState::Ready {
                    continue;
                }
                let Some(texture) = imagery.texture() else {
                    continue;
                };
                let Some(translation_and_scale) = entry.translation_and_scale else {
                    continue;
                };
                slots.push(TextureSlot {
                    texture: texture.clone(),
                    translation_and_scale: translation_and_scale.map(|v| v as f32),
                    texture_coordinate_rectangle: entry
                        .texture_coordinate_rectangle
                        .map(|v| v as f32),
                    alpha: layer.alpha(),
                });
            }
            textures_rendered += slots.len();

            let shader_program = shader_set.shader_program(ctx, slots.len());
            let command = DrawCommand {
                shader_program,
                render_state: render_state.clone(),
                primitive_type,
                vertex_array: vertex_array.clone(),
                uniforms: TileUniforms {
                    center_3d: [center.x, center.y, center.z],
                    modified_model_view,
                    modified_model_view_projection,
                    tile_rectangle,
                    south_and_north_latitude,
                    south_mercator_y_high,
                    south_mercator_y_low,
                    one_over_mercator_height: one_over_height,
                    day_textures: slots,
                },
                globe_uniforms: globe_uniforms.clone(),
                bounding_volume,
            };
            if *used < self.tile_commands.len() {
                self.tile_commands[*used] = command;
            } else {
                self.tile_commands.push(command);
            }
            *used += 1;

            if imagery_index >= tile.imagery.len() {
                break;
            }
        }
        self.stats.textures_rendered += textures_rendered;
    }
}
