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

// Headless demo: flies a camera down toward a procedurally generated
// planet and reports what the surface engine streams, selects, and emits
// each frame. No GPU; a counting context stands in for the renderer.
use anyhow::Result;
use geom::{Cartographic, Ellipsoid, Rectangle, WebMercatorProjection};
use log::info;
use nalgebra::Vector3;
use std::rc::Rc;
use structopt::StructOpt;
use surface::{
    imagery::{ImageryId, ImageryKey, ImageryLayerCollection},
    provider::{
        ImageryEnvelope, ImageryImage, ImageryProvider, ImageryReply, ImagerySender,
        TerrainEnvelope, TerrainProvider, TerrainReply, TerrainSender, TileGeometry, TileMesh,
        TilingScheme,
    },
    render::{
        Context, DrawCommand, GlobeUniforms, RenderState, RenderStateResource, ShaderProgram,
        ShaderProgramResource, ShaderSet, Texture, TextureResource, UniformSource, VertexArray,
        VertexArrayResource,
    },
    tile::{TileId, TileKey},
    FrameState, Surface, SurfaceOptions,
};
use terminal_size::{terminal_size, Width};

/// Stream a level-of-detail planet surface without a GPU.
#[derive(Clone, Debug, StructOpt)]
#[structopt(set_term_width = if let Some((Width(w), _)) = terminal_size() { w as usize } else { 80 })]
struct Opt {
    /// Number of frames to run.
    #[structopt(long, default_value = "90")]
    frames: u64,

    /// Camera altitude at the first frame, in kilometers.
    #[structopt(long, default_value = "20000")]
    start_altitude_km: f64,

    /// Camera altitude at the last frame, in kilometers.
    #[structopt(long, default_value = "50")]
    end_altitude_km: f64,

    /// Longitude drift per frame, in degrees.
    #[structopt(long, default_value = "0.25")]
    drift: f64,

    /// Number of procedural imagery layers to drape.
    #[structopt(long, default_value = "2")]
    layers: usize,

    /// Refinement threshold in pixels of screen-space error.
    #[structopt(long, default_value = "2.0")]
    max_sse: f64,

    /// Emit line primitives instead of triangles.
    #[structopt(long)]
    wireframe: bool,
}

#[derive(Debug)]
struct CountingTexture {
    width: u32,
    height: u32,
}

impl TextureResource for CountingTexture {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug)]
struct CountingVertexArray {
    vertices: u32,
    indices: u32,
}

impl VertexArrayResource for CountingVertexArray {
    fn vertex_count(&self) -> u32 {
        self.vertices
    }
    fn index_count(&self) -> u32 {
        self.indices
    }
}

#[derive(Debug)]
struct HeadlessContext {
    textures_created: usize,
    vertex_arrays_created: usize,
}

impl Context for HeadlessContext {
    fn maximum_texture_units(&self) -> usize {
        8
    }

    fn create_texture_2d(&mut self, image: &ImageryImage) -> Result<Texture> {
        self.textures_created += 1;
        Ok(Rc::new(CountingTexture {
            width: image.width,
            height: image.height,
        }))
    }

    fn reproject_texture(&mut self, texture: Texture, _rectangle: &Rectangle) -> Result<Texture> {
        Ok(texture)
    }

    fn create_vertex_array(&mut self, mesh: &TileMesh) -> Result<VertexArray> {
        self.vertex_arrays_created += 1;
        Ok(Rc::new(CountingVertexArray {
            vertices: mesh.positions.len() as u32,
            indices: mesh.indices.len() as u32,
        }))
    }
}

#[derive(Debug)]
struct DemoShader {
    units: usize,
}

impl ShaderProgramResource for DemoShader {
    fn texture_unit_count(&self) -> usize {
        self.units
    }
}

struct DemoShaderSet;

impl ShaderSet for DemoShaderSet {
    fn shader_program(&mut self, _ctx: &mut dyn Context, texture_count: usize) -> ShaderProgram {
        Rc::new(DemoShader {
            units: texture_count,
        })
    }
}

#[derive(Debug)]
struct DemoRenderState;

impl RenderStateResource for DemoRenderState {}

#[derive(Debug)]
struct DemoGlobeUniforms;

impl UniformSource for DemoGlobeUniforms {}

// Rolling hills out of thin air: heights derive from the tile key, so
// geometry is deterministic and needs no data on disk.
#[derive(Debug)]
struct ProceduralTerrain {
    scheme: TilingScheme,
    grid: u32,
}

impl ProceduralTerrain {
    fn height_at(rectangle: &Rectangle, u: f64, v: f64) -> f64 {
        let longitude = rectangle.west + rectangle.width() * u;
        let latitude = rectangle.south + rectangle.height() * v;
        2_500.0 * (longitude * 12.0).sin() * (latitude * 17.0).cos()
    }
}

impl TerrainProvider for ProceduralTerrain {
    fn tiling_scheme(&self) -> &TilingScheme {
        &self.scheme
    }

    fn max_level(&self) -> u32 {
        14
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
        let rectangle = self.scheme.tile_rectangle(&key);
        let n = self.grid;
        let mut positions = Vec::with_capacity((n * n) as usize);
        let mut texture_coordinates = Vec::with_capacity((n * n) as usize);
        let mut indices = Vec::new();
        let mut min_height = f64::MAX;
        let mut max_height = f64::MIN;
        for row in 0..n {
            for col in 0..n {
                let u = col as f64 / (n - 1) as f64;
                let v = row as f64 / (n - 1) as f64;
                let height = Self::height_at(&rectangle, u, v);
                min_height = min_height.min(height);
                max_height = max_height.max(height);
                positions.push([u as f32, v as f32, height as f32]);
                texture_coordinates.push([u as f32, v as f32]);
            }
        }
        for row in 0..n - 1 {
            for col in 0..n - 1 {
                let base = row * n + col;
                indices.extend_from_slice(&[
                    base,
                    base + 1,
                    base + n,
                    base + n,
                    base + 1,
                    base + n + 1,
                ]);
            }
        }
        let _ = reply.send(TerrainEnvelope {
            tile,
            key,
            reply: TerrainReply::Mesh(TileMesh {
                positions,
                texture_coordinates,
                indices,
                min_height,
                max_height,
            }),
        });
    }

    fn create_resources(
        &mut self,
        ctx: &mut dyn Context,
        _key: TileKey,
        mesh: &TileMesh,
    ) -> Result<VertexArray> {
        ctx.create_vertex_array(mesh)
    }
}

#[derive(Debug)]
struct ProceduralImagery {
    scheme: TilingScheme,
    shade: u8,
}

impl ImageryProvider for ProceduralImagery {
    fn ready(&self) -> bool {
        true
    }

    fn tiling_scheme(&self) -> &TilingScheme {
        &self.scheme
    }

    fn max_level(&self) -> u32 {
        12
    }

    fn request_imagery(&mut self, imagery: ImageryId, key: ImageryKey, reply: &ImagerySender) {
        let side = 8_u32;
        let mut pixels = Vec::with_capacity((side * side * 4) as usize);
        for y in 0..side {
            for x in 0..side {
                let checker = ((x + y + key.x + key.y) % 2) as u8;
                pixels.extend_from_slice(&[
                    self.shade.wrapping_mul(checker + 1),
                    (key.level * 16) as u8,
                    checker * 200,
                    255,
                ]);
            }
        }
        let _ = reply.send(ImageryEnvelope {
            imagery,
            key,
            reply: ImageryReply::Image(ImageryImage {
                width: side,
                height: side,
                pixels,
            }),
        });
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let ellipsoid = Ellipsoid::wgs84();
    let mut layers = ImageryLayerCollection::new();
    for i in 0..opt.layers {
        let id = layers.add(Box::new(ProceduralImagery {
            scheme: TilingScheme::geographic(),
            shade: 64_u8.wrapping_mul(i as u8 + 1),
        }));
        if i > 0 {
            // Upper layers blend over the base.
            if let Some(layer) = layers.get_mut(id) {
                layer.set_alpha(0.5);
            }
        }
    }

    let mut options = SurfaceOptions::new(
        Box::new(ProceduralTerrain {
            scheme: TilingScheme::web_mercator(2, 1),
            grid: 9,
        }),
        layers,
    );
    options.max_screen_space_error = opt.max_sse;
    let mut globe = Surface::new(options)?;
    globe.set_wireframe(opt.wireframe);

    let mut ctx = HeadlessContext {
        textures_created: 0,
        vertex_arrays_created: 0,
    };
    let mut shader_set = DemoShaderSet;
    let render_state: RenderState = Rc::new(DemoRenderState);
    let globe_uniforms: GlobeUniforms = Rc::new(DemoGlobeUniforms);
    let projection = WebMercatorProjection::new(&ellipsoid);

    let mut commands: Vec<DrawCommand> = Vec::new();
    for frame_number in 0..opt.frames {
        // Descend while drifting east.
        let t = frame_number as f64 / (opt.frames.max(2) - 1) as f64;
        let altitude =
            1_000.0 * (opt.start_altitude_km * (1.0 - t) + opt.end_altitude_km * t);
        let camera = Cartographic::from_degrees(opt.drift * frame_number as f64, 15.0, altitude);
        let position = ellipsoid.cartographic_to_cartesian(&camera);
        let down = -ellipsoid.geodetic_surface_normal(&position);
        let frame = FrameState::perspective_3d(
            &ellipsoid,
            position,
            down,
            Vector3::z(),
            std::f64::consts::FRAC_PI_3,
            1280,
            720,
            frame_number + 1,
        );

        commands.clear();
        globe.update(
            &mut ctx,
            &frame,
            &projection,
            &mut shader_set,
            &render_state,
            &globe_uniforms,
            &mut commands,
        );

        let stats = globe.stats();
        info!(
            "frame {:>3} alt {:>8.1}km: rendered {:>3} (culled {:>3}, waiting {:>2}) depth {:>2} \
             queue {:>3} resident {:>3} commands {:>3}",
            frame_number + 1,
            altitude / 1_000.0,
            stats.tiles_rendered,
            stats.tiles_culled,
            stats.tiles_waiting_for_children,
            stats.max_depth,
            stats.load_queue_length,
            stats.resident_tiles,
            commands.len(),
        );
    }

    let stats = globe.stats();
    println!(
        "final frame: {} tiles rendered at depth {} with {} textures across {} commands",
        stats.tiles_rendered, stats.max_depth, stats.textures_rendered, stats.commands_emitted
    );
    println!(
        "lifetime: {} textures and {} vertex arrays created, {} tiles resident",
        ctx.textures_created,
        ctx.vertex_arrays_created,
        globe.resident_tile_count()
    );
    Ok(())
}
