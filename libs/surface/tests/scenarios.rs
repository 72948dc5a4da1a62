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

// End-to-end frame-loop scenarios driven with synchronous fake providers
// and a counting fake rendering context.
use anyhow::Result;
use geom::{
    Cartographic, CullingVolume, Ellipsoid, GeographicProjection, MapProjection, Rectangle,
    WebMercatorProjection,
};
use nalgebra::{Matrix4, Point3, Vector3};
use std::{
    cell::Cell,
    collections::{BTreeMap, HashSet},
    rc::Rc,
};
use surface::{
    imagery::{ImageryId, ImageryKey, ImageryLayerCollection, ImageryState, LayerId},
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
    FrameState, SceneMode, Surface, SurfaceOptions,
};

#[derive(Debug)]
struct FakeTexture {
    width: u32,
    height: u32,
}

impl TextureResource for FakeTexture {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug)]
struct FakeVertexArray {
    vertices: u32,
    indices: u32,
}

impl VertexArrayResource for FakeVertexArray {
    fn vertex_count(&self) -> u32 {
        self.vertices
    }
    fn index_count(&self) -> u32 {
        self.indices
    }
}

#[derive(Debug)]
struct FakeShader {
    units: usize,
}

impl ShaderProgramResource for FakeShader {
    fn texture_unit_count(&self) -> usize {
        self.units
    }
}

#[derive(Debug)]
struct FakeRenderState;

impl RenderStateResource for FakeRenderState {}

#[derive(Debug)]
struct FakeGlobeUniforms;

impl UniformSource for FakeGlobeUniforms {}

#[derive(Debug)]
struct FakeContext {
    max_units: usize,
    textures_created: usize,
    vertex_arrays_created: usize,
}

impl FakeContext {
    fn new(max_units: usize) -> Self {
        Self {
            max_units,
            textures_created: 0,
            vertex_arrays_created: 0,
        }
    }
}

impl Context for FakeContext {
    fn maximum_texture_units(&self) -> usize {
        self.max_units
    }

    fn create_texture_2d(&mut self, image: &ImageryImage) -> Result<Texture> {
        self.textures_created += 1;
        Ok(Rc::new(FakeTexture {
            width: image.width,
            height: image.height,
        }))
    }

    fn reproject_texture(&mut self, texture: Texture, _rectangle: &Rectangle) -> Result<Texture> {
        Ok(texture)
    }

    fn create_vertex_array(&mut self, mesh: &TileMesh) -> Result<VertexArray> {
        self.vertex_arrays_created += 1;
        Ok(Rc::new(FakeVertexArray {
            vertices: mesh.positions.len() as u32,
            indices: mesh.indices.len() as u32,
        }))
    }
}

struct FakeShaderSet;

impl ShaderSet for FakeShaderSet {
    fn shader_program(&mut self, _ctx: &mut dyn Context, texture_count: usize) -> ShaderProgram {
        Rc::new(FakeShader {
            units: texture_count,
        })
    }
}

// Terrain that answers every request synchronously through the reply
// channel, so each state transition lands one frame later.
#[derive(Debug)]
struct SyncTerrain {
    scheme: TilingScheme,
    max_level: u32,
    level_zero_error: f64,
}

impl SyncTerrain {
    fn boxed(scheme: TilingScheme, max_level: u32, level_zero_error: f64) -> Box<dyn TerrainProvider> {
        Box::new(Self {
            scheme,
            max_level,
            level_zero_error,
        })
    }
}

impl TerrainProvider for SyncTerrain {
    fn tiling_scheme(&self) -> &TilingScheme {
        &self.scheme
    }

    fn max_level(&self) -> u32 {
        self.max_level
    }

    fn level_maximum_geometric_error(&self, level: u32) -> f64 {
        self.level_zero_error / (1 << level) as f64
    }

    fn request_tile_geometry(&mut self, tile: TileId, key: TileKey, reply: &TerrainSender) {
        let _ = reply.send(TerrainEnvelope {
            tile,
            key,
            reply: TerrainReply::Geometry(TileGeometry {
                data: vec![0_u8; 16],
            }),
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
                positions: vec![[0_f32; 3]; 4],
                texture_coordinates: vec![[0_f32; 2]; 4],
                indices: vec![0, 1, 2, 2, 1, 3],
                min_height: 0_f64,
                max_height: 0_f64,
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
struct SyncImagery {
    scheme: TilingScheme,
    min_level: u32,
    max_level: u32,
    ready: Rc<Cell<bool>>,
    fail_levels: HashSet<u32>,
    requests: Rc<Cell<usize>>,
}

impl SyncImagery {
    fn new(scheme: TilingScheme, max_level: u32) -> Self {
        Self {
            scheme,
            min_level: 0,
            max_level,
            ready: Rc::new(Cell::new(true)),
            fail_levels: HashSet::new(),
            requests: Rc::new(Cell::new(0)),
        }
    }

    fn failing_levels(mut self, levels: &[u32]) -> Self {
        self.fail_levels = levels.iter().copied().collect();
        self
    }

    fn ready_flag(&self) -> Rc<Cell<bool>> {
        self.ready.clone()
    }

    fn request_counter(&self) -> Rc<Cell<usize>> {
        self.requests.clone()
    }
}

impl ImageryProvider for SyncImagery {
    fn ready(&self) -> bool {
        self.ready.get()
    }

    fn tiling_scheme(&self) -> &TilingScheme {
        &self.scheme
    }

    fn min_level(&self) -> u32 {
        self.min_level
    }

    fn max_level(&self) -> u32 {
        self.max_level
    }

    fn request_imagery(&mut self, imagery: ImageryId, key: ImageryKey, reply: &ImagerySender) {
        self.requests.set(self.requests.get() + 1);
        let envelope = if self.fail_levels.contains(&key.level) {
            ImageryEnvelope {
                imagery,
                key,
                reply: ImageryReply::Failed,
            }
        } else {
            ImageryEnvelope {
                imagery,
                key,
                reply: ImageryReply::Image(ImageryImage {
                    width: 1,
                    height: 1,
                    pixels: vec![255_u8; 4],
                }),
            }
        };
        let _ = reply.send(envelope);
    }
}

struct Harness {
    surface: Surface,
    ctx: FakeContext,
    shader_set: FakeShaderSet,
    render_state: RenderState,
    globe_uniforms: GlobeUniforms,
    projection: Box<dyn MapProjection>,
    ellipsoid: Ellipsoid,
    frame_number: u64,
    camera: Cartographic,
}

impl Harness {
    fn new(surface: Surface, projection: Box<dyn MapProjection>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            surface,
            ctx: FakeContext::new(4),
            shader_set: FakeShaderSet,
            render_state: Rc::new(FakeRenderState),
            globe_uniforms: Rc::new(FakeGlobeUniforms),
            projection,
            ellipsoid: Ellipsoid::wgs84(),
            frame_number: 0,
            camera: Cartographic::from_degrees(0_f64, 0_f64, 20_000_000_f64),
        }
    }

    fn set_camera(&mut self, longitude_deg: f64, latitude_deg: f64, height: f64) {
        self.camera = Cartographic::from_degrees(longitude_deg, latitude_deg, height);
    }

    fn frame(&mut self) -> FrameState {
        self.frame_number += 1;
        let position = self.ellipsoid.cartographic_to_cartesian(&self.camera);
        let down = -self.ellipsoid.geodetic_surface_normal(&position);
        FrameState::perspective_3d(
            &self.ellipsoid,
            position,
            down,
            Vector3::z(),
            std::f64::consts::FRAC_PI_3,
            1024,
            768,
            self.frame_number,
        )
    }

    fn step(&mut self) -> Vec<DrawCommand> {
        let frame = self.frame();
        self.step_with(&frame)
    }

    fn step_with(&mut self, frame: &FrameState) -> Vec<DrawCommand> {
        let mut commands = Vec::new();
        self.surface.update(
            &mut self.ctx,
            frame,
            &*self.projection,
            &mut self.shader_set,
            &self.render_state,
            &self.globe_uniforms,
            &mut commands,
        );
        commands
    }

    // Step until every resident tile is fully loaded and the load queue is
    // empty, then take one more frame so selection sees the final state.
    // Returns the commands of that final frame.
    fn settle(&mut self, max_frames: usize) -> Vec<DrawCommand> {
        for _ in 0..max_frames {
            self.step();
            let surface = &self.surface;
            if surface.load_queue_length() == 0
                && surface
                    .resident_tiles()
                    .iter()
                    .all(|&id| surface.tile(id).done_loading())
            {
                return self.step();
            }
        }
        panic!("surface failed to settle in {max_frames} frames");
    }
}

fn mercator_surface(layer_count: usize) -> (Harness, Vec<LayerId>) {
    let mut layers = ImageryLayerCollection::new();
    let mut ids = Vec::new();
    for _ in 0..layer_count {
        ids.push(layers.add(Box::new(SyncImagery::new(TilingScheme::geographic(), 8))));
    }
    let surface = Surface::new(SurfaceOptions::new(
        SyncTerrain::boxed(TilingScheme::web_mercator(2, 1), 18, 40_000_f64),
        layers,
    ))
    .unwrap();
    let harness = Harness::new(
        surface,
        Box::new(WebMercatorProjection::new(&Ellipsoid::wgs84())),
    );
    (harness, ids)
}

// Structural invariants that must hold after any frame.
fn check_invariants(surface: &Surface) {
    // Every resident tile is reachable from a root.
    let mut reachable = HashSet::new();
    let mut stack: Vec<TileId> = surface.roots().to_vec();
    while let Some(id) = stack.pop() {
        if reachable.insert(id) {
            if let Some(children) = surface.tile(id).children() {
                stack.extend(children);
            }
        }
    }
    for id in surface.resident_tiles() {
        assert!(
            reachable.contains(&id),
            "resident tile {id:?} unreachable from the roots"
        );
    }

    // The buckets sum to the rendered count.
    let bucket_total: usize = (0..surface.render_bucket_count())
        .map(|k| surface.render_bucket(k).len())
        .sum();
    assert_eq!(bucket_total, surface.stats().tiles_rendered);

    // No rendered tile has a rendered ancestor.
    let rendered: HashSet<TileId> = surface.rendered_tiles().collect();
    for &id in &rendered {
        let mut parent = surface.tile(id).parent();
        while let Some(ancestor) = parent {
            assert!(
                !rendered.contains(&ancestor),
                "tile {id:?} rendered together with its ancestor {ancestor:?}"
            );
            parent = surface.tile(ancestor).parent();
        }
    }

    // Tiles in the load queue are not done loading.
    for id in surface.load_queue_tiles() {
        assert!(!surface.tile(id).done_loading());
    }

    // Imagery blocks are contiguous and follow collection order.
    let order = surface.layers().ordered_ids();
    for id in surface.resident_tiles() {
        let mut blocks: Vec<LayerId> = Vec::new();
        for entry in surface.tile(id).imagery() {
            if blocks.last() != Some(&entry.layer()) {
                blocks.push(entry.layer());
            }
        }
        let mut cursor = 0;
        for layer in &blocks {
            match order[cursor..].iter().position(|other| other == layer) {
                Some(offset) => cursor += offset + 1,
                None => panic!("imagery stack of {id:?} out of collection order: {blocks:?}"),
            }
        }
    }
}

type StackSnapshot = BTreeMap<(u32, u32, u32), Vec<(LayerId, ImageryKey, Option<[f64; 4]>)>>;

fn snapshot_stacks(surface: &Surface) -> StackSnapshot {
    let mut out = BTreeMap::new();
    for id in surface.resident_tiles() {
        let tile = surface.tile(id);
        let key = tile.key();
        let stack = tile
            .imagery()
            .iter()
            .map(|entry| {
                let imagery_key = *surface
                    .layers()
                    .get(entry.layer())
                    .unwrap()
                    .pool()
                    .get(entry.imagery())
                    .key();
                (entry.layer(), imagery_key, entry.translation_and_scale())
            })
            .collect();
        out.insert((key.level, key.x, key.y), stack);
    }
    out
}

#[test]
fn scenario_two_mercator_roots_render_without_refinement() {
    let (mut harness, _) = mercator_surface(1);
    harness.set_camera(0_f64, 0_f64, 20_000_000_f64);
    let commands = harness.settle(30);

    let stats = *harness.surface.stats();
    assert_eq!(stats.tiles_rendered, 2);
    assert_eq!(stats.max_depth, 0);
    assert_eq!(stats.tiles_waiting_for_children, 0);

    // One imagery texture per root: both land in bucket 1.
    assert_eq!(harness.surface.render_bucket(1).len(), 2);
    assert_eq!(harness.surface.render_bucket(0).len(), 0);

    // One command per tile, each with one texture; the pool holds exactly
    // what was emitted.
    assert_eq!(commands.len(), 2);
    assert_eq!(stats.commands_emitted, 2);
    for command in &commands {
        assert_eq!(command.uniforms.day_textures.len(), 1);
        assert_eq!(command.shader_program.texture_unit_count(), 1);
        assert!(command.bounding_volume.radius() > 0_f64);
        // Relative-to-center: the center column of the modified model view
        // is the view-space center.
        let center = command.uniforms.center_3d;
        assert!(center[0] != 0_f64 || center[1] != 0_f64 || center[2] != 0_f64);
    }

    // One texture and one vertex array per root went through the context.
    assert_eq!(harness.ctx.textures_created, 2);
    assert_eq!(harness.ctx.vertex_arrays_created, 2);

    check_invariants(&harness.surface);
}

#[test]
fn scenario_low_camera_renders_coarse_and_queues_children() {
    let (mut harness, _) = mercator_surface(1);
    harness.set_camera(0_f64, 0_f64, 20_000_000_f64);
    harness.settle(30);

    harness.set_camera(0_f64, 0_f64, 100_000_f64);
    harness.step();

    let stats = *harness.surface.stats();
    // Both roots exceed the error threshold but none of the children are
    // usable yet: render coarse, never partially refined.
    assert_eq!(stats.tiles_rendered, 2);
    assert_eq!(stats.tiles_waiting_for_children, 2);
    assert_eq!(stats.max_depth, 0);
    assert!(stats.load_queue_length >= 8, "expected the eight children queued");
    check_invariants(&harness.surface);
}

#[test]
fn scenario_layer_added_after_load() {
    let (mut harness, ids) = mercator_surface(1);
    let first = ids[0];
    harness.set_camera(0_f64, 0_f64, 20_000_000_f64);
    harness.settle(30);

    let second = harness
        .surface
        .layers_mut()
        .add(Box::new(SyncImagery::new(TilingScheme::geographic(), 8)));
    harness.step();

    // Every resident tile picked up a layer-two block behind layer one and
    // went back to loading.
    for id in harness.surface.resident_tiles() {
        let tile = harness.surface.tile(id);
        let layers: Vec<LayerId> = tile.imagery().iter().map(|entry| entry.layer()).collect();
        assert!(!layers.is_empty());
        assert!(layers.contains(&second));
        let split = layers.iter().position(|&l| l == second).unwrap();
        assert!(layers[..split].iter().all(|&l| l == first));
        assert!(layers[split..].iter().all(|&l| l == second));
        assert!(!tile.done_loading());
    }

    let commands = harness.settle(30);
    assert_eq!(harness.surface.render_bucket(2).len(), 2);
    assert_eq!(commands.len(), 2);
    for command in &commands {
        assert_eq!(command.uniforms.day_textures.len(), 2);
    }
    check_invariants(&harness.surface);
}

#[test]
fn layer_inserted_at_front_reorders_stacks() {
    let (mut harness, ids) = mercator_surface(1);
    harness.settle(30);

    let inserted = harness
        .surface
        .layers_mut()
        .insert(0, Box::new(SyncImagery::new(TilingScheme::geographic(), 8)));
    harness.step();

    for id in harness.surface.resident_tiles() {
        let layers: Vec<LayerId> = harness
            .surface
            .tile(id)
            .imagery()
            .iter()
            .map(|entry| entry.layer())
            .collect();
        // The inserted layer's block comes first, matching collection order.
        assert_eq!(layers.first(), Some(&inserted));
        assert!(layers.contains(&ids[0]));
    }
    harness.settle(30);
    check_invariants(&harness.surface);
}

#[test]
fn scenario_layer_removed() {
    let (mut harness, ids) = mercator_surface(2);
    harness.settle(40);
    assert_eq!(harness.surface.render_bucket(2).len(), 2);

    assert!(harness.surface.layers_mut().remove(ids[0]));
    harness.step();

    for id in harness.surface.resident_tiles() {
        let tile = harness.surface.tile(id);
        assert!(!tile.imagery().is_empty());
        assert!(tile.imagery().iter().all(|entry| entry.layer() == ids[1]));
    }

    // Removing the last layer empties the stacks and clears renderable.
    assert!(harness.surface.layers_mut().remove(ids[1]));
    harness.step();
    for id in harness.surface.resident_tiles() {
        let tile = harness.surface.tile(id);
        assert!(tile.imagery().is_empty());
        assert!(!tile.renderable());
    }
    let commands = harness.step();
    assert!(commands.is_empty());
    check_invariants(&harness.surface);
}

#[test]
fn scenario_failed_imagery_falls_back_to_parent() {
    // Terrain tiles a quarter of the imagery's level-zero width force the
    // skeletons to imagery level one, whose requests all fail.
    let mut layers = ImageryLayerCollection::new();
    let layer =
        layers.add(Box::new(
            SyncImagery::new(TilingScheme::geographic(), 8).failing_levels(&[1]),
        ));
    let surface = Surface::new(SurfaceOptions::new(
        SyncTerrain::boxed(TilingScheme::web_mercator(4, 1), 18, 1_000_f64),
        layers,
    ))
    .unwrap();
    let mut harness = Harness::new(
        surface,
        Box::new(WebMercatorProjection::new(&Ellipsoid::wgs84())),
    );
    harness.set_camera(0_f64, 0_f64, 20_000_000_f64);
    harness.settle(40);

    let pool_layer = harness.surface.layers().get(layer).unwrap();
    let mut fallbacks = 0;
    for id in harness.surface.resident_tiles() {
        for entry in harness.surface.tile(id).imagery() {
            let original = entry
                .original_imagery()
                .expect("failed imagery should be retained as original");
            let substitute = pool_layer.pool().get(entry.imagery());
            // The failed original stays referenced; a level-zero ancestor
            // serves the texture.
            assert!(pool_layer.pool().get(original).reference_count() >= 1);
            assert!(matches!(
                pool_layer.pool().get(original).state(),
                ImageryState::Failed
            ));
            assert_eq!(substitute.key().level, 0);
            assert_eq!(substitute.state(), ImageryState::Ready);

            // Translation/scale is computed against the substitute's
            // extent: a quarter-width tile in a half-globe texture.
            let translation_and_scale = entry
                .translation_and_scale()
                .expect("ready substitute must have translation and scale");
            approx::assert_relative_eq!(translation_and_scale[2], 0.5, epsilon = 1e-12);
            fallbacks += 1;
        }
    }
    assert!(fallbacks > 0);
    check_invariants(&harness.surface);
}

#[test]
fn scenario_trim_evicts_stale_subtrees() {
    let mut layers = ImageryLayerCollection::new();
    layers.add(Box::new(SyncImagery::new(TilingScheme::geographic(), 8)));
    let mut options = SurfaceOptions::new(
        SyncTerrain::boxed(TilingScheme::web_mercator(2, 1), 2, 40_000_f64),
        layers,
    );
    options.tile_cache_floor = 6;
    let surface = Surface::new(options).unwrap();
    let mut harness = Harness::new(
        surface,
        Box::new(WebMercatorProjection::new(&Ellipsoid::wgs84())),
    );

    // Phase A: a deep cut near the prime meridian. A small cache floor
    // keeps loads and evictions flowing, so the queue is not expected to
    // drain; run a fixed number of frames instead.
    harness.set_camera(-1_f64, 0_f64, 100_000_f64);
    for _ in 0..40 {
        harness.step();
    }
    let stale_key = *harness
        .surface
        .rendered_tiles()
        .map(|id| harness.surface.tile(id).key())
        .find(|key| key.level >= 2)
        .expect("phase A should render deep tiles");

    // Phase B: the far side of the planet. The stale subtree's parent now
    // sits below the error threshold, so the subtree is never re-requested
    // and the new loads trim it out of the cache.
    harness.set_camera(120_f64, 10_f64, 100_000_f64);
    for _ in 0..40 {
        harness.step();
    }

    assert!(harness
        .surface
        .resident_tiles()
        .iter()
        .all(|&id| *harness.surface.tile(id).key() != stale_key));
    // Roots are pinned through it all.
    for &root in harness.surface.roots() {
        assert!(harness.surface.resident_tiles().contains(&root));
    }
    check_invariants(&harness.surface);
}

#[test]
fn max_level_tile_never_refines() {
    let mut layers = ImageryLayerCollection::new();
    layers.add(Box::new(SyncImagery::new(TilingScheme::geographic(), 8)));
    let surface = Surface::new(SurfaceOptions::new(
        SyncTerrain::boxed(TilingScheme::web_mercator(2, 1), 0, 40_000_f64),
        layers,
    ))
    .unwrap();
    let mut harness = Harness::new(
        surface,
        Box::new(WebMercatorProjection::new(&Ellipsoid::wgs84())),
    );
    harness.set_camera(0_f64, 0_f64, 100_000_f64);
    harness.settle(30);

    let stats = *harness.surface.stats();
    assert_eq!(stats.tiles_rendered, 2);
    assert_eq!(stats.max_depth, 0);
    assert_eq!(stats.tiles_waiting_for_children, 0);
    for &root in harness.surface.roots() {
        assert!(harness.surface.tile(root).children().is_none());
    }
    check_invariants(&harness.surface);
}

#[test]
fn untextured_surface_renders_bucket_zero() {
    let surface = Surface::new(SurfaceOptions::new(
        SyncTerrain::boxed(TilingScheme::web_mercator(2, 1), 18, 40_000_f64),
        ImageryLayerCollection::new(),
    ))
    .unwrap();
    let mut harness = Harness::new(
        surface,
        Box::new(WebMercatorProjection::new(&Ellipsoid::wgs84())),
    );
    harness.set_camera(0_f64, 0_f64, 20_000_000_f64);
    let commands = harness.settle(30);

    assert_eq!(harness.surface.render_bucket(0).len(), 2);
    assert_eq!(commands.len(), 2);
    for command in &commands {
        assert!(command.uniforms.day_textures.is_empty());
        assert_eq!(command.shader_program.texture_unit_count(), 0);
    }
    check_invariants(&harness.surface);
}

#[test]
fn placeholder_imagery_expands_when_provider_becomes_ready() {
    let provider = SyncImagery::new(TilingScheme::geographic(), 8);
    let ready = provider.ready_flag();
    ready.set(false);
    let mut layers = ImageryLayerCollection::new();
    layers.add(Box::new(provider));
    let surface = Surface::new(SurfaceOptions::new(
        SyncTerrain::boxed(TilingScheme::web_mercator(2, 1), 18, 40_000_f64),
        layers,
    ))
    .unwrap();
    let mut harness = Harness::new(
        surface,
        Box::new(WebMercatorProjection::new(&Ellipsoid::wgs84())),
    );
    harness.set_camera(0_f64, 0_f64, 20_000_000_f64);

    for _ in 0..10 {
        harness.step();
    }
    // Terrain is long since ready, but the placeholder keeps the tiles
    // unrenderable and loading.
    assert_eq!(harness.surface.stats().tiles_rendered, 0);
    assert!(harness.surface.load_queue_length() > 0);

    ready.set(true);
    let commands = harness.settle(30);
    assert_eq!(harness.surface.stats().tiles_rendered, 2);
    assert_eq!(commands.len(), 2);
    for command in &commands {
        assert_eq!(command.uniforms.day_textures.len(), 1);
    }
    check_invariants(&harness.surface);
}

#[test]
fn law_move_to_same_index_is_identity() {
    let (mut harness, ids) = mercator_surface(2);
    harness.settle(40);

    let before = snapshot_stacks(&harness.surface);
    let index = harness.surface.layers().index_of(ids[0]).unwrap();
    assert!(harness.surface.layers_mut().move_layer(ids[0], index));
    harness.step();
    assert_eq!(snapshot_stacks(&harness.surface), before);
}

#[test]
fn law_move_swaps_blocks() {
    let (mut harness, ids) = mercator_surface(2);
    harness.settle(40);

    assert!(harness.surface.layers_mut().move_layer(ids[1], 0));
    harness.step();
    for id in harness.surface.resident_tiles() {
        let layers: Vec<LayerId> = harness
            .surface
            .tile(id)
            .imagery()
            .iter()
            .map(|entry| entry.layer())
            .collect();
        let split = layers.iter().position(|&l| l == ids[0]).unwrap();
        assert!(layers[..split].iter().all(|&l| l == ids[1]));
        assert!(layers[split..].iter().all(|&l| l == ids[0]));
    }
    check_invariants(&harness.surface);
}

#[test]
fn law_add_then_remove_restores_stacks() {
    let (mut harness, _) = mercator_surface(1);
    harness.settle(30);
    let before = snapshot_stacks(&harness.surface);

    let second = harness
        .surface
        .layers_mut()
        .add(Box::new(SyncImagery::new(TilingScheme::geographic(), 8)));
    harness.settle(30);
    assert_ne!(snapshot_stacks(&harness.surface), before);

    assert!(harness.surface.layers_mut().remove(second));
    harness.settle(30);
    assert_eq!(snapshot_stacks(&harness.surface), before);
    for id in harness.surface.resident_tiles() {
        assert!(harness.surface.tile(id).done_loading());
    }
    check_invariants(&harness.surface);
}

#[test]
fn two_dimensional_mode_emits_mercator_precision_uniforms() {
    let (mut harness, _) = mercator_surface(1);
    harness.settle(30);

    let frame = FrameState {
        mode: SceneMode::Scene2D,
        frame_number: harness.frame_number + 1,
        camera_position: Point3::new(0_f64, 0_f64, 1e7),
        camera_position_cartographic: Cartographic::default(),
        culling_volume: CullingVolume::infinite(),
        viewport_width: 1024,
        viewport_height: 768,
        fovy: std::f64::consts::FRAC_PI_3,
        frustum_width: 4e7,
        frustum_height: 3e7,
        view_matrix: Matrix4::identity(),
        projection_matrix: Matrix4::identity(),
    };
    harness.frame_number += 1;
    let commands = harness.step_with(&frame);

    assert_eq!(commands.len(), 2);
    for command in &commands {
        let uniforms = &command.uniforms;
        // The projected extent brackets the relative-to-center origin.
        assert!(uniforms.tile_rectangle[0] < 0_f64);
        assert!(uniforms.tile_rectangle[2] > 0_f64);
        assert!(uniforms.one_over_mercator_height > 0_f32);
        assert!(uniforms.south_and_north_latitude[0] < uniforms.south_and_north_latitude[1]);
        // High + low reconstructs the mercator angle of the southern edge.
        let reconstructed =
            uniforms.south_mercator_y_high as f64 + uniforms.south_mercator_y_low as f64;
        let expected = WebMercatorProjection::geodetic_latitude_to_mercator_angle(
            uniforms.south_and_north_latitude[0] as f64,
        );
        approx::assert_relative_eq!(reconstructed, expected, epsilon = 1e-4);
    }
    check_invariants(&harness.surface);
}

#[test]
fn morphing_mode_updates_without_panic() {
    let (mut harness, _) = mercator_surface(1);
    harness.settle(30);

    let mut frame = harness.frame();
    frame.mode = SceneMode::Morphing;
    let commands = harness.step_with(&frame);
    assert!(!commands.is_empty());
}

#[test]
fn frozen_lod_keeps_previous_selection() {
    let (mut harness, _) = mercator_surface(1);
    harness.settle(30);
    let rendered_before: Vec<TileId> = harness.surface.rendered_tiles().collect();
    assert!(!rendered_before.is_empty());

    harness.surface.toggle_lod_update();
    assert!(harness.surface.lod_update_suspended());
    // Selection is frozen: a drastically different camera does not change
    // the selected set.
    harness.set_camera(0_f64, 0_f64, 100_000_f64);
    harness.step();
    let rendered_after: Vec<TileId> = harness.surface.rendered_tiles().collect();
    assert_eq!(rendered_before, rendered_after);

    harness.surface.toggle_lod_update();
    harness.step();
    assert!(harness.surface.stats().tiles_waiting_for_children > 0);
}

#[test]
fn debug_bounding_sphere_finds_rendered_tile() {
    let (mut harness, _) = mercator_surface(1);
    harness.settle(30);
    let pick = Cartographic::from_degrees(-45_f64, 10_f64, 0_f64);
    let sphere = harness.surface.debug_bounding_sphere_at(&pick);
    assert!(sphere.is_some());
    assert!(sphere.unwrap().radius() > 0_f64);
    assert!(harness
        .surface
        .debug_bounding_sphere_at(&Cartographic::from_degrees(0_f64, 89_f64, 0_f64))
        .is_none());
}

#[test]
fn imagery_requests_are_shared_between_tiles() {
    // Both roots of a 2x1 geographic terrain draped with a single-tile
    // mercator imagery pyramid share the level-zero imagery tile.
    let provider = SyncImagery::new(TilingScheme::web_mercator(1, 1), 0);
    let counter = provider.request_counter();
    let mut layers = ImageryLayerCollection::new();
    layers.add(Box::new(provider));
    let surface = Surface::new(SurfaceOptions::new(
        SyncTerrain::boxed(TilingScheme::geographic(), 18, 40_000_f64),
        layers,
    ))
    .unwrap();
    let mut harness = Harness::new(
        surface,
        Box::new(GeographicProjection::new(&Ellipsoid::wgs84())),
    );
    harness.set_camera(0_f64, 0_f64, 20_000_000_f64);
    harness.settle(30);

    assert_eq!(harness.surface.stats().tiles_rendered, 2);
    assert_eq!(counter.get(), 1, "shared imagery must be requested once");
    check_invariants(&harness.surface);
}

#[test]
fn imagery_batches_split_on_texture_unit_limit() {
    let (mut harness, _) = mercator_surface(3);
    harness.ctx.max_units = 2;
    harness.set_camera(0_f64, 0_f64, 20_000_000_f64);
    let commands = harness.settle(60);

    // Three ready textures over two units: two commands per tile.
    assert_eq!(harness.surface.render_bucket(3).len(), 2);
    assert_eq!(commands.len(), 4);
    let mut full = 0;
    let mut partial = 0;
    for command in &commands {
        match command.uniforms.day_textures.len() {
            2 => full += 1,
            1 => partial += 1,
            other => panic!("unexpected batch size {other}"),
        }
    }
    assert_eq!(full, 2);
    assert_eq!(partial, 2);
    check_invariants(&harness.surface);
}
