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
    imagery::{ImageryId, ImageryKey, ImageryPool, ImageryState, TileImagery},
    provider::{
        ImageryProvider, ImageryReceiver, ImageryReply, ImagerySender, TerrainProvider,
    },
    render::Context,
    tile::{Tile, TileKey},
};
use crossbeam::channel::unbounded;
use geom::{Cartographic, Rectangle};
use log::{trace, warn};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LayerId {
    id: u32,
}

impl LayerId {
    pub(crate) fn new(id: u32) -> Self {
        Self { id }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "layer-{}", self.id)
    }
}

// One imagery source draped over the terrain. Owns the pyramid pool for its
// provider and the inbox its async replies arrive on.
#[derive(Debug)]
pub struct ImageryLayer {
    id: LayerId,
    provider: Box<dyn ImageryProvider>,
    pool: ImageryPool,
    placeholder: Option<ImageryId>,
    alpha: f32,
    sender: ImagerySender,
    receiver: ImageryReceiver,
}

impl ImageryLayer {
    pub(crate) fn new(id: LayerId, provider: Box<dyn ImageryProvider>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            id,
            provider,
            pool: ImageryPool::new(),
            placeholder: None,
            alpha: 1_f32,
            sender,
            receiver,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0_f32, 1_f32);
    }

    pub fn provider(&self) -> &dyn ImageryProvider {
        &*self.provider
    }

    pub fn pool(&self) -> &ImageryPool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut ImageryPool {
        &mut self.pool
    }

    // Populate `tile` with the imagery tiles of this layer that cover it.
    // Entries are inserted contiguously at `insert_at` (or appended) so the
    // per-layer grouping of the stack is preserved. Returns whether anything
    // was inserted.
    pub(crate) fn create_tile_imagery_skeletons(
        &mut self,
        tile: &mut Tile,
        terrain_provider: &dyn TerrainProvider,
        insert_at: Option<usize>,
    ) -> bool {
        let mut position = insert_at.unwrap_or(tile.imagery.len());

        if !self.provider.ready() {
            // Cannot pick levels yet; leave a placeholder to re-expand once
            // the provider comes up.
            let placeholder = match self.placeholder {
                Some(placeholder) => placeholder,
                None => {
                    let placeholder = self.pool.create_placeholder(Rectangle::MAX_VALUE);
                    // The layer keeps its own reference so the slot stays
                    // valid across provider readiness flaps.
                    self.pool.add_reference(placeholder);
                    self.placeholder = Some(placeholder);
                    placeholder
                }
            };
            self.pool.add_reference(placeholder);
            tile.imagery.insert(
                position,
                TileImagery::new(self.id, placeholder, [0_f64, 0_f64, 1_f64, 1_f64]),
            );
            return true;
        }

        let scheme = self.provider.tiling_scheme().clone();
        let Some(overlap) = tile.rectangle.intersection(scheme.rectangle()) else {
            return false;
        };

        // Pick the imagery level whose tiles are no coarser than the
        // terrain tile itself.
        let target_width = terrain_provider
            .tiling_scheme()
            .tile_angular_width(tile.key.level);
        let mut level = self.provider.min_level();
        while scheme.tile_angular_width(level) > target_width && level < self.provider.max_level()
        {
            level += 1;
        }

        // Walk the covering block of imagery tiles. The inset keeps shared
        // edges from picking up a zero-width neighbor row or column.
        let inset_lon = tile.rectangle.width() / 512_f64;
        let inset_lat = tile.rectangle.height() / 512_f64;
        let Some(northwest) = scheme.position_to_key(
            &Cartographic::new(overlap.west + inset_lon, overlap.north - inset_lat, 0_f64),
            level,
        ) else {
            return false;
        };
        let Some(southeast) = scheme.position_to_key(
            &Cartographic::new(overlap.east - inset_lon, overlap.south + inset_lat, 0_f64),
            level,
        ) else {
            return false;
        };

        let mut created = false;
        for y in northwest.y..=southeast.y {
            for x in northwest.x..=southeast.x {
                let key = ImageryKey::new(level, x, y);
                let imagery_rectangle = scheme.tile_rectangle(&TileKey::new(level, x, y));
                let Some(clipped) = imagery_rectangle.intersection(&tile.rectangle) else {
                    continue;
                };
                let tex = [
                    (clipped.west - tile.rectangle.west) / tile.rectangle.width(),
                    (clipped.south - tile.rectangle.south) / tile.rectangle.height(),
                    (clipped.east - tile.rectangle.west) / tile.rectangle.width(),
                    (clipped.north - tile.rectangle.south) / tile.rectangle.height(),
                ];
                let imagery = self.pool.get_or_create(key, &scheme, self.provider.min_level());
                self.pool.add_reference(imagery);
                tile.imagery
                    .insert(position, TileImagery::new(self.id, imagery, tex));
                position += 1;
                created = true;
            }
        }
        trace!(
            "{}: created skeletons at imagery level {} for tile L{} ({}, {})",
            self.id,
            level,
            tile.key.level,
            tile.key.x,
            tile.key.y
        );
        created
    }

    pub(crate) fn provider_ready(&self) -> bool {
        self.provider.ready()
    }

    pub(crate) fn request_imagery(&mut self, id: ImageryId) {
        let imagery = self.pool.get_mut(id);
        imagery.state = ImageryState::Transitioning;
        let key = imagery.key;
        self.provider.request_imagery(id, key, &self.sender);
    }

    pub(crate) fn create_texture(&mut self, ctx: &mut dyn Context, id: ImageryId) {
        let imagery = self.pool.get_mut(id);
        let Some(image) = imagery.image.take() else {
            warn!("{}: imagery {:?} received with no pixels", self.id, imagery.key);
            imagery.state = ImageryState::Failed;
            return;
        };
        match ctx.create_texture_2d(&image) {
            Ok(texture) => {
                imagery.texture = Some(texture);
                imagery.state = ImageryState::TextureLoaded;
            }
            Err(err) => {
                warn!("{}: texture creation failed: {err:#}", self.id);
                imagery.state = ImageryState::Failed;
            }
        }
    }

    pub(crate) fn reproject_texture(&mut self, ctx: &mut dyn Context, id: ImageryId) {
        let imagery = self.pool.get_mut(id);
        let rectangle = imagery.rectangle;
        let Some(texture) = imagery.texture.take() else {
            imagery.state = ImageryState::Failed;
            return;
        };
        match ctx.reproject_texture(texture, &rectangle) {
            Ok(texture) => {
                imagery.texture = Some(texture);
                imagery.state = ImageryState::Ready;
            }
            Err(err) => {
                warn!("{}: reprojection failed: {err:#}", self.id);
                imagery.state = ImageryState::Failed;
            }
        }
    }

    // Apply async replies. Envelopes for recycled slots or tiles no longer
    // in flight are dropped.
    pub(crate) fn drain_inbox(&mut self) {
        while let Ok(envelope) = self.receiver.try_recv() {
            if !self.pool.matches(envelope.imagery, &envelope.key) {
                trace!("{}: dropping stale imagery reply for {:?}", self.id, envelope.key);
                continue;
            }
            let imagery = self.pool.get_mut(envelope.imagery);
            if imagery.state != ImageryState::Transitioning {
                trace!(
                    "{}: dropping reply for {:?} in state {:?}",
                    self.id,
                    envelope.key,
                    imagery.state
                );
                continue;
            }
            match envelope.reply {
                ImageryReply::Image(image) => {
                    imagery.image = Some(image);
                    imagery.state = ImageryState::Received;
                }
                ImageryReply::Failed => imagery.state = ImageryState::Failed,
                ImageryReply::Invalid => imagery.state = ImageryState::Invalid,
            }
        }
    }

    // Maps imagery texture coordinates into the tile's coordinate space:
    // (translation, translation, scale, scale) in tile UV units.
    pub fn calculate_texture_translation_and_scale(
        tile_rectangle: &Rectangle,
        imagery_rectangle: &Rectangle,
    ) -> [f64; 4] {
        let tile_width = tile_rectangle.width();
        let tile_height = tile_rectangle.height();
        let scale_x = tile_width / imagery_rectangle.width();
        let scale_y = tile_height / imagery_rectangle.height();
        [
            scale_x * (tile_rectangle.west - imagery_rectangle.west) / tile_width,
            scale_y * (tile_rectangle.south - imagery_rectangle.south) / tile_height,
            scale_x,
            scale_y,
        ]
    }
}
