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
mod collection;
mod layer;
mod tile_imagery;

pub use collection::{ImageryLayerCollection, LayerChange};
pub use layer::{ImageryLayer, LayerId};
pub use tile_imagery::TileImagery;

use crate::{
    provider::{ImageryImage, TilingScheme},
    render::Texture,
    tile::TileKey,
};
use fxhash::FxHashMap;
use geom::Rectangle;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ImageryKey {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl ImageryKey {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    fn parent(&self) -> Self {
        Self {
            level: self.level - 1,
            x: self.x / 2,
            y: self.y / 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ImageryId {
    id: u32,
}

impl ImageryId {
    fn new(id: usize) -> Self {
        assert!(id < u32::MAX as usize);
        Self { id: id as u32 }
    }

    fn offset(&self) -> usize {
        self.id as usize
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageryState {
    Placeholder,
    Unloaded,
    Transitioning,
    Received,
    TextureLoaded,
    Ready,
    Failed,
    Invalid,
}

// One texture tile in a layer's pyramid. Shared between terrain tiles and,
// through the parent chain, between levels for fallback.
#[derive(Debug)]
pub struct Imagery {
    pub(crate) key: ImageryKey,
    pub(crate) state: ImageryState,
    pub(crate) parent: Option<ImageryId>,
    pub(crate) rectangle: Rectangle,
    pub(crate) image: Option<ImageryImage>,
    pub(crate) texture: Option<Texture>,
    pub(crate) reference_count: u32,
}

impl Imagery {
    pub fn state(&self) -> ImageryState {
        self.state
    }

    pub fn key(&self) -> &ImageryKey {
        &self.key
    }

    pub fn parent(&self) -> Option<ImageryId> {
        self.parent
    }

    pub fn rectangle(&self) -> &Rectangle {
        &self.rectangle
    }

    pub fn texture(&self) -> Option<&Texture> {
        self.texture.as_ref()
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }
}

// Arena of Imagery slots with a coordinate cache so that the same pyramid
// tile is shared rather than re-fetched. Slots recycle when the last
// reference is released.
#[derive(Debug, Default)]
pub struct ImageryPool {
    slots: Vec<Option<Imagery>>,
    free: Vec<u32>,
    cache: FxHashMap<ImageryKey, ImageryId>,
    occupied: usize,
}

impl ImageryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn get(&self, id: ImageryId) -> &Imagery {
        match &self.slots[id.offset()] {
            Some(imagery) => imagery,
            None => panic!("imagery slot {id:?} is free"),
        }
    }

    pub fn get_mut(&mut self, id: ImageryId) -> &mut Imagery {
        match &mut self.slots[id.offset()] {
            Some(imagery) => imagery,
            None => panic!("imagery slot {id:?} is free"),
        }
    }

    pub fn matches(&self, id: ImageryId, key: &ImageryKey) -> bool {
        id.offset() < self.slots.len()
            && matches!(&self.slots[id.offset()], Some(imagery) if imagery.key == *key)
    }

    // Fetch from the cache or create, materializing the ancestor chain down
    // to `min_level` so failure fallback always has somewhere to go. Each
    // created child holds one reference on its parent.
    pub fn get_or_create(
        &mut self,
        key: ImageryKey,
        scheme: &TilingScheme,
        min_level: u32,
    ) -> ImageryId {
        if let Some(&id) = self.cache.get(&key) {
            return id;
        }
        let parent = if key.level > min_level {
            let parent = self.get_or_create(key.parent(), scheme, min_level);
            self.add_reference(parent);
            Some(parent)
        } else {
            None
        };
        let rectangle = scheme.tile_rectangle(&TileKey::new(key.level, key.x, key.y));
        let id = self.insert(Imagery {
            key,
            state: ImageryState::Unloaded,
            parent,
            rectangle,
            image: None,
            texture: None,
            reference_count: 0,
        });
        self.cache.insert(key, id);
        id
    }

    // A placeholder stands in for real skeletons until the provider reports
    // ready. It never enters the coordinate cache.
    pub fn create_placeholder(&mut self, rectangle: Rectangle) -> ImageryId {
        self.insert(Imagery {
            key: ImageryKey::new(0, 0, 0),
            state: ImageryState::Placeholder,
            parent: None,
            rectangle,
            image: None,
            texture: None,
            reference_count: 0,
        })
    }

    pub fn add_reference(&mut self, id: ImageryId) {
        self.get_mut(id).reference_count += 1;
    }

    pub fn release_reference(&mut self, id: ImageryId) {
        let imagery = self.get_mut(id);
        assert!(imagery.reference_count > 0, "double release of {id:?}");
        imagery.reference_count -= 1;
        if imagery.reference_count > 0 {
            return;
        }
        let key = imagery.key;
        let parent = imagery.parent;
        if self.cache.get(&key) == Some(&id) {
            self.cache.remove(&key);
        }
        self.slots[id.offset()] = None;
        self.free.push(id.id);
        self.occupied -= 1;
        if let Some(parent) = parent {
            self.release_reference(parent);
        }
    }

    fn insert(&mut self, imagery: Imagery) -> ImageryId {
        self.occupied += 1;
        if let Some(index) = self.free.pop() {
            let id = ImageryId { id: index };
            self.slots[id.offset()] = Some(imagery);
            return id;
        }
        let id = ImageryId::new(self.slots.len());
        self.slots.push(Some(imagery));
        id
    }
}
