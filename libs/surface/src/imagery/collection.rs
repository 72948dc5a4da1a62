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
    imagery::{ImageryLayer, LayerId, TileImagery},
    provider::ImageryProvider,
};
use log::debug;
use std::collections::VecDeque;

// Mutations are recorded here and applied to resident tiles when the
// surface next updates; the collection itself only reorders its list.
#[derive(Debug)]
pub enum LayerChange {
    Added { layer: LayerId, index: usize },
    // Carries the removed layer so tile references can be released into its
    // pool before the storage drops.
    Removed { layer: ImageryLayer },
    Moved { layer: LayerId, old_index: usize, new_index: usize },
}

// Ordered list of imagery layers, bottom first. The draw order of imagery
// on every tile follows this order.
#[derive(Debug, Default)]
pub struct ImageryLayerCollection {
    layers: Vec<ImageryLayer>,
    next_id: u32,
    changes: VecDeque<LayerChange>,
}

impl ImageryLayerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn add(&mut self, provider: Box<dyn ImageryProvider>) -> LayerId {
        let index = self.layers.len();
        self.insert(index, provider)
    }

    pub fn insert(&mut self, index: usize, provider: Box<dyn ImageryProvider>) -> LayerId {
        assert!(index <= self.layers.len());
        let id = LayerId::new(self.next_id);
        self.next_id += 1;
        self.layers.insert(index, ImageryLayer::new(id, provider));
        self.changes.push_back(LayerChange::Added { layer: id, index });
        debug!("added {id} at index {index}");
        id
    }

    pub fn remove(&mut self, id: LayerId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let layer = self.layers.remove(index);
        debug!("removed {id} from index {index}");
        self.changes.push_back(LayerChange::Removed { layer });
        true
    }

    pub fn move_layer(&mut self, id: LayerId, new_index: usize) -> bool {
        let Some(old_index) = self.index_of(id) else {
            return false;
        };
        assert!(new_index < self.layers.len());
        if old_index == new_index {
            return true;
        }
        let layer = self.layers.remove(old_index);
        self.layers.insert(new_index, layer);
        debug!("moved {id} from index {old_index} to {new_index}");
        self.changes.push_back(LayerChange::Moved {
            layer: id,
            old_index,
            new_index,
        });
        true
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id() == id)
    }

    pub fn get(&self, id: LayerId) -> Option<&ImageryLayer> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut ImageryLayer> {
        self.layers.iter_mut().find(|layer| layer.id() == id)
    }

    pub fn by_index(&self, index: usize) -> &ImageryLayer {
        &self.layers[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageryLayer> {
        self.layers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ImageryLayer> {
        self.layers.iter_mut()
    }

    pub fn ordered_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|layer| layer.id()).collect()
    }

    // The layer drawn immediately above `id`, if any.
    pub(crate) fn layer_after(&self, id: LayerId) -> Option<LayerId> {
        let index = self.index_of(id)?;
        self.layers.get(index + 1).map(|layer| layer.id())
    }

    pub(crate) fn drain_changes(&mut self) -> Vec<LayerChange> {
        self.changes.drain(..).collect()
    }

    pub(crate) fn release_tile_imagery(&mut self, tile_imagery: &TileImagery) {
        if let Some(layer) = self.get_mut(tile_imagery.layer) {
            layer.pool_mut().release_reference(tile_imagery.imagery);
            if let Some(original) = tile_imagery.original_imagery {
                layer.pool_mut().release_reference(original);
            }
        }
    }
}
