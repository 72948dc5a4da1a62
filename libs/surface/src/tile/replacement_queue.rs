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
    imagery::ImageryLayerCollection,
    tile::{free_tile_resources, load_queue::TileLoadQueue, TileArena, TileId},
};
use log::debug;

// Intrusive LRU over resident tiles. Head is most recently used. Trimming
// walks from the tail and never touches tiles stamped with the current
// frame, nor level-zero roots, which are pinned.
#[derive(Debug, Default)]
pub(crate) struct TileReplacementQueue {
    head: Option<TileId>,
    tail: Option<TileId>,
    count: usize,
    current_frame: u64,
}

impl TileReplacementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn head(&self) -> Option<TileId> {
        self.head
    }

    pub fn mark_start_of_render_frame(&mut self, frame: u64) {
        self.current_frame = frame;
    }

    pub fn contains(&self, tiles: &TileArena, id: TileId) -> bool {
        let tile = tiles.get(id);
        tile.replacement_prev.is_some() || tile.replacement_next.is_some() || self.head == Some(id)
    }

    // Unlink if linked, push to the head, and stamp the current frame.
    pub fn mark_tile_rendered(&mut self, tiles: &mut TileArena, id: TileId) {
        tiles.get_mut(id).last_selection_frame = self.current_frame;
        if self.head == Some(id) {
            return;
        }
        if self.contains(tiles, id) {
            self.unlink(tiles, id);
        }
        let old_head = self.head;
        {
            let tile = tiles.get_mut(id);
            tile.replacement_prev = None;
            tile.replacement_next = old_head;
        }
        match old_head {
            Some(old_head) => tiles.get_mut(old_head).replacement_prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.count += 1;
    }

    pub fn remove(&mut self, tiles: &mut TileArena, id: TileId) {
        if !self.contains(tiles, id) {
            return;
        }
        self.unlink(tiles, id);
    }

    // Evict least-recently-used tiles until at most `keep_count` remain.
    // Eviction frees the whole subtree below the victim, so the walk
    // restarts from the tail after each hit rather than trusting links
    // captured before the teardown.
    pub fn trim_tiles(
        &mut self,
        tiles: &mut TileArena,
        layers: &mut ImageryLayerCollection,
        load_queue: &mut TileLoadQueue,
        keep_count: usize,
    ) {
        'trim: while self.count > keep_count {
            let mut cursor = self.tail;
            while let Some(id) = cursor {
                let tile = tiles.get(id);
                let pinned_root = tile.parent.is_none();
                let touched_this_frame = tile.last_selection_frame == self.current_frame;
                cursor = tile.replacement_prev;
                if pinned_root || touched_this_frame {
                    continue;
                }
                debug!(
                    "evicting tile L{} ({}, {})",
                    tile.key.level, tile.key.x, tile.key.y
                );
                self.unlink(tiles, id);
                load_queue.remove(tiles, id);
                free_tile_resources(tiles, layers, load_queue, self, id);
                continue 'trim;
            }
            // Everything left is pinned or in use this frame.
            break;
        }
    }

    pub fn collect_ids(&self, tiles: &TileArena) -> Vec<TileId> {
        let mut out = Vec::with_capacity(self.count);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            out.push(id);
            cursor = tiles.get(id).replacement_next;
        }
        out
    }

    fn unlink(&mut self, tiles: &mut TileArena, id: TileId) {
        let (prev, next) = {
            let tile = tiles.get_mut(id);
            let links = (tile.replacement_prev, tile.replacement_next);
            tile.replacement_prev = None;
            tile.replacement_next = None;
            links
        };
        match prev {
            Some(prev) => tiles.get_mut(prev).replacement_next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => tiles.get_mut(next).replacement_prev = prev,
            None => self.tail = prev,
        }
        self.count -= 1;
    }
}
