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
use crate::tile::{TileArena, TileId};

// Intrusive list of tiles with outstanding load work. The insertion point
// is re-marked at the head each frame, so tiles requested this frame land
// ahead of carryover from earlier frames while keeping within-frame order.
// The queue links tiles; it never owns them.
#[derive(Debug, Default)]
pub(crate) struct TileLoadQueue {
    head: Option<TileId>,
    tail: Option<TileId>,
    insertion_point: Option<TileId>,
    count: usize,
}

impl TileLoadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<TileId> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, tiles: &TileArena, id: TileId) -> bool {
        let tile = tiles.get(id);
        tile.load_prev.is_some() || tile.load_next.is_some() || self.head == Some(id)
    }

    pub fn mark_insertion_point(&mut self) {
        self.insertion_point = self.head;
    }

    pub fn remove(&mut self, tiles: &mut TileArena, id: TileId) {
        if !self.contains(tiles, id) {
            return;
        }
        if self.insertion_point == Some(id) {
            self.insertion_point = tiles.get(id).load_next;
        }
        self.unlink(tiles, id);
    }

    pub fn insert_before_insertion_point(&mut self, tiles: &mut TileArena, id: TileId) {
        if self.insertion_point == Some(id) {
            return;
        }
        if self.contains(tiles, id) {
            self.unlink(tiles, id);
        }

        match self.insertion_point {
            None => {
                // No marker (or the marker was consumed): append at the tail.
                let tile = tiles.get_mut(id);
                tile.load_prev = self.tail;
                tile.load_next = None;
                match self.tail {
                    Some(tail) => tiles.get_mut(tail).load_next = Some(id),
                    None => self.head = Some(id),
                }
                self.tail = Some(id);
            }
            Some(anchor) => {
                let before = tiles.get(anchor).load_prev;
                {
                    let tile = tiles.get_mut(id);
                    tile.load_prev = before;
                    tile.load_next = Some(anchor);
                }
                match before {
                    Some(before) => tiles.get_mut(before).load_next = Some(id),
                    None => self.head = Some(id),
                }
                tiles.get_mut(anchor).load_prev = Some(id);
            }
        }
        self.count += 1;
    }

    fn unlink(&mut self, tiles: &mut TileArena, id: TileId) {
        let (prev, next) = {
            let tile = tiles.get_mut(id);
            let links = (tile.load_prev, tile.load_next);
            tile.load_prev = None;
            tile.load_next = None;
            links
        };
        match prev {
            Some(prev) => tiles.get_mut(prev).load_next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => tiles.get_mut(next).load_prev = prev,
            None => self.tail = prev,
        }
        self.count -= 1;
    }
}
