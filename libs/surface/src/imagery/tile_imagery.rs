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
use crate::imagery::{ImageryId, LayerId};

// Binds one terrain tile to one imagery tile of one layer. When the imagery
// fails and an ancestor substitutes for it, the failed original is kept
// referenced so the slot is not re-fetched while the tile lives.
#[derive(Clone, Debug)]
pub struct TileImagery {
    pub(crate) layer: LayerId,
    pub(crate) imagery: ImageryId,
    pub(crate) original_imagery: Option<ImageryId>,
    // The [0,1]^2 sub-rectangle of the terrain tile this entry covers.
    pub(crate) texture_coordinate_rectangle: [f64; 4],
    // Computed once the imagery (or its substitute) is ready.
    pub(crate) translation_and_scale: Option<[f64; 4]>,
}

impl TileImagery {
    pub(crate) fn new(
        layer: LayerId,
        imagery: ImageryId,
        texture_coordinate_rectangle: [f64; 4],
    ) -> Self {
        Self {
            layer,
            imagery,
            original_imagery: None,
            texture_coordinate_rectangle,
            translation_and_scale: None,
        }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn imagery(&self) -> ImageryId {
        self.imagery
    }

    pub fn original_imagery(&self) -> Option<ImageryId> {
        self.original_imagery
    }

    pub fn texture_coordinate_rectangle(&self) -> [f64; 4] {
        self.texture_coordinate_rectangle
    }

    pub fn translation_and_scale(&self) -> Option<[f64; 4]> {
        self.translation_and_scale
    }
}
