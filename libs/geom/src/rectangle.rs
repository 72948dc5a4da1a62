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
use crate::ellipsoid::Cartographic;
use std::f64::consts::PI;

// A geographic rectangle in radians. West may exceed east only at the
// antimeridian, which the tiling schemes we consume never produce, so the
// arithmetic here assumes west <= east.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Rectangle {
    pub const MAX_VALUE: Rectangle = Rectangle {
        west: -PI,
        south: -PI / 2_f64,
        east: PI,
        north: PI / 2_f64,
    };

    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn center(&self) -> Cartographic {
        Cartographic::new(
            (self.west + self.east) * 0.5,
            (self.south + self.north) * 0.5,
            0_f64,
        )
    }

    pub fn contains(&self, position: &Cartographic) -> bool {
        position.longitude >= self.west
            && position.longitude <= self.east
            && position.latitude >= self.south
            && position.latitude <= self.north
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.west < other.east
            && other.west < self.east
            && self.south < other.north
            && other.south < self.north
    }

    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let west = self.west.max(other.west);
        let east = self.east.min(other.east);
        let south = self.south.max(other.south);
        let north = self.north.min(other.north);
        if west >= east || south >= north {
            return None;
        }
        Some(Self::new(west, south, east, north))
    }

    // The latitude within this rectangle nearest the equator. Geometric
    // error is widest there, so it bounds the tile's on-screen error.
    pub fn closest_latitude_to_equator(&self) -> f64 {
        if self.south <= 0_f64 && self.north >= 0_f64 {
            0_f64
        } else if self.south > 0_f64 {
            self.south
        } else {
            self.north
        }
    }
}
