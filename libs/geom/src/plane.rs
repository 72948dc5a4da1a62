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
use nalgebra::{Point3, Vector3};

// A plane in normal + distance-from-origin form. Points with a positive
// signed distance are on the side the normal points toward.
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    normal: Vector3<f64>,
    distance: f64,
}

impl Plane {
    pub fn from_point_and_normal(p: &Point3<f64>, n: &Vector3<f64>) -> Self {
        Self {
            normal: n.to_owned(),
            distance: p.coords.dot(n),
        }
    }

    pub fn from_normal_and_distance(normal: Vector3<f64>, distance: f64) -> Self {
        Self { normal, distance }
    }

    pub fn distance_to_point(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) - self.distance
    }

    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }
}
