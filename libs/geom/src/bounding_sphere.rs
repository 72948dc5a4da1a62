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
use nalgebra::Point3;

#[derive(Clone, Copy, Debug)]
pub struct BoundingSphere {
    center: Point3<f64>,
    radius: f64,
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self {
            center: Point3::origin(),
            radius: 0_f64,
        }
    }
}

impl BoundingSphere {
    pub fn from_center_and_radius(center: &Point3<f64>, radius: f64) -> Self {
        Self {
            center: *center,
            radius,
        }
    }

    // Center at the centroid, radius to the farthest point. Not minimal, but
    // tight enough for culling and cheap to recompute per tile.
    pub fn from_points(points: &[Point3<f64>]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let mut acc = Point3::origin();
        for p in points {
            acc.coords += p.coords;
        }
        let center = Point3::from(acc.coords / points.len() as f64);
        let radius = points
            .iter()
            .map(|p| (p - center).magnitude())
            .fold(0_f64, f64::max);
        Self { center, radius }
    }

    // Smallest sphere containing both inputs.
    pub fn union(&self, other: &Self) -> Self {
        let offset = other.center - self.center;
        let dist = offset.magnitude();
        if self.radius >= dist + other.radius {
            return *self;
        }
        if other.radius >= dist + self.radius {
            return *other;
        }
        let radius = (dist + self.radius + other.radius) * 0.5;
        let center = self.center + offset * ((radius - self.radius) / dist);
        Self { center, radius }
    }

    pub fn center(&self) -> &Point3<f64> {
        &self.center
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn distance_to_point(&self, p: &Point3<f64>) -> f64 {
        ((p - self.center).magnitude() - self.radius).max(0_f64)
    }
}
