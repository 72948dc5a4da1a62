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
use crate::{bounding_sphere::BoundingSphere, plane::Plane};
use nalgebra::{Point3, Vector3};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Visibility {
    None,
    Partial,
    Full,
}

// A convex volume as a set of inward-facing planes.
#[derive(Clone, Debug)]
pub struct CullingVolume {
    planes: Vec<Plane>,
}

impl CullingVolume {
    pub fn new(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    // No planes: everything passes. Useful for orthographic 2D tests where
    // the caller culls by extent instead.
    pub fn infinite() -> Self {
        Self { planes: Vec::new() }
    }

    pub fn from_perspective(
        position: &Point3<f64>,
        direction: &Vector3<f64>,
        up: &Vector3<f64>,
        fovy: f64,
        aspect: f64,
        near: f64,
        far: f64,
    ) -> Self {
        let d = direction.normalize();
        let u = up.normalize();
        let r = d.cross(&u);
        let half_height = near * (0.5 * fovy).tan();
        let half_width = half_height * aspect;

        let planes = vec![
            // Near and far.
            Plane::from_point_and_normal(&(position + d * near), &d),
            Plane::from_point_and_normal(&(position + d * far), &-d),
            // Left, right, bottom, top; all pass through the eye.
            Plane::from_point_and_normal(position, &(d * half_width + r * near).normalize()),
            Plane::from_point_and_normal(position, &(d * half_width - r * near).normalize()),
            Plane::from_point_and_normal(position, &(d * half_height + u * near).normalize()),
            Plane::from_point_and_normal(position, &(d * half_height - u * near).normalize()),
        ];
        Self { planes }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn visibility(&self, sphere: &BoundingSphere) -> Visibility {
        let mut intersecting = false;
        for plane in &self.planes {
            let distance = plane.distance_to_point(sphere.center());
            if distance < -sphere.radius() {
                return Visibility::None;
            }
            if distance < sphere.radius() {
                intersecting = true;
            }
        }
        if intersecting {
            Visibility::Partial
        } else {
            Visibility::Full
        }
    }
}
