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
use crate::ellipsoid::Ellipsoid;
use nalgebra::{Point3, Vector3};

// Horizon culling against the ellipsoid, computed in the scaled space where
// the ellipsoid is the unit sphere. A target is represented by a single
// precomputed point such that the point is occluded iff every position it
// was computed from is occluded.
#[derive(Clone, Debug)]
pub struct EllipsoidalOccluder {
    ellipsoid: Ellipsoid,
    camera_position: Point3<f64>,
    camera_position_scaled: Vector3<f64>,
    distance_to_limb_squared: f64,
}

impl EllipsoidalOccluder {
    pub fn new(ellipsoid: &Ellipsoid) -> Self {
        Self {
            ellipsoid: *ellipsoid,
            camera_position: Point3::origin(),
            camera_position_scaled: Vector3::zeros(),
            distance_to_limb_squared: -1_f64,
        }
    }

    pub fn set_camera_position(&mut self, camera_position: &Point3<f64>) {
        let scaled = self.ellipsoid.transform_to_scaled_space(camera_position);
        self.camera_position = *camera_position;
        self.distance_to_limb_squared = scaled.magnitude_squared() - 1_f64;
        self.camera_position_scaled = scaled;
    }

    pub fn camera_position(&self) -> &Point3<f64> {
        &self.camera_position
    }

    pub fn is_scaled_space_point_visible(&self, occludee: &Vector3<f64>) -> bool {
        let cv = &self.camera_position_scaled;
        let vh_magnitude_squared = self.distance_to_limb_squared;
        let vt = occludee - cv;
        let vt_dot_vc = -vt.dot(cv);
        let occluded = if vh_magnitude_squared < 0_f64 {
            // Camera inside the ellipsoid; everything on the far side of the
            // center plane is hidden.
            vt_dot_vc > 0_f64
        } else {
            vt_dot_vc > vh_magnitude_squared
                && vt_dot_vc * vt_dot_vc / vt.magnitude_squared() > vh_magnitude_squared
        };
        !occluded
    }

    // The most conservative point along direction_to_point whose occlusion
    // implies occlusion of all `positions`. None when some position is so
    // far past the horizon plane that no such point exists.
    pub fn compute_horizon_culling_point(
        &self,
        direction_to_point: &Vector3<f64>,
        positions: &[Point3<f64>],
    ) -> Option<Vector3<f64>> {
        let scaled_direction = self
            .ellipsoid
            .transform_to_scaled_space(&Point3::from(*direction_to_point));
        let magnitude = scaled_direction.magnitude();
        if magnitude == 0_f64 {
            return None;
        }
        let scaled_direction = scaled_direction / magnitude;

        let mut result_magnitude = 0_f64;
        for position in positions {
            let candidate = self.magnitude_toward_point(&scaled_direction, position)?;
            result_magnitude = result_magnitude.max(candidate);
        }
        if result_magnitude <= 0_f64 {
            return None;
        }
        Some(scaled_direction * result_magnitude)
    }

    fn magnitude_toward_point(
        &self,
        scaled_space_direction: &Vector3<f64>,
        position: &Point3<f64>,
    ) -> Option<f64> {
        let scaled = self.ellipsoid.transform_to_scaled_space(position);
        let mut magnitude_squared = scaled.magnitude_squared();
        let mut magnitude = magnitude_squared.sqrt();
        let direction = scaled / magnitude;

        // Positions fractionally below the surface are treated as on it.
        magnitude_squared = magnitude_squared.max(1_f64);
        magnitude = magnitude.max(1_f64);

        let cos_alpha = direction.dot(scaled_space_direction);
        let sin_alpha = direction.cross(scaled_space_direction).magnitude();
        let cos_beta = 1_f64 / magnitude;
        let sin_beta = (magnitude_squared - 1_f64).sqrt() * cos_beta;

        let denominator = cos_alpha * cos_beta - sin_alpha * sin_beta;
        if denominator <= 0_f64 {
            return None;
        }
        Some(1_f64 / denominator)
    }
}
