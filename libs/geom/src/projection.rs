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
use crate::ellipsoid::{Cartographic, Ellipsoid};
use nalgebra::Point3;
use std::fmt::Debug;

pub trait MapProjection: Debug {
    fn project(&self, c: &Cartographic) -> Point3<f64>;
    fn unproject(&self, p: &Point3<f64>) -> Cartographic;

    // Mercator-aware shading needs the projection's latitude mapping; other
    // projections report None and render without the precision quad.
    fn as_web_mercator(&self) -> Option<&WebMercatorProjection> {
        None
    }
}

// Plate carree: longitude and latitude scaled by the semimajor axis.
#[derive(Clone, Copy, Debug)]
pub struct GeographicProjection {
    semimajor_axis: f64,
    one_over_semimajor_axis: f64,
}

impl GeographicProjection {
    pub fn new(ellipsoid: &Ellipsoid) -> Self {
        let semimajor_axis = ellipsoid.maximum_radius();
        Self {
            semimajor_axis,
            one_over_semimajor_axis: 1_f64 / semimajor_axis,
        }
    }
}

impl MapProjection for GeographicProjection {
    fn project(&self, c: &Cartographic) -> Point3<f64> {
        Point3::new(
            c.longitude * self.semimajor_axis,
            c.latitude * self.semimajor_axis,
            c.height,
        )
    }

    fn unproject(&self, p: &Point3<f64>) -> Cartographic {
        Cartographic::new(
            p.x * self.one_over_semimajor_axis,
            p.y * self.one_over_semimajor_axis,
            p.z,
        )
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WebMercatorProjection {
    semimajor_axis: f64,
    one_over_semimajor_axis: f64,
}

impl WebMercatorProjection {
    // atan(sinh(pi)): the latitude where the square Mercator tile ends.
    pub const MAXIMUM_LATITUDE: f64 = 1.484_422_229_745_332_4_f64;

    pub fn new(ellipsoid: &Ellipsoid) -> Self {
        let semimajor_axis = ellipsoid.maximum_radius();
        Self {
            semimajor_axis,
            one_over_semimajor_axis: 1_f64 / semimajor_axis,
        }
    }

    pub fn semimajor_axis(&self) -> f64 {
        self.semimajor_axis
    }

    pub fn geodetic_latitude_to_mercator_angle(latitude: f64) -> f64 {
        let latitude = latitude.clamp(-Self::MAXIMUM_LATITUDE, Self::MAXIMUM_LATITUDE);
        let sin_latitude = latitude.sin();
        0.5 * ((1_f64 + sin_latitude) / (1_f64 - sin_latitude)).ln()
    }

    pub fn mercator_angle_to_geodetic_latitude(angle: f64) -> f64 {
        std::f64::consts::FRAC_PI_2 - 2_f64 * (-angle).exp().atan()
    }
}

impl MapProjection for WebMercatorProjection {
    fn project(&self, c: &Cartographic) -> Point3<f64> {
        Point3::new(
            c.longitude * self.semimajor_axis,
            Self::geodetic_latitude_to_mercator_angle(c.latitude) * self.semimajor_axis,
            c.height,
        )
    }

    fn unproject(&self, p: &Point3<f64>) -> Cartographic {
        Cartographic::new(
            p.x * self.one_over_semimajor_axis,
            Self::mercator_angle_to_geodetic_latitude(p.y * self.one_over_semimajor_axis),
            p.z,
        )
    }

    fn as_web_mercator(&self) -> Option<&WebMercatorProjection> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_mercator_angle_round_trip() {
        assert_relative_eq!(WebMercatorProjection::geodetic_latitude_to_mercator_angle(0_f64), 0_f64);
        assert_relative_eq!(
            WebMercatorProjection::geodetic_latitude_to_mercator_angle(
                WebMercatorProjection::MAXIMUM_LATITUDE
            ),
            PI,
            epsilon = 1e-12
        );
        for latitude in [-1.2_f64, -0.3, 0.0, 0.7, 1.4] {
            let angle = WebMercatorProjection::geodetic_latitude_to_mercator_angle(latitude);
            assert_relative_eq!(
                WebMercatorProjection::mercator_angle_to_geodetic_latitude(angle),
                latitude,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_projection_round_trips() {
        let ellipsoid = Ellipsoid::wgs84();
        let input = Cartographic::from_degrees(-122.3, 47.6, 120_f64);
        for projection in [
            Box::new(GeographicProjection::new(&ellipsoid)) as Box<dyn MapProjection>,
            Box::new(WebMercatorProjection::new(&ellipsoid)),
        ] {
            let p = projection.project(&input);
            let back = projection.unproject(&p);
            assert_relative_eq!(back.longitude, input.longitude, epsilon = 1e-12);
            assert_relative_eq!(back.latitude, input.latitude, epsilon = 1e-12);
            assert_relative_eq!(back.height, input.height);
        }
    }
}
