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

// Geodetic position in radians, height in meters above the ellipsoid.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    pub fn from_degrees(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude: longitude.to_radians(),
            latitude: latitude.to_radians(),
            height,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Ellipsoid {
    radii: Vector3<f64>,
    radii_squared: Vector3<f64>,
    one_over_radii: Vector3<f64>,
    one_over_radii_squared: Vector3<f64>,
}

impl Ellipsoid {
    pub fn wgs84() -> Self {
        Self::new(6_378_137_f64, 6_378_137_f64, 6_356_752.314_245_179_f64)
    }

    pub fn unit_sphere() -> Self {
        Self::new(1_f64, 1_f64, 1_f64)
    }

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        assert!(x > 0_f64 && y > 0_f64 && z > 0_f64);
        let radii = Vector3::new(x, y, z);
        Self {
            radii,
            radii_squared: radii.component_mul(&radii),
            one_over_radii: Vector3::new(1_f64 / x, 1_f64 / y, 1_f64 / z),
            one_over_radii_squared: Vector3::new(
                1_f64 / (x * x),
                1_f64 / (y * y),
                1_f64 / (z * z),
            ),
        }
    }

    pub fn radii(&self) -> &Vector3<f64> {
        &self.radii
    }

    pub fn maximum_radius(&self) -> f64 {
        self.radii.x.max(self.radii.y).max(self.radii.z)
    }

    pub fn geodetic_surface_normal(&self, p: &Point3<f64>) -> Vector3<f64> {
        p.coords
            .component_mul(&self.one_over_radii_squared)
            .normalize()
    }

    pub fn geodetic_surface_normal_cartographic(&self, c: &Cartographic) -> Vector3<f64> {
        let cos_latitude = c.latitude.cos();
        Vector3::new(
            cos_latitude * c.longitude.cos(),
            cos_latitude * c.longitude.sin(),
            c.latitude.sin(),
        )
    }

    pub fn cartographic_to_cartesian(&self, c: &Cartographic) -> Point3<f64> {
        let n = self.geodetic_surface_normal_cartographic(c);
        let k = self.radii_squared.component_mul(&n);
        let gamma = n.dot(&k).sqrt();
        Point3::from(k / gamma + n * c.height)
    }

    pub fn cartesian_to_cartographic(&self, p: &Point3<f64>) -> Cartographic {
        let surface = self.scale_to_geodetic_surface(p);
        let n = self.geodetic_surface_normal(&surface);
        let h = p - surface;
        Cartographic {
            longitude: n.y.atan2(n.x),
            latitude: n.z.asin(),
            height: h.dot(&p.coords).signum() * h.magnitude(),
        }
    }

    // Newton iteration on the ellipsoid's implicit function; converges in a
    // handful of steps for any point outside the core.
    pub fn scale_to_geodetic_surface(&self, p: &Point3<f64>) -> Point3<f64> {
        let oors = &self.one_over_radii_squared;
        let p2 = p.coords.component_mul(&p.coords);
        let squared_norm = p2.dot(oors);
        let ratio = (1_f64 / squared_norm).sqrt();
        let intersection = p.coords * ratio;
        let gradient = intersection.component_mul(oors) * 2_f64;
        let mut lambda = (1_f64 - ratio) * p.coords.magnitude() / (0.5 * gradient.magnitude());

        loop {
            let xm = 1_f64 / (1_f64 + lambda * oors.x);
            let ym = 1_f64 / (1_f64 + lambda * oors.y);
            let zm = 1_f64 / (1_f64 + lambda * oors.z);
            let (xm2, ym2, zm2) = (xm * xm, ym * ym, zm * zm);
            let func = p2.x * xm2 * oors.x + p2.y * ym2 * oors.y + p2.z * zm2 * oors.z - 1_f64;
            if func.abs() < 1e-12 {
                return Point3::new(p.x * xm, p.y * ym, p.z * zm);
            }
            let derivative = -2_f64
                * (p2.x * xm2 * xm * oors.x * oors.x
                    + p2.y * ym2 * ym * oors.y * oors.y
                    + p2.z * zm2 * zm * oors.z * oors.z);
            lambda -= func / derivative;
        }
    }

    // Componentwise division by the radii; the unit sphere in this space is
    // the ellipsoid surface.
    pub fn transform_to_scaled_space(&self, p: &Point3<f64>) -> Vector3<f64> {
        p.coords.component_mul(&self.one_over_radii)
    }
}
