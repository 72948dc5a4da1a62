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
mod bounding_sphere;
mod culling_volume;
mod ellipsoid;
mod occluder;
mod plane;
mod projection;
mod rectangle;

pub use crate::{
    bounding_sphere::BoundingSphere,
    culling_volume::{CullingVolume, Visibility},
    ellipsoid::{Cartographic, Ellipsoid},
    occluder::EllipsoidalOccluder,
    plane::Plane,
    projection::{GeographicProjection, MapProjection, WebMercatorProjection},
    rectangle::Rectangle,
};
