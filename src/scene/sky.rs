//! Equirectangular sky dome.

use std::f32::consts::PI;

use glam::{Mat4, Vec3};

#[derive(Debug, Clone)]
pub struct SkyDome {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec3>,
    pub world_to_sky: Mat4,
}

impl SkyDome {
    /// Constant-colour sky.
    pub fn uniform(color: Vec3) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![color],
            world_to_sky: Mat4::IDENTITY,
        }
    }

    /// Radiance arriving from world direction `dir`.
    pub fn lookup(&self, dir: Vec3) -> Vec3 {
        if self.pixels.is_empty() || self.width == 0 || self.height == 0 {
            return Vec3::ZERO;
        }
        let d = self.world_to_sky.transform_vector3(dir).normalize_or_zero();
        let u = 0.5 + d.z.atan2(d.x) / (2.0 * PI);
        let v = d.y.clamp(-1.0, 1.0).acos() / PI;
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        self.pixels
            .get((y * self.width + x) as usize)
            .copied()
            .unwrap_or(Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sky() {
        let sky = SkyDome::uniform(Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(sky.lookup(Vec3::Y), Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(sky.lookup(-Vec3::X), Vec3::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn test_zenith_maps_to_top_row() {
        let sky = SkyDome {
            width: 2,
            height: 2,
            pixels: vec![Vec3::X, Vec3::X, Vec3::Z, Vec3::Z],
            world_to_sky: Mat4::IDENTITY,
        };
        assert_eq!(sky.lookup(Vec3::Y), Vec3::X);
        assert_eq!(sky.lookup(-Vec3::Y), Vec3::Z);
    }
}
