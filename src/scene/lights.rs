//! Light sources and next-event sampling.

use glam::Vec3;

use crate::util::uniform_triangle;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub radiance: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpotLight {
    pub position: Vec3,
    pub direction: Vec3,
    pub radiance: Vec3,
    /// Cosine of the full-intensity cone half angle.
    pub cos_inner: f32,
    /// Cosine of the cutoff cone half angle.
    pub cos_outer: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in.
    pub direction: Vec3,
    pub radiance: Vec3,
}

/// Emissive triangle in world space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TriLight {
    pub vertices: [Vec3; 3],
    pub radiance: Vec3,
}

impl TriLight {
    pub fn normal(&self) -> Vec3 {
        let [a, b, c] = self.vertices;
        (b - a).cross(c - a).normalize_or_zero()
    }

    pub fn area(&self) -> f32 {
        let [a, b, c] = self.vertices;
        0.5 * (b - a).cross(c - a).length()
    }
}

/// Host-side light lists handed to `set_lights`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightSet<'a> {
    pub triangles: &'a [TriLight],
    pub points: &'a [PointLight],
    pub spots: &'a [SpotLight],
    pub directionals: &'a [DirectionalLight],
}

/// Device array that only reallocates when the incoming count exceeds
/// its capacity.
#[derive(Debug, Clone)]
pub struct StagedBuffer<T> {
    data: Vec<T>,
    len: usize,
    reallocations: u32,
}

impl<T> Default for StagedBuffer<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            len: 0,
            reallocations: 0,
        }
    }
}

impl<T: Copy> StagedBuffer<T> {
    pub fn upload(&mut self, src: &[T]) {
        if src.len() > self.data.len() {
            self.data = src.to_vec();
            self.reallocations += 1;
        } else {
            self.data[..src.len()].copy_from_slice(src);
        }
        self.len = src.len();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }
}

/// Result of sampling one light from a shading point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    /// Unit direction from the shading point toward the light.
    pub direction: Vec3,
    pub distance: f32,
    /// Incident radiance, already divided by the sampling density of the
    /// chosen point on the light.
    pub radiance: Vec3,
}

/// Distance used for lights at infinity.
pub const INFINITE_DISTANCE: f32 = 1.0e20;

#[derive(Debug, Default)]
pub struct LightStore {
    pub triangles: StagedBuffer<TriLight>,
    pub points: StagedBuffer<PointLight>,
    pub spots: StagedBuffer<SpotLight>,
    pub directionals: StagedBuffer<DirectionalLight>,
}

impl LightStore {
    pub fn upload(&mut self, set: &LightSet<'_>) {
        self.triangles.upload(set.triangles);
        self.points.upload(set.points);
        self.spots.upload(set.spots);
        self.directionals.upload(set.directionals);
    }

    pub fn count(&self) -> usize {
        self.triangles.len() + self.points.len() + self.spots.len() + self.directionals.len()
    }

    /// Sample light `index` in the combined order triangles, points,
    /// spots, directionals.
    pub fn sample(&self, index: usize, p: Vec3, r0: f32, r1: f32) -> Option<LightSample> {
        let mut i = index;
        if let Some(l) = self.triangles.as_slice().get(i) {
            return sample_triangle(l, p, r0, r1);
        }
        i -= self.triangles.len();
        if let Some(l) = self.points.as_slice().get(i) {
            return sample_point(l.position, l.radiance, p);
        }
        i -= self.points.len();
        if let Some(l) = self.spots.as_slice().get(i) {
            let s = sample_point(l.position, l.radiance, p)?;
            let cos = (-s.direction).dot(l.direction.normalize_or_zero());
            let falloff = smoothstep(l.cos_outer, l.cos_inner, cos);
            return (falloff > 0.0).then(|| LightSample {
                radiance: s.radiance * falloff,
                ..s
            });
        }
        i -= self.spots.len();
        self.directionals.as_slice().get(i).map(|l| LightSample {
            direction: -l.direction.normalize_or_zero(),
            distance: INFINITE_DISTANCE,
            radiance: l.radiance,
        })
    }
}

fn sample_point(position: Vec3, radiance: Vec3, p: Vec3) -> Option<LightSample> {
    let d = position - p;
    let dist2 = d.length_squared();
    if dist2 <= 0.0 {
        return None;
    }
    let distance = dist2.sqrt();
    Some(LightSample {
        direction: d / distance,
        distance,
        radiance: radiance / dist2,
    })
}

fn sample_triangle(l: &TriLight, p: Vec3, r0: f32, r1: f32) -> Option<LightSample> {
    let (u, v) = uniform_triangle(r0, r1);
    let [a, b, c] = l.vertices;
    let q = a + (b - a) * u + (c - a) * v;
    let d = q - p;
    let dist2 = d.length_squared();
    if dist2 <= 0.0 {
        return None;
    }
    let distance = dist2.sqrt();
    let direction = d / distance;
    let cos_light = l.normal().dot(-direction);
    if cos_light <= 0.0 {
        return None;
    }
    Some(LightSample {
        direction,
        distance,
        radiance: l.radiance * (l.area() * cos_light / dist2),
    })
}

fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    if e1 <= e0 {
        return if x >= e0 { 1.0 } else { 0.0 };
    }
    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_growth() {
        let mut buf = StagedBuffer::default();
        buf.upload(&[1, 2, 3]);
        buf.upload(&[4]);
        assert_eq!(buf.as_slice(), &[4]);
        assert_eq!(buf.capacity(), 3);
        assert_eq!(buf.reallocations(), 1);
        buf.upload(&[1, 2, 3, 4]);
        assert_eq!(buf.reallocations(), 2);
    }

    #[test]
    fn test_combined_order() {
        let points = [PointLight {
            position: Vec3::new(0.0, 2.0, 0.0),
            radiance: Vec3::splat(4.0),
        }];
        let dirs = [DirectionalLight {
            direction: -Vec3::Y,
            radiance: Vec3::ONE,
        }];
        let mut store = LightStore::default();
        store.upload(&LightSet {
            points: &points,
            directionals: &dirs,
            ..Default::default()
        });
        assert_eq!(store.count(), 2);
        let s = store.sample(0, Vec3::ZERO, 0.5, 0.5).unwrap();
        assert_eq!(s.distance, 2.0);
        assert_eq!(s.radiance, Vec3::ONE);
        let s = store.sample(1, Vec3::ZERO, 0.5, 0.5).unwrap();
        assert_eq!(s.direction, Vec3::Y);
        assert_eq!(s.distance, INFINITE_DISTANCE);
        assert!(store.sample(2, Vec3::ZERO, 0.5, 0.5).is_none());
    }

    #[test]
    fn test_triangle_light_one_sided() {
        let l = TriLight {
            vertices: [Vec3::new(-1.0, 1.0, -1.0), Vec3::new(1.0, 1.0, -1.0), Vec3::new(0.0, 1.0, 1.0)],
            radiance: Vec3::ONE,
        };
        // Winding puts the normal at -Y, facing the origin.
        assert!(l.normal().y < 0.0);
        assert!(sample_triangle(&l, Vec3::ZERO, 0.3, 0.3).is_some());
        assert!(sample_triangle(&l, Vec3::new(0.0, 2.0, 0.0), 0.3, 0.3).is_none());
    }

    #[test]
    fn test_spot_cone() {
        let spots = [SpotLight {
            position: Vec3::new(0.0, 1.0, 0.0),
            direction: -Vec3::Y,
            radiance: Vec3::ONE,
            cos_inner: 0.95,
            cos_outer: 0.9,
        }];
        let mut store = LightStore::default();
        store.upload(&LightSet {
            spots: &spots,
            ..Default::default()
        });
        assert!(store.sample(0, Vec3::ZERO, 0.0, 0.0).is_some());
        assert!(store.sample(0, Vec3::new(5.0, 0.0, 0.0), 0.0, 0.0).is_none());
    }
}
