//! Primary ray generation.

use glam::Vec3;
use rayon::prelude::*;

use super::{KernelParams, NoiseTable};
use crate::device::{PathState, Ray};
use crate::render::BufferPool;
use crate::util::{concentric_disk, random_float, wang_hash};
use crate::Result;

/// Fill the input queue with `n` primary rays (`width * height * spp`).
///
/// Path `i` targets pixel `i % pixels`, sample `i / pixels`. With the filter
/// active the sample sits at the pixel centre of the jittered frustum;
/// otherwise it is uniformly random inside the pixel.
pub fn spawn_primary(n: usize, params: &KernelParams, noise: &NoiseTable, pool: &mut BufferPool) -> Result<()> {
    let pixels = params.pixels().max(1);
    let view = &params.view;
    let lens = (view.aperture > 0.0).then(|| (view.right().normalize_or_zero(), view.down().normalize_or_zero()));
    let queue = pool.queues.current_mut();
    queue.rays[..n]
        .par_iter_mut()
        .zip(queue.paths[..n].par_iter_mut())
        .enumerate()
        .for_each(|(i, (ray, path))| {
            let pixel = (i % pixels) as u32;
            let sample = (i / pixels) as u32;
            let (x, y) = (pixel % params.width, pixel / params.width);
            let mut seed = wang_hash(
                noise.at(x, y, params.blue_slot)
                    ^ wang_hash(sample.wrapping_add(params.samples_taken).wrapping_mul(0x2c1b_3c6d) ^ params.frame),
            );
            let (ox, oy) = if params.filter {
                (0.5, 0.5)
            } else {
                (random_float(&mut seed), random_float(&mut seed))
            };
            let target = view.screen_point(
                (x as f32 + ox) / params.width as f32,
                (y as f32 + oy) / params.height as f32,
            );
            let origin = match lens {
                Some((right, down)) => {
                    let d = concentric_disk(random_float(&mut seed), random_float(&mut seed)) * view.aperture;
                    view.pos + right * d.x + down * d.y
                }
                None => view.pos,
            };
            let dir = (target - origin).normalize_or(Vec3::Z);
            *ray = Ray::new(origin, dir, 0.0, f32::INFINITY);
            *path = PathState::primary(pixel, sample, seed);
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_util;

    #[test]
    fn test_spawn_layout() {
        let params = test_util::params(4, 2, 2);
        let mut pool = test_util::pool(4, 2, 2);
        spawn_primary(16, &params, &NoiseTable::new(), &mut pool).unwrap();
        let q = pool.queues.current();
        assert_eq!(q.paths[9].pixel, 1);
        assert_eq!(q.paths[9].sample, 1);
        assert_eq!(q.paths[9].depth, 1);
        assert!(q.rays[0].direction().z < 0.0);
        assert!((q.rays[3].direction().length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_filter_uses_pixel_centre() {
        let mut params = test_util::params(3, 3, 1);
        params.filter = true;
        let mut pool = test_util::pool(3, 3, 1);
        spawn_primary(9, &params, &NoiseTable::new(), &mut pool).unwrap();
        // Centre pixel of an odd target looks straight down the view axis.
        let d = pool.queues.current().rays[4].direction();
        assert!((d - Vec3::NEG_Z).length() < 1e-5);
    }
}
