//! Shadow-ray connection: add contributions of unoccluded rays.

use crate::render::BufferPool;
use crate::Result;

/// Consume the first `k` potentials against the occlusion bitmask.
pub fn connect(k: usize, pool: &mut BufferPool) -> Result<()> {
    let BufferPool {
        potentials,
        occluded,
        accumulator,
        ..
    } = pool;
    for (i, p) in potentials[..k].iter().enumerate() {
        if occluded[i >> 5] & (1 << (i & 31)) != 0 {
            continue;
        }
        if let Some(texel) = accumulator.get_mut(p.pixel()) {
            texel.add(glam::Vec3::from_array(p.rgb), p.is_indirect());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Potential;
    use crate::kernels::test_util;
    use glam::Vec3;

    #[test]
    fn test_occluded_rays_discarded() {
        let mut pool = test_util::pool(4, 4, 1);
        pool.potentials[0] = Potential::new(Vec3::ONE, 2, false);
        pool.potentials[1] = Potential::new(Vec3::ONE, 2, true);
        pool.potentials[2] = Potential::new(Vec3::splat(5.0), 3, false);
        pool.occluded[0] = 0b100;
        connect(3, &mut pool).unwrap();
        assert_eq!(pool.accumulator[2].total(), Vec3::splat(2.0));
        assert_eq!(pool.accumulator[2].indirect.x, 1.0);
        assert!(pool.accumulator[3].is_zero());
    }
}
