//! Map accumulated radiance to the displayable image.

use rayon::prelude::*;

use super::KernelParams;
use crate::render::BufferPool;
use crate::Result;

/// Display = (direct + indirect) / accumulated samples.
pub fn finalize(params: &KernelParams, pool: &mut BufferPool) -> Result<()> {
    let scale = 1.0 / params.accumulated.max(1) as f32;
    let BufferPool { accumulator, display, .. } = pool;
    display
        .par_iter_mut()
        .zip(accumulator.par_iter())
        .for_each(|(out, acc)| *out = (acc.total() * scale).extend(1.0));
    Ok(())
}

/// Display = remodulated filter output, direct plus indirect.
pub fn finalize_no_taa(_params: &KernelParams, pool: &mut BufferPool) -> Result<()> {
    let BufferPool { features, display, .. } = pool;
    let Some(f) = features.as_ref() else {
        return Ok(());
    };
    let shading = f.shading.current();
    display.par_iter_mut().enumerate().for_each(|(p, out)| {
        *out = (shading[2 * p].truncate() + shading[2 * p + 1].truncate()).extend(1.0);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_util;
    use glam::{Vec3, Vec4};

    #[test]
    fn test_finalize_divides_by_samples() {
        let mut params = test_util::params(2, 2, 4);
        params.accumulated = 8;
        let mut pool = test_util::pool(2, 2, 4);
        pool.accumulator[1].add(Vec3::splat(4.0), false);
        pool.accumulator[1].add(Vec3::splat(4.0), true);
        finalize(&params, &mut pool).unwrap();
        assert_eq!(pool.display[1], Vec4::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(pool.display[0], Vec4::new(0.0, 0.0, 0.0, 1.0));
    }
}
