//! Shadow-ray resolver.

use tracing::trace;

use super::pool::BufferPool;
use super::session::ComputeSession;
use crate::device::{Kernel, Launch};
use crate::kernels::KernelParams;
use crate::scene::SceneStore;
use crate::Result;

/// Occlusion-test the first `k` pending shadow rays and add the
/// contributions of the unoccluded ones to the accumulator.
///
/// Identical whether called as a mid-loop flush or as the end-of-frame
/// settle; the caller resets the shadow counter afterwards. Returns whether
/// any work was dispatched.
pub fn resolve_shadows(
    session: &mut ComputeSession,
    pool: &mut BufferPool,
    scene: &SceneStore,
    params: &KernelParams,
    k: u32,
) -> Result<bool> {
    if k == 0 {
        return Ok(false);
    }
    let n = k as usize;
    trace!(rays = n, "resolving shadow rays");
    {
        let BufferPool {
            shadow_rays, occluded, ..
        } = &mut *pool;
        session.accelerator.occlusion(&shadow_rays[..n], &mut occluded[..n.div_ceil(32)])?;
    }
    session.dispatch(Kernel::Connect, Launch::Linear(k), params, scene, pool)?;
    Ok(true)
}

/// The next pass may append up to one shadow ray per continuing path, so
/// pending rays must be drained once the two together reach capacity.
/// An empty queue has nothing to drain.
#[inline]
pub fn needs_shadow_flush(continuing: u32, pending: u32, capacity: usize) -> bool {
    pending > 0 && continuing as usize + pending as usize >= capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_predicate() {
        assert!(!needs_shadow_flush(10, 20, 100));
        assert!(needs_shadow_flush(50, 50, 100));
        assert!(needs_shadow_flush(0, 100, 100));
        assert!(!needs_shadow_flush(99, 0, 100));
    }

    #[test]
    fn test_empty_queue_never_flushes() {
        assert!(!needs_shadow_flush(100, 0, 100));
        assert!(!needs_shadow_flush(101, 0, 100));
        assert!(needs_shadow_flush(100, 1, 100));
    }
}
