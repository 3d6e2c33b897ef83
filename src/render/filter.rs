//! Accumulation and reprojection filter pipeline.

use tracing::debug_span;

use super::pool::BufferPool;
use super::session::ComputeSession;
use crate::device::{FilterPass, FilterPlane, Kernel, Launch};
use crate::kernels::KernelParams;
use crate::scene::SceneStore;
use crate::Result;

/// The three edge-aware passes, ping-ponging through the filter planes and
/// ending back in the shading plane.
pub const FILTER_PASSES: [FilterPass; 3] = [
    FilterPass {
        phase: 1,
        input: FilterPlane::Shading,
        output: FilterPlane::FilteredCurrent,
        last: false,
    },
    FilterPass {
        phase: 2,
        input: FilterPlane::FilteredCurrent,
        output: FilterPlane::FilteredPrevious,
        last: false,
    },
    FilterPass {
        phase: 3,
        input: FilterPlane::FilteredPrevious,
        output: FilterPlane::Shading,
        last: true,
    },
];

/// Which path produced the displayable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizePath {
    /// Accumulator divided by the sample count.
    Direct,
    /// Filter passes, then the filtered result as is.
    Filtered,
    /// Filter passes, temporal blend and sharpening.
    Temporal,
}

/// Write the displayable image for the frame described by `params`.
///
/// With the filter active (feature buffers present and the setting on) this
/// runs the preparation pass, the three blur passes and either TAA plus
/// unsharpen or the plain finalize, then swaps every history pair.
/// Otherwise the accumulator is mapped straight to the display.
pub fn finalize_frame(
    session: &mut ComputeSession,
    pool: &mut BufferPool,
    scene: &SceneStore,
    params: &KernelParams,
) -> Result<FinalizePath> {
    if !params.filter || pool.features.is_none() {
        finalize_direct(session, pool, scene, params)?;
        return Ok(FinalizePath::Direct);
    }
    run_filter(session, pool, scene, params)
}

/// The unfiltered finalize.
pub fn finalize_direct(
    session: &mut ComputeSession,
    pool: &mut BufferPool,
    scene: &SceneStore,
    params: &KernelParams,
) -> Result<()> {
    let launch = Launch::Linear(params.pixels() as u32);
    session.dispatch(Kernel::Finalize, launch, params, scene, pool)
}

/// Filter pipeline. Requires feature buffers.
pub fn run_filter(
    session: &mut ComputeSession,
    pool: &mut BufferPool,
    scene: &SceneStore,
    params: &KernelParams,
) -> Result<FinalizePath> {
    let _span = debug_span!("filter", taa = params.taa, stationary = params.stationary).entered();
    let launch = Launch::Linear(params.pixels() as u32);

    session.dispatch(Kernel::PrepareFilter, launch, params, scene, pool)?;
    for pass in FILTER_PASSES {
        session.dispatch(Kernel::Filter(pass), launch, params, scene, pool)?;
    }
    let path = if params.taa {
        session.dispatch(Kernel::Taa, launch, params, scene, pool)?;
        session.dispatch(Kernel::Unsharpen, launch, params, scene, pool)?;
        FinalizePath::Temporal
    } else {
        session.dispatch(Kernel::FinalizeNoTaa, launch, params, scene, pool)?;
        FinalizePath::Filtered
    };

    if let Some(f) = pool.features.as_mut() {
        f.swap_history();
    }
    Ok(path)
}
