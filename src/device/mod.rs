//! Accelerator capability interface.
//!
//! The render core never calls a kernel directly: it asks an
//! [`Accelerator`] to intersect ray batches and to dispatch numbered
//! compute kernels over a launch shape. [`HostAccelerator`] runs the
//! kernels on a rayon pool; other back ends only need to implement the
//! trait.

mod host;
mod layout;

#[cfg(feature = "gpu")]
mod gpu;

#[cfg(feature = "gpu")]
pub use gpu::GpuTracer;
pub use host::HostAccelerator;
pub use layout::*;

use crate::kernels::{KernelParams, NoiseTable};
use crate::render::BufferPool;
use crate::scene::{InstanceDesc, Mesh, SceneStore};
use crate::Result;

/// Identification of the compute device behind an accelerator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: String,
    pub compute_units: u32,
    pub memory_mib: u64,
}

/// Shape of a kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// One invocation per pixel sample.
    Screen { width: u32, height: u32, spp: u32 },
    /// One invocation per element of a compacted queue.
    Linear(u32),
}

impl Launch {
    pub fn len(&self) -> usize {
        match *self {
            Launch::Screen { width, height, spp } => width as usize * height as usize * spp as usize,
            Launch::Linear(n) => n as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Filter plane addressed by an edge-aware pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPlane {
    /// Demodulated shading written by the preparation pass.
    Shading,
    FilteredCurrent,
    FilteredPrevious,
}

/// One edge-aware blur pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPass {
    /// 1-based; the kernel footprint doubles each phase.
    pub phase: u32,
    pub input: FilterPlane,
    pub output: FilterPlane,
    /// Last pass remodulates by albedo.
    pub last: bool,
}

/// Compute kernels the core dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    SpawnPrimary,
    Shade { depth: u32 },
    /// Add unoccluded shadow contributions; launch width = pending rays.
    Connect,
    PrepareFilter,
    Filter(FilterPass),
    Taa,
    Unsharpen,
    FinalizeNoTaa,
    Finalize,
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::SpawnPrimary => "spawn_primary",
            Kernel::Shade { .. } => "shade",
            Kernel::Connect => "connect",
            Kernel::PrepareFilter => "prepare_filter",
            Kernel::Filter(_) => "apply_filter",
            Kernel::Taa => "taa",
            Kernel::Unsharpen => "unsharpen",
            Kernel::FinalizeNoTaa => "finalize_no_taa",
            Kernel::Finalize => "finalize",
        }
    }
}

/// Everything a kernel dispatch may read or write.
pub struct Bindings<'a> {
    pub params: &'a KernelParams,
    pub scene: &'a SceneStore,
    pub pool: &'a mut BufferPool,
    pub counters: &'a mut Counters,
    pub noise: &'a NoiseTable,
}

/// Ray-intersection service.
pub trait RayTracer: Send {
    fn name(&self) -> &str;

    /// Device the tracer runs on, when it is not the host.
    fn device(&self) -> Option<DeviceInfo> {
        None
    }

    /// (Re)build the bottom-level structure of mesh `index`.
    fn build_mesh(&mut self, index: usize, mesh: &Mesh) -> Result<()>;

    /// Rebuild the top-level structure over `instances`.
    fn build_instances(&mut self, instances: &[InstanceDesc], meshes: &[Mesh]) -> Result<()>;

    /// Nearest hit per ray.
    fn intersect(&self, rays: &[Ray], hits: &mut [Hit]) -> Result<()>;

    /// Any hit per ray, one bit per ray in `occluded`.
    fn occlusion(&self, rays: &[Ray], occluded: &mut [u32]) -> Result<()>;
}

/// Execution back end: intersection plus kernel dispatch.
pub trait Accelerator: Send {
    fn info(&self) -> DeviceInfo;

    fn build_mesh(&mut self, index: usize, mesh: &Mesh) -> Result<()>;

    fn build_instances(&mut self, instances: &[InstanceDesc], meshes: &[Mesh]) -> Result<()>;

    fn intersect(&self, rays: &[Ray], hits: &mut [Hit]) -> Result<()>;

    fn occlusion(&self, rays: &[Ray], occluded: &mut [u32]) -> Result<()>;

    /// Run `kernel` over `launch`. Dispatches execute in submission order.
    fn dispatch(&self, kernel: Kernel, launch: Launch, bindings: &mut Bindings<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_len() {
        assert_eq!(Launch::Screen { width: 4, height: 3, spp: 2 }.len(), 24);
        assert_eq!(Launch::Linear(7).len(), 7);
        assert!(Launch::Linear(0).is_empty());
    }

    #[test]
    fn test_kernel_names() {
        assert_eq!(Kernel::Shade { depth: 2 }.name(), "shade");
        let pass = FilterPass {
            phase: 1,
            input: FilterPlane::Shading,
            output: FilterPlane::FilteredCurrent,
            last: false,
        };
        assert_eq!(Kernel::Filter(pass).name(), "apply_filter");
    }
}
