//! Host accelerator: kernels run data-parallel on a rayon pool.

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, trace};

use super::{Accelerator, Bindings, DeviceInfo, Hit, Kernel, Launch, Ray, RayTracer};
use crate::accel::BvhTracer;
use crate::kernels;
use crate::scene::{InstanceDesc, Mesh};
use crate::{Error, Result};

pub struct HostAccelerator<T: RayTracer = BvhTracer> {
    tracer: T,
    pool: Option<ThreadPool>,
}

impl HostAccelerator<BvhTracer> {
    /// Host accelerator with the BVH tracer. `threads = None` uses the
    /// global rayon pool.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        Self::with_tracer(BvhTracer::new(), threads)
    }
}

impl<T: RayTracer> HostAccelerator<T> {
    pub fn with_tracer(tracer: T, threads: Option<usize>) -> Result<Self> {
        let pool = threads
            .map(|n| {
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("wavefront-{i}"))
                    .build()
                    .map_err(|e| Error::NoDevice(e.to_string()))
            })
            .transpose()?;
        info!(tracer = tracer.name(), threads = ?threads, "host accelerator ready");
        Ok(Self { tracer, pool })
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    fn run<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, ThreadPool::current_num_threads)
    }
}

impl<T: RayTracer + Sync> Accelerator for HostAccelerator<T> {
    fn info(&self) -> DeviceInfo {
        if let Some(device) = self.tracer.device() {
            return device;
        }
        DeviceInfo {
            name: format!("host ({})", self.tracer.name()),
            backend: "rayon".into(),
            compute_units: self.threads() as u32,
            memory_mib: 0,
        }
    }

    fn build_mesh(&mut self, index: usize, mesh: &Mesh) -> Result<()> {
        self.tracer.build_mesh(index, mesh)
    }

    fn build_instances(&mut self, instances: &[InstanceDesc], meshes: &[Mesh]) -> Result<()> {
        self.tracer.build_instances(instances, meshes)
    }

    fn intersect(&self, rays: &[Ray], hits: &mut [Hit]) -> Result<()> {
        self.run(|| self.tracer.intersect(rays, hits))
    }

    fn occlusion(&self, rays: &[Ray], occluded: &mut [u32]) -> Result<()> {
        self.run(|| self.tracer.occlusion(rays, occluded))
    }

    fn dispatch(&self, kernel: Kernel, launch: Launch, b: &mut Bindings<'_>) -> Result<()> {
        trace!(kernel = kernel.name(), width = launch.len(), "dispatch");
        let n = launch.len();
        self.run(|| match kernel {
            Kernel::SpawnPrimary => kernels::spawn_primary(n, b.params, b.noise, b.pool),
            Kernel::Shade { depth } => kernels::shade(depth, n, b.params, b.scene, b.pool, b.counters),
            Kernel::Connect => kernels::connect(n, b.pool),
            Kernel::PrepareFilter => kernels::prepare_filter(b.params, b.pool),
            Kernel::Filter(pass) => kernels::apply_filter(&pass, b.params, b.pool),
            Kernel::Taa => kernels::taa(b.params, b.pool),
            Kernel::Unsharpen => kernels::unsharpen(b.params, b.pool),
            Kernel::FinalizeNoTaa => kernels::finalize_no_taa(b.params, b.pool),
            Kernel::Finalize => kernels::finalize(b.params, b.pool),
        })
        .map_err(|e| match e {
            e @ (Error::ShadowQueueOverflow { .. } | Error::Dispatch { .. }) => e,
            other => Error::dispatch(kernel.name(), other.to_string()),
        })
    }
}
