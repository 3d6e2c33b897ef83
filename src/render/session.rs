//! Compute session: the accelerator plus the process-wide scratch it needs.

use tracing::{debug, info};

use super::counters::CounterChannel;
use super::pool::BufferPool;
use super::settings::CoreConfig;
use crate::device::{Accelerator, Bindings, DeviceInfo, HostAccelerator, Kernel, Launch};
use crate::kernels::{KernelParams, NoiseTable};
use crate::scene::SceneStore;
use crate::Result;

/// Build identification baked in by the build script.
pub const BUILD_DATE: &str = env!("WAVEFRONT_BUILD_DATE");
pub const BUILD_TIME: &str = env!("WAVEFRONT_BUILD_TIME");
pub const BUILD_PROFILE: &str = env!("WAVEFRONT_BUILD_PROFILE");

/// Explicitly owned device context, created at init and dropped at shutdown.
pub struct ComputeSession {
    pub accelerator: Box<dyn Accelerator>,
    pub counters: CounterChannel,
    pub noise: NoiseTable,
    info: DeviceInfo,
}

impl ComputeSession {
    pub fn new(accelerator: Box<dyn Accelerator>) -> Self {
        let info = accelerator.info();
        info!(
            device = %info.name,
            backend = %info.backend,
            units = info.compute_units,
            built = BUILD_DATE,
            profile = BUILD_PROFILE,
            "compute session initialized"
        );
        Self {
            accelerator,
            counters: CounterChannel::new(),
            noise: NoiseTable::new(),
            info,
        }
    }

    /// Session on the host accelerator.
    pub fn host(config: &CoreConfig) -> Result<Self> {
        Ok(Self::new(Box::new(HostAccelerator::new(config.threads)?)))
    }

    /// Session whose intersections run on the wgpu tracer.
    #[cfg(feature = "gpu")]
    pub fn gpu(config: &CoreConfig) -> Result<Self> {
        let tracer = crate::device::GpuTracer::new()?;
        Ok(Self::new(Box::new(HostAccelerator::with_tracer(tracer, config.threads)?)))
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Dispatch `kernel` with the frame's bindings.
    pub fn dispatch(
        &mut self,
        kernel: Kernel,
        launch: Launch,
        params: &KernelParams,
        scene: &SceneStore,
        pool: &mut BufferPool,
    ) -> Result<()> {
        let mut bindings = Bindings {
            params,
            scene,
            pool,
            counters: self.counters.device_mut(),
            noise: &self.noise,
        };
        self.accelerator.dispatch(kernel, launch, &mut bindings)
    }
}

impl Drop for ComputeSession {
    fn drop(&mut self) {
        debug!(device = %self.info.name, readbacks = self.counters.readbacks(), "compute session closed");
    }
}
