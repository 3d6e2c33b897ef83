//! Counter channel between device passes and the host.

use crate::device::Counters;

/// Device-side counter record plus its last host read-back.
///
/// Kernels write `device` through the dispatch bindings; the host only
/// observes values copied out by [`CounterChannel::read_back`].
#[derive(Debug, Default)]
pub struct CounterChannel {
    device: Counters,
    host: Counters,
    readbacks: u64,
}

impl CounterChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for the first bounce of a frame with `paths` primary rays.
    pub fn init_for_extend(&mut self, paths: u32) {
        self.device = Counters {
            active_paths: paths,
            total_extension_rays: paths,
            ..Counters::default()
        };
    }

    /// Roll the continuations of the last pass into the next pass's input.
    pub fn init_subsequent(&mut self) {
        let d = &mut self.device;
        d.total_extension_rays += d.extension_rays;
        d.active_paths = d.extension_rays;
        d.extension_rays = 0;
    }

    /// Pending shadow rays were consumed.
    pub fn reset_shadow(&mut self) {
        self.device.shadow_rays = 0;
    }

    /// Synchronize and copy the device record to the host.
    pub fn read_back(&mut self) -> Counters {
        self.host = self.device;
        self.readbacks += 1;
        self.host
    }

    /// Last value read back.
    pub fn host(&self) -> &Counters {
        &self.host
    }

    pub fn device_mut(&mut self) -> &mut Counters {
        &mut self.device
    }

    pub fn readbacks(&self) -> u64 {
        self.readbacks
    }
}
