//! # Wavefront
//!
//! Control core of a wavefront path tracer.
//!
//! Every live path of one bounce depth is processed as a single batched
//! dispatch: intersect, shade, compact, read back the counters, size the
//! next launch. Shadow rays queue up with their unconfirmed contributions and
//! are resolved at the end of the frame, or early when the queue would
//! overrun. An optional reprojection filter denoises the accumulation.
//!
//! ## Modules
//!
//! - [`util`] - Errors and math helpers
//! - [`scene`] - Meshes, instances, materials, lights, textures, sky
//! - [`accel`] - SAH BVH build and the host ray tracer
//! - [`device`] - Accelerator interface and the host implementation
//! - [`kernels`] - Per-element compute kernels
//! - [`render`] - Buffer pool, wavefront loop, filter, orchestrator
//!
//! ## Example
//!
//! ```ignore
//! use wavefront::prelude::*;
//!
//! let mut core = RenderCore::init(CoreConfig::default())?;
//! core.set_target(640, 480, 1)?;
//! let scene = DemoScene::cornell_box();
//! scene.apply(&mut core)?;
//! core.render(&scene.camera(640.0 / 480.0), Convergence::Restart, false)?;
//! let image = core.display();
//! ```

pub mod util;
pub mod scene;
pub mod accel;
pub mod device;
pub mod kernels;
pub mod render;

// Re-export commonly used types
pub use util::{Error, Result};
pub use render::{Convergence, CoreConfig, CoreStats, RenderCore, ViewPyramid};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result};
    pub use crate::device::{Accelerator, DeviceInfo, HostAccelerator, RayTracer};
    pub use crate::render::{Convergence, CoreConfig, CoreStats, RenderCore, RenderSettings, ViewPyramid};
    pub use crate::scene::demo::DemoScene;
    pub use crate::scene::{HostMaterial, HostTexture, LightSet, SkyDome, TriangleAttributes};
}
