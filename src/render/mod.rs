//! The render core proper.
//!
//! - [`RenderCore`] - frame orchestrator and public entry points
//! - [`BufferPool`] - per-target buffer arena with ping-pong pairs
//! - [`CounterChannel`] - device counters and their host read-back
//! - [`run_wavefront`] - the bounce loop with its shadow-queue overflow flush
//! - [`resolve_shadows`] - occlusion test plus contribution of pending shadow rays
//! - [`finalize_frame`] - reprojection filter or direct finalize
//! - [`CoreConfig`] / [`RenderSettings`] - configuration

mod counters;
mod engine;
mod filter;
mod orchestrator;
mod pool;
mod session;
mod settings;
mod shadow;
mod stats;
mod view;
mod wavefront;
mod worker;

pub use counters::CounterChannel;
pub use engine::{FrameEngine, FrameReport};
pub use filter::{finalize_direct, finalize_frame, run_filter, FinalizePath, FILTER_PASSES};
pub use orchestrator::{FrameState, RenderCore};
pub use pool::{BufferPool, FeatureBuffers, FilterView, PingPong, PoolLayout, RayQueue, SurfaceSample};
pub use session::{ComputeSession, BUILD_DATE, BUILD_PROFILE, BUILD_TIME};
pub use settings::{CoreConfig, RenderSettings, Setting, CONFIG_ENV};
pub use shadow::{needs_shadow_flush, resolve_shadows};
pub use stats::{CoreStats, PhaseTimer};
pub use view::{Convergence, JitterCycle, ViewPyramid};
pub use wavefront::{run_wavefront, LoopReport};
pub use worker::{FrameDone, RenderWorker};
