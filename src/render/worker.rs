//! Dedicated render thread for asynchronous frames.
//!
//! One frame in flight: the caller moves the [`FrameEngine`] in with
//! [`RenderWorker::submit`] and gets it back from [`RenderWorker::wait`].

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use super::engine::{FrameEngine, FrameReport};
use crate::kernels::KernelParams;
use crate::{Error, Result};

/// The dispatch half of a frame, sent to the worker.
struct RenderJob {
    engine: Box<FrameEngine>,
    params: KernelParams,
}

/// Sent back when a frame's dispatches are done.
pub struct FrameDone {
    pub engine: Box<FrameEngine>,
    pub params: KernelParams,
    pub report: Result<FrameReport>,
}

/// Handle to the render thread.
pub struct RenderWorker {
    /// Dropping the sender stops the worker.
    tx: Option<Sender<RenderJob>>,
    rx: Receiver<FrameDone>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    pub fn spawn() -> Result<Self> {
        let (job_tx, job_rx) = channel::<RenderJob>();
        let (res_tx, res_rx) = channel::<FrameDone>();

        let handle = thread::Builder::new()
            .name("wavefront-render".into())
            .spawn(move || worker_loop(job_rx, res_tx))?;
        debug!("render worker started");

        Ok(Self {
            tx: Some(job_tx),
            rx: res_rx,
            handle: Some(handle),
        })
    }

    /// Start a frame. If the worker is gone the engine is handed back.
    pub fn submit(&self, engine: Box<FrameEngine>, params: KernelParams) -> std::result::Result<(), Box<FrameEngine>> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(engine);
        };
        tx.send(RenderJob { engine, params }).map_err(|e| e.0.engine)
    }

    /// Block until the in-flight frame is done.
    pub fn wait(&self) -> Result<FrameDone> {
        self.rx.recv().map_err(|_| Error::WorkerDisconnected)
    }

    /// Stop the worker and wait for it to finish.
    pub fn stop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("render worker stopped");
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(rx: Receiver<RenderJob>, tx: Sender<FrameDone>) {
    while let Ok(RenderJob { mut engine, params }) = rx.recv() {
        trace!(frame = params.frame, "worker rendering");
        let report = engine.render_frame(&params);
        if tx.send(FrameDone { engine, params, report }).is_err() {
            break; // control thread gone
        }
    }
}
