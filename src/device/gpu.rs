//! wgpu compute ray tracer.
//!
//! Instances are flattened into world-space triangles under a single SAH
//! BVH, uploaded once per top-level rebuild. Each intersect or occlusion
//! call uploads the rays, dispatches the traversal kernel and reads the hit
//! records back.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use parking_lot::Mutex;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use super::{DeviceInfo, Hit, Ray, RayTracer};
use crate::accel::{build_bvh, Aabb, BvhNode};
use crate::scene::{InstanceDesc, Mesh};
use crate::{Error, Result};

const INTERSECT_WGSL: &str = include_str!("shaders/intersect.wgsl");

/// Workgroup size (must match @workgroup_size in WGSL).
const WG_SIZE: u32 = 64;

/// World-space triangle in BVH leaf order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct GpuTriangle {
    v0: [f32; 4],
    v1: [f32; 4],
    v2: [f32; 4],
    instance: u32,
    triangle: u32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct TraceParams {
    ray_count: u32,
    any_hit: u32,
    node_count: u32,
    _pad: u32,
}

struct SceneBuffers {
    nodes: wgpu::Buffer,
    triangles: wgpu::Buffer,
    node_count: u32,
}

/// Ray and hit buffers, grown on demand.
struct Scratch {
    rays: wgpu::Buffer,
    hits: wgpu::Buffer,
    readback: wgpu::Buffer,
    capacity: usize,
}

pub struct GpuTracer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    scene: Option<SceneBuffers>,
    scratch: Mutex<Option<Scratch>>,
    /// Object-space triangles per mesh, kept for flattening.
    meshes: Vec<Vec<[Vec3; 3]>>,
    /// Rays per dispatch the device limits allow.
    max_batch: usize,
    info: DeviceInfo,
}

/// Largest ray batch one dispatch can take: bounded by the workgroup count
/// per dimension and by the storage binding size of the ray and hit arrays.
fn batch_limit(limits: &wgpu::Limits) -> usize {
    let by_groups = limits.max_compute_workgroups_per_dimension as usize * WG_SIZE as usize;
    let binding = limits.max_storage_buffer_binding_size as usize;
    let by_rays = binding / std::mem::size_of::<Ray>();
    let by_hits = binding / std::mem::size_of::<Hit>();
    by_groups.min(by_rays).min(by_hits).max(WG_SIZE as usize)
}

impl GpuTracer {
    /// Pick the fastest adapter and build the traversal pipeline.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::NoDevice(e.to_string()))?;
        let adapter_info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("wavefront device"),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::NoDevice(e.to_string()))?;
        info!(adapter = %adapter_info.name, backend = ?adapter_info.backend, "gpu tracer device");

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("intersect_shader"),
            source: wgpu::ShaderSource::Wgsl(INTERSECT_WGSL.into()),
        });
        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("intersect_bind_group_layout"),
            entries: &[
                // @binding(0) BVH nodes
                storage(0, true),
                // @binding(1) Triangles
                storage(1, true),
                // @binding(2) Rays
                storage(2, true),
                // @binding(3) Hits
                storage(3, false),
                // @binding(4) Params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("intersect_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("intersect_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("intersect_params"),
            size: std::mem::size_of::<TraceParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // wgpu reports neither compute unit count nor VRAM; the largest
        // buffer the device accepts stands in for memory.
        let info = DeviceInfo {
            name: adapter_info.name.clone(),
            backend: format!("{:?}", adapter_info.backend),
            compute_units: 0,
            memory_mib: device.limits().max_buffer_size >> 20,
        };
        let max_batch = batch_limit(&device.limits());
        debug!(max_batch, "gpu ray batch limit");
        Ok(Self {
            max_batch,
            device,
            queue,
            pipeline,
            bind_group_layout,
            params_buffer,
            scene: None,
            scratch: Mutex::new(None),
            meshes: Vec::new(),
            info,
        })
    }

    fn ensure_scratch<'a>(&self, scratch: &'a mut Option<Scratch>, count: usize) -> &'a Scratch {
        if scratch.as_ref().is_some_and(|s| s.capacity < count) {
            *scratch = None;
        }
        scratch.get_or_insert_with(|| self.create_scratch(count))
    }

    fn create_scratch(&self, count: usize) -> Scratch {
        let capacity = count.next_power_of_two().max(1024).min(self.max_batch);
        let hit_bytes = (capacity * std::mem::size_of::<Hit>()) as u64;
        debug!(capacity, "growing gpu ray scratch");
        Scratch {
            rays: self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("intersect_rays"),
                size: (capacity * std::mem::size_of::<Ray>()) as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            hits: self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("intersect_hits"),
                size: hit_bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            readback: self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("intersect_readback"),
                size: hit_bytes,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            capacity,
        }
    }

    /// Trace `rays` and copy the hit records into `out`, in batches the
    /// device limits allow.
    fn trace(&self, rays: &[Ray], any_hit: bool, out: &mut [Hit]) -> Result<()> {
        let n = rays.len();
        let Some(scene) = &self.scene else {
            out[..n].fill(Hit::MISS);
            return Ok(());
        };
        for (batch, hits) in rays.chunks(self.max_batch).zip(out[..n].chunks_mut(self.max_batch)) {
            self.trace_batch(scene, batch, any_hit, hits)?;
        }
        Ok(())
    }

    fn trace_batch(&self, scene: &SceneBuffers, rays: &[Ray], any_hit: bool, out: &mut [Hit]) -> Result<()> {
        let n = rays.len();
        let mut guard = self.scratch.lock();
        let scratch = self.ensure_scratch(&mut guard, n);

        self.queue.write_buffer(&scratch.rays, 0, bytemuck::cast_slice(rays));
        let params = TraceParams {
            ray_count: n as u32,
            any_hit: any_hit as u32,
            node_count: scene.node_count,
            _pad: 0,
        };
        self.queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("intersect_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: scene.nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: scene.triangles.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scratch.rays.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: scratch.hits.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("intersect_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("intersect_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups((n as u32).div_ceil(WG_SIZE), 1, 1);
        }
        let bytes = (n * std::mem::size_of::<Hit>()) as u64;
        encoder.copy_buffer_to_buffer(&scratch.hits, 0, &scratch.readback, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = scratch.readback.slice(..bytes);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::dispatch("intersect", e.to_string()))?;
        rx.recv()
            .map_err(|_| Error::dispatch("intersect", "readback channel closed"))?
            .map_err(|e| Error::dispatch("intersect", e.to_string()))?;
        {
            let data = slice.get_mapped_range();
            let hits: &[Hit] = bytemuck::cast_slice(&data);
            for (dst, src) in out[..n].iter_mut().zip(hits) {
                *dst = if src.triangle < 0 { Hit::MISS } else { *src };
            }
        }
        scratch.readback.unmap();
        Ok(())
    }
}

impl RayTracer for GpuTracer {
    fn name(&self) -> &str {
        "wgpu bvh"
    }

    fn device(&self) -> Option<DeviceInfo> {
        Some(self.info.clone())
    }

    fn build_mesh(&mut self, index: usize, mesh: &Mesh) -> Result<()> {
        if index >= self.meshes.len() {
            self.meshes.resize_with(index + 1, Vec::new);
        }
        self.meshes[index] = (0..mesh.triangle_count()).map(|i| mesh.triangle(i)).collect();
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(instances = instances.len()))]
    fn build_instances(&mut self, instances: &[InstanceDesc], _meshes: &[Mesh]) -> Result<()> {
        let mut world = Vec::new();
        for (index, desc) in instances.iter().enumerate() {
            let Some(tris) = self.meshes.get(desc.mesh) else { continue };
            world.extend(tris.iter().enumerate().map(|(t, v)| {
                let v = v.map(|p| desc.transform.transform_point3(p));
                (v, index as u32, t as u32)
            }));
        }
        if world.is_empty() {
            self.scene = None;
            return Ok(());
        }
        let bounds: Vec<Aabb> = world.iter().map(|(v, _, _)| Aabb::from_points(v)).collect();
        let bvh = build_bvh(&bounds);
        let triangles: Vec<GpuTriangle> = bvh
            .prim_indices
            .iter()
            .map(|&i| {
                let (v, instance, triangle) = world[i as usize];
                GpuTriangle {
                    v0: v[0].extend(0.0).to_array(),
                    v1: v[1].extend(0.0).to_array(),
                    v2: v[2].extend(0.0).to_array(),
                    instance,
                    triangle,
                    _pad: [0; 2],
                }
            })
            .collect();
        let nodes: &[BvhNode] = &bvh.nodes;
        self.scene = Some(SceneBuffers {
            nodes: self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("intersect_nodes"),
                contents: bytemuck::cast_slice(nodes),
                usage: wgpu::BufferUsages::STORAGE,
            }),
            triangles: self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("intersect_triangles"),
                contents: bytemuck::cast_slice(&triangles),
                usage: wgpu::BufferUsages::STORAGE,
            }),
            node_count: nodes.len() as u32,
        });
        debug!(triangles = triangles.len(), nodes = nodes.len(), "gpu scene uploaded");
        Ok(())
    }

    fn intersect(&self, rays: &[Ray], hits: &mut [Hit]) -> Result<()> {
        self.trace(rays, false, hits)
    }

    fn occlusion(&self, rays: &[Ray], occluded: &mut [u32]) -> Result<()> {
        let mut hits = vec![Hit::MISS; rays.len()];
        self.trace(rays, true, &mut hits)?;
        for (w, chunk) in hits.chunks(32).enumerate() {
            occluded[w] = chunk
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.is_miss())
                .fold(0u32, |bits, (b, _)| bits | (1 << b));
        }
        Ok(())
    }
}
