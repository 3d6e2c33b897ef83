//! Host-authored scene data and its compact device layouts.
//!
//! The store is mutated only between frames. Each setter is a wholesale
//! replacement of the corresponding array, except geometry and instances
//! which are addressed per slot.

mod lights;
mod material;
mod mesh;
mod sky;

pub mod demo;

pub use lights::*;
pub use material::*;
pub use mesh::*;
pub use sky::*;

use glam::{Mat4, Vec4};
use tracing::{debug, warn};

/// Everything the kernels need to know about the scene.
#[derive(Debug, Default)]
pub struct SceneStore {
    pub meshes: Vec<Mesh>,
    pub instances: Vec<Instance>,
    /// Device descriptors, rebuilt from `instances` before each frame.
    pub instance_descs: Vec<InstanceDesc>,
    pub materials: Vec<DeviceMaterial>,
    host_materials: Vec<HostMaterial>,
    pub textures: TextureStore,
    pub lights: LightStore,
    pub sky: Option<SkyDome>,
    instances_dirty: bool,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the geometry of mesh `index`.
    ///
    /// New meshes must arrive in increasing index order; a gap is a caller
    /// error and is padded with empty meshes.
    pub fn set_geometry(&mut self, index: usize, vertices: &[Vec4], attributes: &[TriangleAttributes]) {
        let triangles = attributes.len().min(vertices.len() / 3);
        if triangles != attributes.len() {
            warn!(index, vertices = vertices.len(), attributes = attributes.len(), "vertex count does not cover all triangles");
        }
        if index >= self.meshes.len() {
            if index > self.meshes.len() {
                warn!(index, meshes = self.meshes.len(), "mesh introduced out of order");
            }
            self.meshes.resize_with(index + 1, Mesh::default);
        }
        let mesh = &mut self.meshes[index];
        mesh.vertices.clear();
        mesh.vertices.extend_from_slice(&vertices[..triangles * 3]);
        mesh.attributes.clear();
        mesh.attributes.extend_from_slice(&attributes[..triangles]);
        mesh.dirty = true;
        debug!(index, triangles, "mesh updated");
    }

    /// Set instance `index`; `mesh == -1` truncates the list to `index` entries.
    pub fn set_instance(&mut self, index: usize, mesh: i32, transform: Mat4) {
        self.instances_dirty = true;
        if mesh < 0 {
            self.instances.truncate(index);
            return;
        }
        let inst = Instance {
            mesh: mesh as usize,
            transform,
        };
        if index < self.instances.len() {
            self.instances[index] = inst;
        } else {
            if index > self.instances.len() {
                warn!(index, instances = self.instances.len(), "instance introduced out of order");
                // Placeholder slots reference no mesh and are skipped by the descriptors.
                self.instances.resize(index, Instance { mesh: usize::MAX, transform: Mat4::IDENTITY });
            }
            self.instances.push(inst);
        }
    }

    /// Rebuild the device instance descriptors. Storage grows with 2x slack.
    pub fn update_instance_descs(&mut self) {
        let n = self.instances.len();
        self.instance_descs.clear();
        if self.instance_descs.capacity() < n {
            self.instance_descs.reserve_exact(n * 2);
        }
        let meshes = self.meshes.len();
        self.instance_descs.extend(
            self.instances
                .iter()
                .enumerate()
                .filter(|(_, i)| i.mesh < meshes)
                .map(|(slot, i)| InstanceDesc::new(slot, i)),
        );
        self.instances_dirty = false;
    }

    pub fn instances_dirty(&self) -> bool {
        self.instances_dirty
    }

    pub fn set_textures(&mut self, textures: &[HostTexture]) {
        self.textures.sync(textures);
        // Materials hold texture offsets; refresh them against the new layout.
        self.convert_materials();
    }

    pub fn set_materials(&mut self, materials: &[HostMaterial]) {
        self.host_materials.clear();
        self.host_materials.extend_from_slice(materials);
        self.convert_materials();
    }

    fn convert_materials(&mut self) {
        self.materials.clear();
        self.materials
            .extend(self.host_materials.iter().map(|m| DeviceMaterial::from_host(m, &self.textures.slots)));
    }

    pub fn set_lights(&mut self, lights: &LightSet<'_>) {
        self.lights.upload(lights);
        debug!(count = self.lights.count(), "lights updated");
    }

    pub fn set_sky(&mut self, sky: Option<SkyDome>) {
        self.sky = sky;
    }

    /// True when there is anything to render.
    pub fn is_ready(&self) -> bool {
        !self.instances.is_empty() && !self.meshes.is_empty()
    }

    /// No light can be reached by next-event estimation.
    pub fn no_direct_lights(&self) -> bool {
        self.lights.count() == 0
    }

    #[inline]
    pub fn material(&self, index: u32) -> DeviceMaterial {
        self.materials.get(index as usize).copied().unwrap_or_else(|| DeviceMaterial::from_host(&HostMaterial::default(), &[]))
    }
}
