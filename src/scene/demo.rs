//! Built-in test scenes used by the CLI and the integration tests.

use glam::{Mat4, Vec3, Vec4};

use super::{HostMaterial, PointLight, SkyDome, TriLight, TriangleAttributes};
use crate::render::{RenderCore, ViewPyramid};
use crate::Result;

/// Scene content in the form the core setters take.
#[derive(Debug, Clone, Default)]
pub struct DemoScene {
    pub meshes: Vec<(Vec<Vec4>, Vec<TriangleAttributes>)>,
    pub instances: Vec<(i32, Mat4)>,
    pub materials: Vec<HostMaterial>,
    pub tri_lights: Vec<TriLight>,
    pub point_lights: Vec<PointLight>,
    pub sky: Option<SkyDome>,
    pub eye: Vec3,
    pub target: Vec3,
}

struct MeshBuilder {
    vertices: Vec<Vec4>,
    attributes: Vec<TriangleAttributes>,
}

impl MeshBuilder {
    fn new() -> Self {
        Self {
            vertices: Vec::new(),
            attributes: Vec::new(),
        }
    }

    fn tri(&mut self, v: [Vec3; 3], material: u32) -> &mut Self {
        self.vertices.extend(v.iter().map(|p| p.extend(1.0)));
        self.attributes.push(TriangleAttributes::flat(v, material));
        self
    }

    /// Quad a-b-c-d, counter-clockwise seen from the front.
    fn quad(&mut self, a: Vec3, b: Vec3, c: Vec3, d: Vec3, material: u32) -> &mut Self {
        self.tri([a, b, c], material).tri([a, c, d], material)
    }

    fn finish(self) -> (Vec<Vec4>, Vec<TriangleAttributes>) {
        (self.vertices, self.attributes)
    }
}

impl DemoScene {
    /// One untextured triangle facing the camera, lit by a single point light.
    pub fn single_triangle() -> Self {
        let mut mesh = MeshBuilder::new();
        mesh.tri([Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::new(0.0, 1.0, 0.0)], 0);
        Self {
            meshes: vec![mesh.finish()],
            instances: vec![(0, Mat4::IDENTITY)],
            materials: vec![HostMaterial::diffuse(Vec3::splat(0.8))],
            point_lights: vec![PointLight {
                position: Vec3::new(0.0, 0.0, 2.0),
                radiance: Vec3::splat(10.0),
            }],
            eye: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            ..Default::default()
        }
    }

    /// Open box with a floor, three walls, a block, an emissive ceiling
    /// panel and a point light.
    pub fn cornell_box() -> Self {
        const WHITE: u32 = 0;
        const RED: u32 = 1;
        const GREEN: u32 = 2;
        const LAMP: u32 = 3;
        let (x0, x1, y0, y1, z0, z1) = (-1.0, 1.0, 0.0, 2.0, -1.0, 1.0);
        let p = Vec3::new;

        let mut room = MeshBuilder::new();
        room.quad(p(x0, y0, z1), p(x1, y0, z1), p(x1, y0, z0), p(x0, y0, z0), WHITE)
            .quad(p(x0, y1, z0), p(x1, y1, z0), p(x1, y1, z1), p(x0, y1, z1), WHITE)
            .quad(p(x0, y0, z0), p(x1, y0, z0), p(x1, y1, z0), p(x0, y1, z0), WHITE)
            .quad(p(x0, y0, z1), p(x0, y0, z0), p(x0, y1, z0), p(x0, y1, z1), RED)
            .quad(p(x1, y0, z0), p(x1, y0, z1), p(x1, y1, z1), p(x1, y1, z0), GREEN);

        // Unit cube centred on the origin; placed by its instance transform.
        let mut cube = MeshBuilder::new();
        let c = |x: f32, y: f32, z: f32| p(x * 0.5, y * 0.5, z * 0.5);
        cube.quad(c(-1., -1., 1.), c(1., -1., 1.), c(1., 1., 1.), c(-1., 1., 1.), WHITE)
            .quad(c(1., -1., -1.), c(-1., -1., -1.), c(-1., 1., -1.), c(1., 1., -1.), WHITE)
            .quad(c(-1., -1., -1.), c(-1., -1., 1.), c(-1., 1., 1.), c(-1., 1., -1.), WHITE)
            .quad(c(1., -1., 1.), c(1., -1., -1.), c(1., 1., -1.), c(1., 1., 1.), WHITE)
            .quad(c(-1., 1., 1.), c(1., 1., 1.), c(1., 1., -1.), c(-1., 1., -1.), WHITE)
            .quad(c(-1., -1., -1.), c(1., -1., -1.), c(1., -1., 1.), c(-1., -1., 1.), WHITE);

        // Ceiling panel facing down.
        let lamp_y = y1 - 0.01;
        let lamp = [p(-0.3, lamp_y, -0.3), p(0.3, lamp_y, -0.3), p(0.3, lamp_y, 0.3), p(-0.3, lamp_y, 0.3)];
        let mut panel = MeshBuilder::new();
        panel.quad(lamp[0], lamp[1], lamp[2], lamp[3], LAMP);
        let radiance = Vec3::new(12.0, 11.0, 9.0);

        Self {
            meshes: vec![room.finish(), cube.finish(), panel.finish()],
            instances: vec![
                (0, Mat4::IDENTITY),
                (
                    1,
                    Mat4::from_translation(p(0.3, 0.35, -0.2))
                        * Mat4::from_rotation_y(0.4)
                        * Mat4::from_scale(p(0.6, 0.7, 0.6)),
                ),
                (2, Mat4::IDENTITY),
            ],
            materials: vec![
                HostMaterial::diffuse(Vec3::splat(0.75)),
                HostMaterial::diffuse(p(0.7, 0.1, 0.1)),
                HostMaterial::diffuse(p(0.1, 0.6, 0.1)),
                HostMaterial::emissive(radiance),
            ],
            tri_lights: vec![
                TriLight {
                    vertices: [lamp[0], lamp[1], lamp[2]],
                    radiance,
                },
                TriLight {
                    vertices: [lamp[0], lamp[2], lamp[3]],
                    radiance,
                },
            ],
            point_lights: vec![PointLight {
                position: p(-0.5, 1.5, 0.5),
                radiance: Vec3::splat(1.5),
            }],
            sky: Some(SkyDome::uniform(p(0.05, 0.07, 0.1))),
            eye: p(0.0, 1.0, 3.4),
            target: p(0.0, 1.0, 0.0),
        }
    }

    /// Push the scene into `core`.
    pub fn apply(&self, core: &mut RenderCore) -> Result<()> {
        for (i, (vertices, attributes)) in self.meshes.iter().enumerate() {
            core.set_geometry(i, vertices, attributes)?;
        }
        for (i, (mesh, transform)) in self.instances.iter().enumerate() {
            core.set_instance(i, *mesh, *transform)?;
        }
        core.set_instance(self.instances.len(), -1, Mat4::IDENTITY)?;
        core.set_textures(&[])?;
        core.set_materials(&self.materials)?;
        core.set_lights(&super::LightSet {
            triangles: &self.tri_lights,
            points: &self.point_lights,
            ..Default::default()
        })?;
        core.set_sky_data(self.sky.clone())?;
        Ok(())
    }

    /// Pinhole camera framing the scene.
    pub fn camera(&self, aspect: f32) -> ViewPyramid {
        ViewPyramid::look_at(self.eye, self.target, Vec3::Y, 45.0, aspect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cornell_triangle_counts() {
        let s = DemoScene::cornell_box();
        assert_eq!(s.meshes[0].1.len(), 10);
        assert_eq!(s.meshes[1].1.len(), 12);
        assert_eq!(s.meshes[2].1.len(), 2);
        // Panel and its light triangles face down into the room.
        assert!(s.meshes[2].1[0].normals[0].y < 0.0);
        assert!(s.tri_lights[0].normal().y < 0.0);
    }

    #[test]
    fn test_room_faces_inward() {
        let s = DemoScene::cornell_box();
        let attrs = &s.meshes[0].1;
        assert!(attrs[0].normals[0].y > 0.0, "floor");
        assert!(attrs[2].normals[0].y < 0.0, "ceiling");
        assert!(attrs[4].normals[0].z > 0.0, "back wall");
        assert!(attrs[6].normals[0].x > 0.0, "left wall");
        assert!(attrs[8].normals[0].x < 0.0, "right wall");
    }
}
