//! Shading: one invocation per active path.

use std::f32::consts::FRAC_1_PI;

use glam::{Vec3, Vec4};
use rayon::prelude::*;

use super::KernelParams;
use crate::device::{Counters, Hit, PathState, Potential, Ray};
use crate::render::{BufferPool, SurfaceSample};
use crate::scene::{DeviceMaterial, SceneStore};
use crate::util::{clamp_radiance, cosine_hemisphere, random_float};
use crate::{Error, Result};

/// What one path produced in a shading pass, applied during compaction.
#[derive(Debug, Default)]
struct Outcome {
    /// Radiance landing in the accumulator now, and whether it is indirect.
    radiance: Option<(Vec3, bool)>,
    feature: Option<(SurfaceSample, Vec4)>,
    probe: Option<(i32, i32, f32)>,
    shadow: Option<(Ray, Potential)>,
    extension: Option<(Ray, PathState)>,
}

struct Surface {
    position: Vec3,
    /// Geometric normal facing the incoming ray.
    normal: Vec3,
    shading_normal: Vec3,
    albedo: Vec3,
    emission: Option<Vec3>,
}

fn resolve_surface(scene: &SceneStore, ray: &Ray, hit: &Hit) -> Option<Surface> {
    let desc = scene.instance_descs.get(hit.instance as usize)?;
    let mesh = scene.meshes.get(desc.mesh)?;
    let tri = hit.triangle as usize;
    let attr = mesh.attributes.get(tri)?;
    let [a, b, c] = mesh.triangle(tri).map(|v| desc.transform.transform_point3(v));
    let geo = (b - a).cross(c - a).normalize_or_zero();
    let front = ray.direction().dot(geo) < 0.0;
    let normal = if front { geo } else { -geo };
    let mut shading_normal = desc.to_world_normal(attr.normal_at(hit.u, hit.v));
    if shading_normal == Vec3::ZERO {
        shading_normal = normal;
    } else if shading_normal.dot(normal) < 0.0 {
        shading_normal = -shading_normal;
    }

    let material = scene.material(attr.material);
    let mut albedo = material.diffuse();
    if material.texture >= 0 {
        if let Some(slot) = scene.textures.slots.get(material.texture as usize) {
            albedo *= scene.textures.sample(slot, attr.uv_at(hit.u, hit.v));
        }
    }
    let two_sided = material.flags & DeviceMaterial::FLAG_TWO_SIDED != 0;
    let emission = (material.is_emissive() && (front || two_sided)).then(|| material.emission());
    Some(Surface {
        position: ray.at(hit.t),
        normal,
        shading_normal,
        albedo,
        emission,
    })
}

fn shade_path(depth: u32, ray: &Ray, path: &PathState, hit: &Hit, scene: &SceneStore, params: &KernelParams) -> Outcome {
    let mut out = Outcome::default();
    let throughput = path.throughput();
    let indirect = depth > 1;
    let first = depth == 1 && path.sample == 0;
    let clamp = |c: Vec3| if indirect { clamp_radiance(c, params.clamp_value) } else { c };

    let surface = if hit.is_miss() { None } else { resolve_surface(scene, ray, hit) };
    let Some(s) = surface else {
        if first {
            out.feature = Some((SurfaceSample::SKY, Vec4::ZERO));
        }
        if let Some(sky) = &scene.sky {
            let c = clamp(throughput * sky.lookup(ray.direction()));
            if c.max_element() > 0.0 {
                out.radiance = Some((c, indirect));
            }
        }
        return out;
    };

    if first {
        let sample = SurfaceSample {
            albedo: s.albedo,
            normal: s.shading_normal,
            instance: hit.instance,
        };
        out.feature = Some((sample, s.position.extend(hit.t)));
        if params.probe_index() == Some(path.pixel) {
            // Report the caller's instance index, not the descriptor position.
            let slot = scene.instance_descs.get(hit.instance as usize).map_or(hit.instance, |d| d.slot as i32);
            out.probe = Some((slot, hit.triangle, hit.t));
        }
    }

    if let Some(emission) = s.emission {
        // Lights are reached by next-event estimation after the first hit.
        if !indirect {
            out.radiance = Some((throughput * emission, false));
        }
        return out;
    }

    let mut seed = path.seed;
    let eps = params.epsilon;

    let light_count = scene.lights.count();
    if params.shadows && light_count > 0 {
        let pick = ((random_float(&mut seed) * light_count as f32) as usize).min(light_count - 1);
        let (r0, r1) = (random_float(&mut seed), random_float(&mut seed));
        if let Some(ls) = scene.lights.sample(pick, s.position, r0, r1) {
            let cos = s.shading_normal.dot(ls.direction);
            if cos > 0.0 && s.normal.dot(ls.direction) > 0.0 {
                let brdf = s.albedo * FRAC_1_PI;
                let c = clamp(throughput * brdf * ls.radiance * (cos * light_count as f32));
                if c.max_element() > 0.0 {
                    let shadow = Ray::new(s.position + s.normal * eps, ls.direction, 0.0, ls.distance - 2.0 * eps);
                    out.shadow = Some((shadow, Potential::new(c, path.pixel, indirect)));
                }
            }
        }
    }

    if depth < params.max_depth {
        let mut next = throughput * s.albedo;
        let mut alive = next.max_element() > 0.0;
        if alive && depth >= 2 {
            let survive = next.max_element().clamp(0.1, 1.0);
            if random_float(&mut seed) >= survive {
                alive = false;
            } else {
                next /= survive;
            }
        }
        if alive {
            let (r0, r1) = (random_float(&mut seed), random_float(&mut seed));
            let mut dir = cosine_hemisphere(s.shading_normal, r0, r1);
            if dir.dot(s.normal) <= 0.0 {
                dir = cosine_hemisphere(s.normal, r0, r1);
            }
            let state = PathState {
                throughput: next.to_array(),
                seed,
                depth: depth + 1,
                flags: path.flags | PathState::FLAG_BOUNCED,
                ..*path
            };
            out.extension = Some((Ray::new(s.position + s.normal * eps, dir, 0.0, f32::INFINITY), state));
        }
    }
    out
}

/// Shade `n` paths of bounce `depth` from the current queue into the other.
///
/// Continuations are compacted into the output queue, shadow rays are
/// appended after the ones already pending, and the counters report both.
pub fn shade(
    depth: u32,
    n: usize,
    params: &KernelParams,
    scene: &SceneStore,
    pool: &mut BufferPool,
    counters: &mut Counters,
) -> Result<()> {
    let BufferPool {
        queues,
        hits,
        shadow_rays,
        potentials,
        accumulator,
        features,
        ..
    } = pool;
    let (input, output) = queues.split_mut();
    let (input, hits) = (&*input, &*hits);
    let outcomes: Vec<Outcome> = (0..n)
        .into_par_iter()
        .map(|i| shade_path(depth, &input.rays[i], &input.paths[i], &hits[i], scene, params))
        .collect();

    let capacity = shadow_rays.len();
    let mut pending = counters.shadow_rays as usize;
    let mut extended = 0usize;
    for (i, out) in outcomes.into_iter().enumerate() {
        let pixel = input.paths[i].pixel as usize;
        if let Some((c, indirect)) = out.radiance {
            accumulator[pixel].add(c, indirect);
        }
        if let (Some((sample, pos)), Some(f)) = (out.feature, features.as_mut()) {
            f.surface[pixel] = sample;
            f.world_pos.current_mut()[pixel] = pos;
        }
        if let Some((instance, triangle, t)) = out.probe {
            counters.probed_instance = instance;
            counters.probed_triangle = triangle;
            counters.probed_distance = t;
        }
        if let Some((ray, potential)) = out.shadow {
            if pending >= capacity {
                return Err(Error::ShadowQueueOverflow {
                    requested: pending + 1,
                    capacity,
                });
            }
            shadow_rays[pending] = ray;
            potentials[pending] = potential;
            pending += 1;
        }
        if let Some((ray, state)) = out.extension {
            output.rays[extended] = ray;
            output.paths[extended] = state;
            extended += 1;
        }
    }
    counters.extension_rays = extended as u32;
    counters.shadow_rays = pending as u32;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::BvhTracer;
    use crate::device::RayTracer;
    use crate::kernels::{spawn_primary, test_util, NoiseTable};
    use crate::scene::demo::DemoScene;
    use crate::scene::LightSet;

    fn scene(demo: &DemoScene) -> (SceneStore, BvhTracer) {
        let mut s = SceneStore::new();
        for (i, (v, a)) in demo.meshes.iter().enumerate() {
            s.set_geometry(i, v, a);
        }
        for (i, (m, t)) in demo.instances.iter().enumerate() {
            s.set_instance(i, *m, *t);
        }
        s.set_materials(&demo.materials);
        s.set_lights(&LightSet {
            triangles: &demo.tri_lights,
            points: &demo.point_lights,
            ..Default::default()
        });
        s.update_instance_descs();
        let mut tracer = BvhTracer::new();
        for (i, m) in s.meshes.iter().enumerate() {
            tracer.build_mesh(i, m).unwrap();
        }
        tracer.build_instances(&s.instance_descs, &s.meshes).unwrap();
        (s, tracer)
    }

    #[test]
    fn test_primary_shade_counts() {
        let (scene, tracer) = scene(&DemoScene::single_triangle());
        let params = test_util::params(8, 8, 1);
        let mut pool = test_util::pool(8, 8, 1);
        let mut counters = Counters::default();
        spawn_primary(64, &params, &NoiseTable::new(), &mut pool).unwrap();
        let BufferPool { queues, hits, .. } = &mut pool;
        tracer.intersect(&queues.current().rays[..64], &mut hits[..64]).unwrap();
        let hit_count = hits[..64].iter().filter(|h| !h.is_miss()).count();
        assert!(hit_count > 0 && hit_count < 64);

        shade(1, 64, &params, &scene, &mut pool, &mut counters).unwrap();
        // Every lit hit emits one shadow ray and one continuation.
        assert!(counters.extension_rays as usize <= hit_count);
        assert!(counters.shadow_rays as usize <= hit_count);
        assert!(counters.shadow_rays > 0);
        let f = pool.features.as_ref().unwrap();
        assert_eq!(f.surface.iter().take(64).filter(|s| !s.is_sky()).count(), hit_count);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let (scene, tracer) = scene(&DemoScene::single_triangle());
        let params = test_util::params(8, 8, 1);
        let config = crate::render::CoreConfig {
            shadow_queue_capacity: Some(1),
            ..Default::default()
        };
        let mut pool = crate::render::BufferPool::allocate(crate::render::PoolLayout::new(8, 8, 1, &config), false, 1);
        let mut counters = Counters::default();
        spawn_primary(64, &params, &NoiseTable::new(), &mut pool).unwrap();
        let BufferPool { queues, hits, .. } = &mut pool;
        tracer.intersect(&queues.current().rays[..64], &mut hits[..64]).unwrap();
        let err = shade(1, 64, &params, &scene, &mut pool, &mut counters).unwrap_err();
        assert!(matches!(err, Error::ShadowQueueOverflow { capacity: 1, .. }));
    }

    #[test]
    fn test_no_lights_no_shadow_rays() {
        let mut demo = DemoScene::single_triangle();
        demo.point_lights.clear();
        let (scene, tracer) = scene(&demo);
        let mut params = test_util::params(8, 8, 1);
        params.shadows = !scene.no_direct_lights();
        let mut pool = test_util::pool(8, 8, 1);
        let mut counters = Counters::default();
        spawn_primary(64, &params, &NoiseTable::new(), &mut pool).unwrap();
        let BufferPool { queues, hits, .. } = &mut pool;
        tracer.intersect(&queues.current().rays[..64], &mut hits[..64]).unwrap();
        shade(1, 64, &params, &scene, &mut pool, &mut counters).unwrap();
        assert_eq!(counters.shadow_rays, 0);
    }

    #[test]
    fn test_max_depth_truncates() {
        let (scene, tracer) = scene(&DemoScene::single_triangle());
        let mut params = test_util::params(8, 8, 1);
        params.max_depth = 1;
        let mut pool = test_util::pool(8, 8, 1);
        let mut counters = Counters::default();
        spawn_primary(64, &params, &NoiseTable::new(), &mut pool).unwrap();
        let BufferPool { queues, hits, .. } = &mut pool;
        tracer.intersect(&queues.current().rays[..64], &mut hits[..64]).unwrap();
        shade(1, 64, &params, &scene, &mut pool, &mut counters).unwrap();
        assert_eq!(counters.extension_rays, 0);
    }
}
