//! Reprojection filter kernels.
//!
//! Radiance is demodulated by the primary-hit albedo, filtered with three
//! a-trous passes guided by normals, depth and luminance variance, then
//! remodulated. Optional temporal blending clamps the reprojected history
//! to the current neighbourhood.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use rayon::prelude::*;

use super::KernelParams;
use crate::device::FilterPass;
use crate::render::{BufferPool, FeatureBuffers, FilterView, SurfaceSample};
use crate::util::{clamp_radiance, luminance};
use crate::Result;

/// B3-spline taps for offsets 0, 1 and 2.
const B3: [f32; 3] = [3.0 / 8.0, 1.0 / 4.0, 1.0 / 16.0];
const SIGMA_DEPTH: f32 = 1.0;
const SIGMA_NORMAL: i32 = 128;
const SIGMA_LUMINANCE: f32 = 4.0;
/// History weight falls to this share of the new moments each frame.
const MOMENT_ALPHA: f32 = 0.2;
/// Share of the current frame in the temporal blend.
const TAA_ALPHA: f32 = 0.1;
const UNSHARP_AMOUNT: f32 = 0.25;
/// Relative world-space distance above which history is rejected.
const HISTORY_TOLERANCE: f32 = 0.02;

#[inline]
fn xy(p: usize, width: usize) -> (usize, usize) {
    (p % width, p / width)
}

/// Motion vector and matching previous-frame pixel for pixel (x, y).
fn reproject(x: usize, y: usize, pos: Vec4, prev_world: &[Vec4], params: &KernelParams) -> (Vec2, u32) {
    if pos.w <= 0.0 {
        return (Vec2::ZERO, u32::MAX);
    }
    let (w, h) = (params.width, params.height);
    let current = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) + params.jitter;
    let Some(prev) = params.prev_view.project(pos.xyz(), w, h) else {
        return (Vec2::ZERO, u32::MAX);
    };
    let motion = current - prev;
    let q = (prev - params.prev_jitter - Vec2::splat(0.5)).round();
    if q.x < 0.0 || q.y < 0.0 || q.x >= w as f32 || q.y >= h as f32 {
        return (motion, u32::MAX);
    }
    let hp = q.y as u32 * w + q.x as u32;
    let old = prev_world[hp as usize];
    let tolerance = HISTORY_TOLERANCE * pos.w.max(old.w) + params.epsilon;
    if old.w <= 0.0 || old.xyz().distance(pos.xyz()) > tolerance {
        return (motion, u32::MAX);
    }
    (motion, hp)
}

fn depth_gradient(x: usize, y: usize, world: &[Vec4], width: usize, height: usize) -> Vec2 {
    let z = |x: usize, y: usize| world[y * width + x].w;
    let (x0, x1) = (x.saturating_sub(1), (x + 1).min(width - 1));
    let (y0, y1) = (y.saturating_sub(1), (y + 1).min(height - 1));
    let dx = if x1 > x0 { (z(x1, y) - z(x0, y)) / (x1 - x0) as f32 } else { 0.0 };
    let dy = if y1 > y0 { (z(x, y1) - z(x, y0)) / (y1 - y0) as f32 } else { 0.0 };
    Vec2::new(dx, dy)
}

#[inline]
fn moments_of(direct: Vec3, indirect: Vec3) -> Vec4 {
    let (ld, li) = (luminance(direct), luminance(indirect));
    Vec4::new(ld, ld * ld, li, li * li)
}

/// Demodulate the accumulator, reproject against history and estimate
/// per-pixel variance.
pub fn prepare_filter(params: &KernelParams, pool: &mut BufferPool) -> Result<()> {
    let BufferPool { accumulator, features, .. } = pool;
    let Some(f) = features.as_mut() else {
        return Ok(());
    };
    let FeatureBuffers {
        surface,
        world_pos,
        delta_depth,
        motion,
        history,
        moments,
        shading,
        ..
    } = f;
    let (width, height) = (params.width as usize, params.height as usize);
    let pixels = params.pixels();
    let scale = 1.0 / params.accumulated.max(1) as f32;
    let (world, prev_world) = (world_pos.current(), world_pos.previous());
    let shading = &mut shading.current_mut()[..2 * pixels];

    shading
        .par_chunks_mut(2)
        .zip(motion[..pixels].par_iter_mut())
        .zip(history[..pixels].par_iter_mut())
        .zip(delta_depth[..pixels].par_iter_mut())
        .enumerate()
        .for_each(|(p, (((texels, mv), hist), dd))| {
            let albedo = surface[p].albedo.max(Vec3::splat(1.0e-3));
            let acc = &accumulator[p];
            let direct = clamp_radiance(acc.direct.truncate() * scale, params.clamp_direct);
            let indirect = clamp_radiance(acc.indirect.truncate() * scale, params.clamp_indirect);
            texels[0] = (direct / albedo).extend(0.0);
            texels[1] = (indirect / albedo).extend(0.0);
            let (x, y) = xy(p, width);
            (*mv, *hist) = reproject(x, y, world[p], prev_world, params);
            *dd = depth_gradient(x, y, world, width, height);
        });

    let (moments, prev_moments) = moments.split_mut();
    let shading_ro: &[Vec4] = shading;
    let estimates: Vec<Vec4> = (0..pixels)
        .into_par_iter()
        .map(|p| {
            let here = moments_of(shading_ro[2 * p].truncate(), shading_ro[2 * p + 1].truncate());
            let hp = history[p];
            if params.stationary && hp != u32::MAX {
                return prev_moments[hp as usize].lerp(here, MOMENT_ALPHA);
            }
            // Spatial fallback over same-surface neighbours.
            let (x, y) = xy(p, width);
            let mut sum = Vec4::ZERO;
            let mut n = 0.0;
            for qy in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for qx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let q = qy * width + qx;
                    if surface[q].instance == surface[p].instance {
                        sum += moments_of(shading_ro[2 * q].truncate(), shading_ro[2 * q + 1].truncate());
                        n += 1.0;
                    }
                }
            }
            sum / n
        })
        .collect();

    moments[..pixels].copy_from_slice(&estimates);
    for (p, m) in estimates.iter().enumerate() {
        shading[2 * p].w = (m.y - m.x * m.x).max(0.0);
        shading[2 * p + 1].w = (m.w - m.z * m.z).max(0.0);
    }
    Ok(())
}

#[inline]
fn edge_weight(center: Vec4, sample: Vec4, sigma: f32) -> f32 {
    (-(luminance(center.truncate()) - luminance(sample.truncate())).abs() / sigma).exp()
}

/// One a-trous pass with footprint `2^(phase-1)`.
pub fn apply_filter(pass: &FilterPass, params: &KernelParams, pool: &mut BufferPool) -> Result<()> {
    let Some(f) = pool.features.as_mut() else {
        return Ok(());
    };
    let FilterView {
        surface,
        world_pos: world,
        delta_depth: grad,
        input,
        output,
    } = f.filter_view(pass.input, pass.output)?;
    let (width, height) = (params.width as i64, params.height as i64);
    let pixels = params.pixels();
    let step = 1i64 << pass.phase.saturating_sub(1);

    output[..2 * pixels].par_chunks_mut(2).enumerate().for_each(|(p, out)| {
        let s: &SurfaceSample = &surface[p];
        let (cd, ci) = (input[2 * p], input[2 * p + 1]);
        if s.is_sky() {
            let m = if pass.last { s.albedo.extend(1.0) } else { Vec4::ONE };
            out[0] = cd * m;
            out[1] = ci * m;
            return;
        }
        let (x, y) = (p as i64 % width, p as i64 / width);
        let z = world[p].w;
        let dz = grad[p];
        let sigma_d = SIGMA_LUMINANCE * cd.w.max(0.0).sqrt() + 1.0e-4;
        let sigma_i = SIGMA_LUMINANCE * ci.w.max(0.0).sqrt() + 1.0e-4;

        let (mut sum_d, mut sum_i) = (Vec3::ZERO, Vec3::ZERO);
        let (mut var_d, mut var_i) = (0.0f32, 0.0f32);
        let (mut w_d, mut w_i) = (0.0f32, 0.0f32);
        for j in -2i64..=2 {
            for i in -2i64..=2 {
                let (qx, qy) = (x + i * step, y + j * step);
                if qx < 0 || qy < 0 || qx >= width || qy >= height {
                    continue;
                }
                let q = (qy * width + qx) as usize;
                let sq = &surface[q];
                if sq.instance != s.instance {
                    continue;
                }
                let h = B3[i.unsigned_abs() as usize] * B3[j.unsigned_abs() as usize];
                let reach = (dz.x * (i * step) as f32).abs() + (dz.y * (j * step) as f32).abs();
                let wz = (-(world[q].w - z).abs() / (SIGMA_DEPTH * reach + 1.0e-2)).exp();
                let wn = s.normal.dot(sq.normal).max(0.0).powi(SIGMA_NORMAL);
                let (qd, qi) = (input[2 * q], input[2 * q + 1]);
                let kd = h * wz * wn * edge_weight(cd, qd, sigma_d);
                let ki = h * wz * wn * edge_weight(ci, qi, sigma_i);
                sum_d += qd.truncate() * kd;
                sum_i += qi.truncate() * ki;
                var_d += kd * kd * qd.w;
                var_i += ki * ki * qi.w;
                w_d += kd;
                w_i += ki;
            }
        }
        let resolve = |sum: Vec3, var: f32, w: f32, fallback: Vec4| {
            if w > 0.0 {
                (sum / w).extend(var / (w * w))
            } else {
                fallback
            }
        };
        out[0] = resolve(sum_d, var_d, w_d, cd);
        out[1] = resolve(sum_i, var_i, w_i, ci);
        if pass.last {
            out[0] = (out[0].truncate() * s.albedo).extend(out[0].w);
            out[1] = (out[1].truncate() * s.albedo).extend(out[1].w);
        }
    });
    Ok(())
}

/// Blend the filtered frame with clamped, reprojected history.
pub fn taa(params: &KernelParams, pool: &mut BufferPool) -> Result<()> {
    let Some(f) = pool.features.as_mut() else {
        return Ok(());
    };
    let (width, height) = (params.width as usize, params.height as usize);
    let pixels = params.pixels();
    let history = &f.history;
    let (current, previous) = f.shading.split_mut();
    let color: Vec<Vec3> = current[..2 * pixels]
        .par_chunks(2)
        .map(|t| t[0].truncate() + t[1].truncate())
        .collect();
    let blended: Vec<Vec3> = (0..pixels)
        .into_par_iter()
        .map(|p| {
            let c = color[p];
            let hp = history[p];
            if hp == u32::MAX {
                return c;
            }
            let (x, y) = xy(p, width);
            let (mut lo, mut hi) = (c, c);
            for qy in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for qx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let n = color[qy * width + qx];
                    lo = lo.min(n);
                    hi = hi.max(n);
                }
            }
            let hp = hp as usize;
            let old = (previous[2 * hp].truncate() + previous[2 * hp + 1].truncate()).clamp(lo, hi);
            old.lerp(c, TAA_ALPHA)
        })
        .collect();
    current[..2 * pixels]
        .par_chunks_mut(2)
        .zip(blended.par_iter())
        .for_each(|(t, c)| {
            t[0] = c.extend(1.0);
            t[1] = Vec4::ZERO;
        });
    Ok(())
}

/// Sharpen the temporally blended image into the display buffer.
pub fn unsharpen(params: &KernelParams, pool: &mut BufferPool) -> Result<()> {
    let BufferPool { features, display, .. } = pool;
    let Some(f) = features.as_ref() else {
        return Ok(());
    };
    let (width, height) = (params.width as usize, params.height as usize);
    let src = f.shading.current();
    let color = |x: usize, y: usize| {
        let p = y * width + x;
        src[2 * p].truncate() + src[2 * p + 1].truncate()
    };
    display.par_iter_mut().enumerate().for_each(|(p, out)| {
        let (x, y) = xy(p, width);
        let c = color(x, y);
        let blur = (color(x.saturating_sub(1), y)
            + color((x + 1).min(width - 1), y)
            + color(x, y.saturating_sub(1))
            + color(x, (y + 1).min(height - 1)))
            * 0.25;
        *out = (c + (c - blur) * UNSHARP_AMOUNT).max(Vec3::ZERO).extend(1.0);
    });
    Ok(())
}
