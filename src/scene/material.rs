//! Materials and texture storage.
//!
//! Host materials reference textures by index; [`TextureStore::sync`] packs
//! every texture into one of three concatenated texel arrays and the
//! device materials carry the resulting offsets.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Texel storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TexelStorage {
    /// 8-bit RGBA packed into a `u32` (r in the low byte).
    #[default]
    Argb32,
    /// Float RGBA.
    Argb128,
    /// Packed normal map.
    Nrm32,
}

impl TexelStorage {
    fn code(self) -> u32 {
        match self {
            TexelStorage::Argb32 => 0,
            TexelStorage::Argb128 => 1,
            TexelStorage::Nrm32 => 2,
        }
    }
}

/// Texel payload of a host texture.
#[derive(Debug, Clone)]
pub enum TexelData {
    Packed(Vec<u32>),
    Float(Vec<[f32; 4]>),
}

/// Texture as supplied by the host application.
#[derive(Debug, Clone)]
pub struct HostTexture {
    pub width: u32,
    pub height: u32,
    pub storage: TexelStorage,
    pub data: TexelData,
}

/// Location of one texture inside the concatenated texel arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSlot {
    pub storage: TexelStorage,
    pub first_pixel: u32,
    pub width: u32,
    pub height: u32,
}

/// Concatenated texel arrays, one per storage class.
#[derive(Debug, Default)]
pub struct TextureStore {
    pub argb32: Vec<u32>,
    pub argb128: Vec<[f32; 4]>,
    pub nrm32: Vec<u32>,
    pub slots: Vec<TextureSlot>,
}

/// Device arrays never shrink below this many texels.
const MIN_TEXELS: usize = 16;

impl TextureStore {
    /// Repack all textures. Arrays keep their capacity when the new data fits.
    pub fn sync(&mut self, textures: &[HostTexture]) {
        self.argb32.clear();
        self.argb128.clear();
        self.nrm32.clear();
        self.slots.clear();
        for tex in textures {
            let first_pixel = match tex.storage {
                TexelStorage::Argb32 => self.argb32.len(),
                TexelStorage::Argb128 => self.argb128.len(),
                TexelStorage::Nrm32 => self.nrm32.len(),
            } as u32;
            let count = (tex.width * tex.height) as usize;
            match (tex.storage, &tex.data) {
                (TexelStorage::Argb32, TexelData::Packed(p)) => push_packed(&mut self.argb32, p, count),
                (TexelStorage::Nrm32, TexelData::Packed(p)) => push_packed(&mut self.nrm32, p, count),
                (TexelStorage::Argb128, TexelData::Float(f)) => {
                    self.argb128.extend(f.iter().take(count));
                    self.argb128.resize(first_pixel as usize + count, [0.0; 4]);
                }
                (TexelStorage::Argb128, TexelData::Packed(p)) => {
                    self.argb128.extend(p.iter().take(count).map(|&x| unpack_argb32(x).extend(1.0).to_array()));
                    self.argb128.resize(first_pixel as usize + count, [0.0; 4]);
                }
                (_, TexelData::Float(f)) => {
                    let dst = if tex.storage == TexelStorage::Nrm32 { &mut self.nrm32 } else { &mut self.argb32 };
                    dst.extend(f.iter().take(count).map(|c| pack_argb32(Vec3::new(c[0], c[1], c[2]))));
                    dst.resize(first_pixel as usize + count, 0);
                }
            }
            self.slots.push(TextureSlot {
                storage: tex.storage,
                first_pixel,
                width: tex.width,
                height: tex.height,
            });
        }
        if self.argb32.len() < MIN_TEXELS {
            self.argb32.resize(MIN_TEXELS, 0);
        }
        if self.argb128.len() < MIN_TEXELS {
            self.argb128.resize(MIN_TEXELS, [0.0; 4]);
        }
        if self.nrm32.len() < MIN_TEXELS {
            self.nrm32.resize(MIN_TEXELS, 0);
        }
    }

    /// Texel counts per storage class, as reported in the core stats.
    pub fn texel_counts(&self) -> [usize; 3] {
        [self.argb32.len(), self.argb128.len(), self.nrm32.len()]
    }

    /// Nearest-texel fetch with wrapping.
    pub fn sample(&self, slot: &TextureSlot, uv: Vec2) -> Vec3 {
        if slot.width == 0 || slot.height == 0 {
            return Vec3::ONE;
        }
        let fx = uv.x - uv.x.floor();
        let fy = uv.y - uv.y.floor();
        let x = ((fx * slot.width as f32) as u32).min(slot.width - 1);
        let y = ((fy * slot.height as f32) as u32).min(slot.height - 1);
        let idx = (slot.first_pixel + y * slot.width + x) as usize;
        match slot.storage {
            TexelStorage::Argb32 => self.argb32.get(idx).map_or(Vec3::ONE, |&t| unpack_argb32(t)),
            TexelStorage::Argb128 => self.argb128.get(idx).map_or(Vec3::ONE, |t| Vec3::new(t[0], t[1], t[2])),
            TexelStorage::Nrm32 => self.nrm32.get(idx).map_or(Vec3::Z, |&t| unpack_argb32(t) * 2.0 - Vec3::ONE),
        }
    }
}

fn push_packed(dst: &mut Vec<u32>, src: &[u32], count: usize) {
    let start = dst.len();
    dst.extend(src.iter().take(count));
    dst.resize(start + count, 0);
}

#[inline]
pub fn unpack_argb32(x: u32) -> Vec3 {
    Vec3::new(
        (x & 255) as f32,
        ((x >> 8) & 255) as f32,
        ((x >> 16) & 255) as f32,
    ) / 255.0
}

#[inline]
pub fn pack_argb32(c: Vec3) -> u32 {
    let c = (c.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
    (c.x as u32) | ((c.y as u32) << 8) | ((c.z as u32) << 16) | (255 << 24)
}

/// Material as authored by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostMaterial {
    pub color: Vec3,
    pub emission: Vec3,
    /// Index into the texture list passed to `set_textures`.
    pub diffuse_texture: Option<u32>,
    /// Emit from both faces.
    pub two_sided: bool,
}

impl Default for HostMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::splat(0.8),
            emission: Vec3::ZERO,
            diffuse_texture: None,
            two_sided: false,
        }
    }
}

impl HostMaterial {
    pub fn diffuse(color: Vec3) -> Self {
        Self { color, ..Default::default() }
    }

    pub fn emissive(emission: Vec3) -> Self {
        Self {
            color: Vec3::ZERO,
            emission,
            ..Default::default()
        }
    }
}

/// Compact device material (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DeviceMaterial {
    pub diffuse: [f32; 3],
    /// Index into the texture slot table, -1 when untextured.
    pub texture: i32,
    pub emission: [f32; 3],
    pub flags: u32,
    pub tex_first_pixel: u32,
    pub tex_size: [u32; 2],
    pub tex_storage: u32,
}

impl DeviceMaterial {
    pub const FLAG_EMISSIVE: u32 = 1;
    pub const FLAG_TWO_SIDED: u32 = 2;

    /// Convert a host material; texture references resolve against `slots`.
    pub fn from_host(m: &HostMaterial, slots: &[TextureSlot]) -> Self {
        let slot = m.diffuse_texture.and_then(|t| slots.get(t as usize).map(|s| (t, s)));
        let mut flags = 0;
        if m.emission.max_element() > 0.0 {
            flags |= Self::FLAG_EMISSIVE;
        }
        if m.two_sided {
            flags |= Self::FLAG_TWO_SIDED;
        }
        Self {
            diffuse: m.color.to_array(),
            texture: slot.map_or(-1, |(t, _)| t as i32),
            emission: m.emission.to_array(),
            flags,
            tex_first_pixel: slot.map_or(0, |(_, s)| s.first_pixel),
            tex_size: slot.map_or([0, 0], |(_, s)| [s.width, s.height]),
            tex_storage: slot.map_or(0, |(_, s)| s.storage.code()),
        }
    }

    #[inline]
    pub fn is_emissive(&self) -> bool {
        self.flags & Self::FLAG_EMISSIVE != 0
    }

    #[inline]
    pub fn diffuse(&self) -> Vec3 {
        Vec3::from_array(self.diffuse)
    }

    #[inline]
    pub fn emission(&self) -> Vec3 {
        Vec3::from_array(self.emission)
    }
}
