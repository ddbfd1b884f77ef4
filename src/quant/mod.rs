//! Fixed-point quantization codec.
//!
//! A [`QuantConfig`] pairs a representation type (float passthrough or an
//! 8/16-bit integer, signed or unsigned) with a 6-bit scale. Decoding a raw
//! integer yields `raw * 2^-scale`; encoding is the inverse, rounded and
//! saturated to the selected width.
//!
//! The live configuration sits in a [`QuantRegister`] shared by everything
//! that runs during one command. Code that repurposes it opens a
//! [`QuantScope`], which puts the previous configuration back when dropped.

use std::cell::Cell;
use std::rc::Rc;

use base64::Engine as _;

use crate::BASE64;

pub const SCALE_BITS: u32 = 6;
const SCALE_MASK: i32 = (1 << SCALE_BITS) - 1;

/// Scale and type used by the `weight` command's coefficient blob.
pub const WEIGHT_SCALE: i32 = 6;
pub const WEIGHT_TYPE: QuantType = QuantType::Int8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantType {
    Float,
    UInt8,
    UInt16,
    Int8,
    Int16,
}

impl QuantType {
    /// Register encoding of the type field.
    pub fn bits(self) -> u8 {
        match self {
            QuantType::Float => 0,
            QuantType::UInt8 => 4,
            QuantType::UInt16 => 5,
            QuantType::Int8 => 6,
            QuantType::Int16 => 7,
        }
    }

    /// Bytes occupied by one encoded value.
    pub fn width(self) -> usize {
        match self {
            QuantType::Float => 4,
            QuantType::UInt16 | QuantType::Int16 => 2,
            QuantType::UInt8 | QuantType::Int8 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantConfig {
    scale: u8,
    ty: QuantType,
}

impl Default for QuantConfig {
    fn default() -> Self {
        QuantConfig { scale: 0, ty: QuantType::UInt16 }
    }
}

impl QuantConfig {
    pub fn new(scale: i32, ty: QuantType) -> Self {
        let mut cfg = QuantConfig { scale: 0, ty };
        cfg.set_scale(scale);
        cfg
    }

    /// Only the low six bits are kept; anything else wraps.
    pub fn set_scale(&mut self, scale: i32) {
        self.scale = (scale & SCALE_MASK) as u8;
    }

    pub fn set_type(&mut self, ty: QuantType) {
        self.ty = ty;
    }

    /// The scale as the signed shift it encodes (-32..=31).
    pub fn scale(&self) -> i32 {
        let s = self.scale as i32;
        if s > SCALE_MASK >> 1 { s - (SCALE_MASK + 1) } else { s }
    }

    pub fn ty(&self) -> QuantType {
        self.ty
    }

    /// Packed load/store fields as the hardware register lays them out
    /// (scale at bits 24 and 8, type at bits 16 and 0). Used for tracing.
    pub fn register_bits(&self) -> u32 {
        let scale = self.scale as u32;
        let ty = self.ty.bits() as u32;
        scale << 24 | ty << 16 | scale << 8 | ty
    }

    /// Decode one big-endian value from the front of `bytes`.
    /// Returns `None` when fewer than `width` bytes are available.
    pub fn decode(&self, bytes: &[u8]) -> Option<f32> {
        let raw = bytes.get(..self.ty.width())?;
        let factor = 2f32.powi(-self.scale());
        let v = match self.ty {
            QuantType::Float => return Some(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            QuantType::UInt8 => raw[0] as f32,
            QuantType::Int8 => raw[0] as i8 as f32,
            QuantType::UInt16 => u16::from_be_bytes([raw[0], raw[1]]) as f32,
            QuantType::Int16 => i16::from_be_bytes([raw[0], raw[1]]) as f32,
        };
        Some(v * factor)
    }

    /// Encode `value` into `width` big-endian bytes, saturating at the
    /// bounds of the integer types.
    pub fn encode(&self, value: f32) -> Vec<u8> {
        let scaled = (value * 2f32.powi(self.scale())).round();
        match self.ty {
            QuantType::Float => value.to_be_bytes().to_vec(),
            QuantType::UInt8 => vec![scaled as u8],
            QuantType::Int8 => vec![scaled as i8 as u8],
            QuantType::UInt16 => (scaled as u16).to_be_bytes().to_vec(),
            QuantType::Int16 => (scaled as i16).to_be_bytes().to_vec(),
        }
    }
}

/// The live codec configuration for one request.
#[derive(Debug, Clone, Default)]
pub struct QuantRegister(Rc<Cell<QuantConfig>>);

impl QuantRegister {
    pub fn new(cfg: QuantConfig) -> Self {
        QuantRegister(Rc::new(Cell::new(cfg)))
    }

    pub fn get(&self) -> QuantConfig {
        self.0.get()
    }

    pub fn set(&self, cfg: QuantConfig) {
        self.0.set(cfg);
    }

    pub fn set_scale(&self, scale: i32) {
        let mut cfg = self.get();
        cfg.set_scale(scale);
        self.set(cfg);
    }

    pub fn set_type(&self, ty: QuantType) {
        let mut cfg = self.get();
        cfg.set_type(ty);
        self.set(cfg);
    }

    pub fn decode(&self, bytes: &[u8]) -> Option<f32> {
        self.get().decode(bytes)
    }

    /// Snapshot the current configuration; it is restored when the
    /// returned scope is dropped.
    pub fn scope(&self) -> QuantScope {
        QuantScope { register: self.clone(), saved: self.get() }
    }
}

pub struct QuantScope {
    register: QuantRegister,
    saved: QuantConfig,
}

impl std::ops::Deref for QuantScope {
    type Target = QuantRegister;

    fn deref(&self) -> &QuantRegister {
        &self.register
    }
}

impl Drop for QuantScope {
    fn drop(&mut self) {
        self.register.set(self.saved);
    }
}

/// Build the payload of a `p` argument: one scale byte followed by signed
/// 16-bit entries.
pub fn pack_paired(scale: i32, values: &[f32]) -> String {
    let cfg = QuantConfig::new(scale, QuantType::Int16);
    let mut data = vec![scale as i8 as u8];
    for v in values {
        data.extend(cfg.encode(*v));
    }
    BASE64.encode(data)
}

/// Build the coefficient blob consumed by `weight`.
pub fn pack_weights(values: &[f32]) -> String {
    let cfg = QuantConfig::new(WEIGHT_SCALE, WEIGHT_TYPE);
    let data: Vec<u8> = values.iter().flat_map(|v| cfg.encode(*v)).collect();
    BASE64.encode(data)
}
