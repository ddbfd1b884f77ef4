//! Raw argument reader.
//!
//! Some commands want the argument suffix as bytes (free text, or a base64
//! blob of packed values) instead of the `:code` grammar. [`RawArgs`] copies
//! the span into a bounded buffer and reads it with its own cursor. When it
//! touches the quantization register it opens its own scope, so whatever
//! the main argument cursor configured comes back once the reader is dropped.

use std::borrow::Cow;

use base64::Engine as _;

use super::error::RuntimeError;
use crate::BASE64;
use crate::quant::{QuantRegister, QuantScope, QuantType};

pub const RAW_CAPACITY: usize = 0x100;

pub struct RawArgs {
    buffer: Vec<u8>,
    seek: usize,
    quant: QuantRegister,
    scope: Option<QuantScope>,
}

impl RawArgs {
    pub fn new(quant: &QuantRegister) -> Self {
        RawArgs {
            buffer: Vec::new(),
            seek: 0,
            quant: quant.clone(),
            scope: None,
        }
    }

    /// Bind to an argument suffix, dropping its leading `:`.
    pub fn set_arg_text(&mut self, suffix: &str) {
        let text = suffix.strip_prefix(':').unwrap_or(suffix);
        self.set_text(text.as_bytes());
    }

    /// Oversized spans are cut to one byte short of capacity.
    pub fn set_text(&mut self, text: &[u8]) {
        let len = if text.len() > RAW_CAPACITY { RAW_CAPACITY - 1 } else { text.len() };
        self.buffer.clear();
        self.buffer.extend_from_slice(&text[..len]);
        self.seek = 0;
    }

    pub fn seek(&self) -> usize {
        self.seek
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.seek
    }

    pub fn set_quant_scale(&mut self, scale: i32) {
        self.mark_dirty();
        self.quant.set_scale(scale);
    }

    pub fn set_quant_type(&mut self, ty: QuantType) {
        self.mark_dirty();
        self.quant.set_type(ty);
    }

    fn mark_dirty(&mut self) {
        if self.scope.is_none() {
            self.scope = Some(self.quant.scope());
        }
    }

    /// Decode one value with the live quantization settings.
    pub fn get_quant(&mut self) -> Result<f32, RuntimeError> {
        let width = self.quant.get().ty().width();
        if self.remaining() < width {
            return Err(RuntimeError::QuantOverrun);
        }
        let v = self.quant.decode(&self.buffer[self.seek..]).unwrap_or(0.0);
        self.seek += width;
        Ok(v)
    }

    pub fn get_char(&mut self) -> Result<u8, RuntimeError> {
        let c = *self.buffer.get(self.seek).ok_or(RuntimeError::CharOverrun)?;
        self.seek += 1;
        Ok(c)
    }

    /// Everything from the cursor on.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer[self.seek..])
    }

    /// Replace the buffer with the base64 decoding of the remaining bytes
    /// (up to the first NUL) and rewind.
    pub fn decompress_base64(&mut self) -> Result<(), RuntimeError> {
        let rest = &self.buffer[self.seek..];
        let encoded = match rest.iter().position(|&b| b == 0) {
            Some(nul) => &rest[..nul],
            None => rest,
        };
        let decoded = BASE64.decode(encoded);
        self.seek = 0;
        match decoded {
            Ok(mut data) => {
                data.truncate(RAW_CAPACITY);
                self.buffer = data;
                Ok(())
            }
            Err(_) => {
                self.buffer.clear();
                Err(RuntimeError::BadRawBase64)
            }
        }
    }
}
