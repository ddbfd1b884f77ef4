//! Argument suffix grammar.
//!
//! ```text
//! args := ( ':' code payload )*
//! code := 'i' | 'f' | 's' | 'p'
//! ```
//!
//! Each fetch either consumes the next entry of a decoded paired batch, parses
//! the next `:`-delimited immediate, or, once the text is exhausted, pops an
//! implicit argument from below the stack's argument boundary (Int 0 when
//! nothing is left).

use base64::Engine as _;
use tracing::{debug, trace};

use super::error::SyntaxError;
use super::stack::{StackValue, ValueStack};
use crate::BASE64;
use crate::quant::{QuantRegister, QuantType};

/// Entries kept from one paired batch; the rest are dropped.
pub const PAIRED_MAX: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Immediate {
    Int(i32),
    Float(f32),
    Paired,
}

#[derive(Debug)]
pub struct ArgCursor<'t> {
    text: &'t str,
    current: Immediate,
    batch: [u16; PAIRED_MAX],
    next: usize,
    available: usize,
}

impl<'t> ArgCursor<'t> {
    pub fn new(text: &'t str) -> Self {
        ArgCursor {
            text,
            current: Immediate::Int(0),
            batch: [0; PAIRED_MAX],
            next: 0,
            available: 0,
        }
    }

    /// The unparsed remainder of the suffix.
    pub fn remaining(&self) -> &'t str {
        self.text
    }

    /// No text and no batch entries left; further fetches come from the stack.
    pub fn is_exhausted(&self) -> bool {
        self.text.is_empty() && self.next + 1 >= self.available
    }

    /// Give the unparsed suffix away to a raw reader. Every later fetch
    /// falls back to the stack.
    pub fn take_raw(&mut self) -> &'t str {
        let text = std::mem::take(&mut self.text);
        self.next = 0;
        self.available = 0;
        text
    }

    /// Move to the next argument.
    pub fn advance(&mut self, stack: &mut ValueStack, quant: &QuantRegister) -> Result<(), SyntaxError> {
        self.next += 1;
        if self.next < self.available {
            return Ok(());
        }

        // Paired overrides this.
        self.next = 0;
        self.available = 1;

        let mut chars = self.text.chars();
        if chars.next().is_none() {
            self.load_stack(stack);
            return Ok(());
        }
        let rest = chars.as_str();

        let Some(code) = rest.chars().next() else {
            return Err(SyntaxError::ExpectedTypeCode);
        };
        let after_code = &rest[code.len_utf8()..];
        let end = after_code.find(':').unwrap_or(after_code.len());
        let payload = &after_code[..end];

        let consumed = match code {
            's' => {
                self.load_stack(stack);
                0
            }
            'i' => {
                let (v, n) = scan_int(payload);
                self.current = Immediate::Int(v);
                n
            }
            'f' => {
                let (v, n) = scan_float(payload);
                self.current = Immediate::Float(v);
                n
            }
            'p' => {
                self.load_paired(payload, quant)?;
                payload.len()
            }
            _ => return Err(SyntaxError::UnexpectedTypeCode),
        };

        if consumed != payload.len() {
            return Err(SyntaxError::PostImmediateText);
        }

        self.text = &after_code[end..];
        Ok(())
    }

    fn load_stack(&mut self, stack: &mut ValueStack) {
        self.current = match stack.pop_arg() {
            Some(StackValue::Int(i)) => Immediate::Int(i),
            Some(StackValue::Float(f)) => Immediate::Float(f),
            None => Immediate::Int(0),
        };
    }

    fn load_paired(&mut self, payload: &str, quant: &QuantRegister) -> Result<(), SyntaxError> {
        let data = BASE64.decode(payload).map_err(|_| SyntaxError::BadPairedText)?;

        // One byte of scale, then 16-bit entries.
        if data.len() < 3 || (data.len() - 1) % 2 != 0 {
            return Err(SyntaxError::BadPairedLen);
        }

        let scale = data[0] as i8 as i32;
        let count = (data.len() - 1) / 2;
        debug!(scale, count, "paired immediate");

        let kept = count.min(PAIRED_MAX);
        for (slot, pair) in self.batch.iter_mut().zip(data[1..].chunks_exact(2)).take(kept) {
            *slot = u16::from_be_bytes([pair[0], pair[1]]);
        }

        self.current = Immediate::Paired;
        self.available = kept;
        quant.set_scale(scale);
        Ok(())
    }

    fn decode_paired(&self, quant: &QuantRegister, ty: QuantType) -> f32 {
        let raw = self.batch[self.next];
        let scope = quant.scope();
        scope.set_type(ty);
        let v = scope.decode(&raw.to_be_bytes()).unwrap_or(0.0);
        trace!(register = format_args!("{:08x}", scope.get().register_bits()), raw, v, "paired decode");
        v
    }

    /// The current argument with no coercion.
    pub fn read_value(&self, quant: &QuantRegister) -> StackValue {
        match self.current {
            Immediate::Int(i) => StackValue::Int(i),
            Immediate::Float(f) => StackValue::Float(f),
            Immediate::Paired => StackValue::Float(self.read_sfloat(quant)),
        }
    }

    pub fn read_sint(&self, quant: &QuantRegister) -> i32 {
        match self.current {
            Immediate::Int(i) => i,
            Immediate::Float(f) => f as i32,
            Immediate::Paired => self.read_sfloat(quant) as i32,
        }
    }

    /// Same coercions as [`read_sint`](Self::read_sint). Negative values are
    /// deliberately left as they are.
    pub fn read_uint(&self, quant: &QuantRegister) -> i32 {
        self.read_sint(quant)
    }

    pub fn read_sfloat(&self, quant: &QuantRegister) -> f32 {
        match self.current {
            Immediate::Int(i) => i as f32,
            Immediate::Float(f) => f,
            Immediate::Paired => self.decode_paired(quant, QuantType::Int16),
        }
    }

    /// Negative results clamp to zero.
    pub fn read_ufloat(&self, quant: &QuantRegister) -> f32 {
        let v = match self.current {
            Immediate::Int(i) => i as f32,
            Immediate::Float(f) => f,
            Immediate::Paired => self.decode_paired(quant, QuantType::UInt16),
        };
        if v < 0.0 { 0.0 } else { v }
    }
}

fn skip_c_space(b: &[u8], mut i: usize) -> usize {
    while i < b.len() && matches!(b[i], b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c) {
        i += 1;
    }
    i
}

/// Leading-integer scan with C `strtol(.., 0)` rules: optional sign, `0x`
/// for hex, leading `0` for octal, saturating to the `i32` range. Returns the
/// value and the number of bytes consumed (0 when no digits were found).
pub(crate) fn scan_int(text: &str) -> (i32, usize) {
    let b = text.as_bytes();
    let mut i = skip_c_space(b, 0);

    let mut negative = false;
    if let Some(&c @ (b'+' | b'-')) = b.get(i) {
        negative = c == b'-';
        i += 1;
    }

    let mut radix = 10;
    if b.get(i) == Some(&b'0') {
        if matches!(b.get(i + 1), Some(b'x' | b'X')) && b.get(i + 2).is_some_and(|c| c.is_ascii_hexdigit()) {
            radix = 16;
            i += 2;
        } else {
            radix = 8;
        }
    }

    let digits_start = i;
    let mut acc: i64 = 0;
    while let Some(d) = b.get(i).and_then(|&c| (c as char).to_digit(radix)) {
        acc = (acc * radix as i64 + d as i64).min(1 << 40);
        i += 1;
    }
    if i == digits_start {
        return (0, 0);
    }

    let v = if negative { -acc } else { acc };
    (v.clamp(i32::MIN as i64, i32::MAX as i64) as i32, i)
}

/// Leading-float scan with C `strtof` rules for decimal, hexadecimal
/// (`0x1.8p3`) and `inf`/`nan` spellings. Returns the value and the number of
/// bytes consumed.
pub(crate) fn scan_float(text: &str) -> (f32, usize) {
    let b = text.as_bytes();
    let mut i = skip_c_space(b, 0);

    let mut negative = false;
    if let Some(&c @ (b'+' | b'-')) = b.get(i) {
        negative = c == b'-';
        i += 1;
    }
    let sign = if negative { -1.0 } else { 1.0 };

    let word = &b[i..];
    for (spelling, value) in [("infinity", f32::INFINITY), ("inf", f32::INFINITY), ("nan", f32::NAN)] {
        if word.len() >= spelling.len() && word[..spelling.len()].eq_ignore_ascii_case(spelling.as_bytes()) {
            return (sign * value, i + spelling.len());
        }
    }

    if word.len() > 2 && word[0] == b'0' && matches!(word[1], b'x' | b'X') {
        if let Some((magnitude, end)) = scan_hex_float(b, i + 2) {
            return (sign * magnitude as f32, end);
        }
    }

    let int_start = i;
    while b.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    let int_digits = &text[int_start..i];

    let mut frac_digits = "";
    if b.get(i) == Some(&b'.') {
        let frac_start = i + 1;
        let mut j = frac_start;
        while b.get(j).is_some_and(u8::is_ascii_digit) {
            j += 1;
        }
        if j > frac_start || !int_digits.is_empty() {
            frac_digits = &text[frac_start..j];
            i = j;
        }
    }

    if int_digits.is_empty() && frac_digits.is_empty() {
        return (0.0, 0);
    }

    let mut exponent = "0";
    if matches!(b.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(b.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let digits_start = j;
        while b.get(j).is_some_and(u8::is_ascii_digit) {
            j += 1;
        }
        if j > digits_start {
            exponent = &text[i + 1..j];
            i = j;
        }
    }

    let normalized = format!(
        "{}.{}e{}",
        if int_digits.is_empty() { "0" } else { int_digits },
        if frac_digits.is_empty() { "0" } else { frac_digits },
        exponent
    );
    let magnitude: f32 = normalized.parse().unwrap_or(0.0);
    (sign * magnitude, i)
}

/// Hex significand and optional binary exponent, starting after `0x`. `None`
/// when no hex digit follows, leaving only the `0` to be consumed.
fn scan_hex_float(b: &[u8], mut i: usize) -> Option<(f64, usize)> {
    let mut mantissa: u64 = 0;
    let mut exp: i64 = 0;
    let mut digits = 0;
    let mut seen_point = false;
    loop {
        match b.get(i) {
            Some(&c) if c.is_ascii_hexdigit() => {
                let d = (c as char).to_digit(16).unwrap_or(0) as u64;
                if mantissa < 1 << 56 {
                    mantissa = mantissa << 4 | d;
                    if seen_point {
                        exp -= 4;
                    }
                } else if !seen_point {
                    exp += 4;
                }
                digits += 1;
            }
            Some(b'.') if !seen_point => seen_point = true,
            _ => break,
        }
        i += 1;
    }
    if digits == 0 {
        return None;
    }

    if matches!(b.get(i), Some(b'p' | b'P')) {
        let mut j = i + 1;
        let negative = b.get(j) == Some(&b'-');
        if matches!(b.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let digits_start = j;
        let mut e: i64 = 0;
        while let Some(&c) = b.get(j).filter(|c| c.is_ascii_digit()) {
            e = (e * 10 + (c - b'0') as i64).min(1 << 20);
            j += 1;
        }
        if j > digits_start {
            exp += if negative { -e } else { e };
            i = j;
        }
    }

    let exp = exp.clamp(-2000, 2000) as i32;
    Some((mantissa as f64 * 2f64.powi(exp), i))
}
