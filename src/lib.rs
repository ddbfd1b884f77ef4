//! A small stack-machine request interpreter for a host-attached device.
//!
//! A request is one line of space-separated commands (`int:i2 int:i3 addi`).
//! The device runs them against a bounded value stack and answers with the
//! final stack (`out: i5`) or the first error. Storage, logins and one-time
//! passwords live on the host, reached through framed [`host::Message`]s.

pub mod config;
pub mod device;
pub mod frontend;
pub mod host;
pub mod interpreter;
pub mod lexer;
pub mod quant;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

pub use config::Config;
pub use interpreter::process_request;
pub use interpreter::response::Response;
pub use interpreter::stack::StackValue;

/// Standard alphabet; padding optional on decode.
pub(crate) const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);
