//! Decoding, format conversion, and device output

pub mod convert;
pub mod decoder;
pub mod output;
pub mod streaming;
