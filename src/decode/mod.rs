//! 解码层

mod decoder;
mod source;

pub use decoder::{AudioDecoder, AudioInfo, DecodeError};
pub use source::{DecodedSource, PcmSource, RawPcmSource};
