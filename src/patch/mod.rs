//! Encoding source into prompt payloads and applying generated payloads.

pub mod applier;
pub mod codec;

pub use applier::{apply, resolve_within};
pub use codec::{DELIMITER, Decoder, decode, encode, encode_blocks, normalize_relative};
