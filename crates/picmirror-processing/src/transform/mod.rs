//! Pixel transforms
//!
//! - Axis mirror (mirror)
//! - Colour-model normalization and alpha flattening (color)

pub mod color;
pub mod mirror;

pub use color::{flatten_onto_white, is_fully_opaque, normalize_color};
pub use mirror::{apply_mirror, apply_mirror_by_name};
