//! Domain models

pub mod mode;
pub mod source;
pub mod staged;

pub use mode::MirrorMode;
pub use source::ImageSource;
pub use staged::{OriginKind, StagedFile};
