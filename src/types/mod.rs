mod metadata;
mod token;

pub use metadata::{ClipInfo, CompositionMethod, OutputMetadata, VideoCodec};
pub use token::Token;
