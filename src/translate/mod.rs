//! Conversion between the Messages API and chat-completion shapes.

pub mod normalize;
pub mod stream;

pub use normalize::{convert_tools, normalize, stringify_result, RESERVED_TOOL};
pub use stream::{translate_completion, OpenBlock, StreamState, StreamTranslator};
