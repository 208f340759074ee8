//! Wire types for the render service's `render-form` endpoint.
//!
//! Supports:
//! - Typed job descriptors (model by URL, by file or inline, plus texture slots)
//! - `multipart/form-data` request assembly with content negotiation via `Accept`

pub mod error;
pub mod format;
pub mod job;
pub mod request;

pub use error::{BuildError, BuildResult};
pub use format::{FormatParseError, OutputFormat};
pub use job::{JobDescriptor, ModelSource, TexturePayload, Textures};
pub use request::RenderRequest;
