//! Job descriptors: one render request worth of inputs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::format::OutputFormat;

/// Where the server gets the 3D model from. Exactly one mode per job.
#[derive(Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Server downloads the model itself; sent as the `model_url` field.
    Url(String),
    /// Local model file, read when the request is built and sent as the `model` part.
    File(PathBuf),
    /// Model bytes already in memory, sent as the `model` part.
    Inline { file_name: String, bytes: Bytes },
}

impl ModelSource {
    /// The model's file name (last URL segment or path component).
    pub fn file_name(&self) -> String {
        match self {
            ModelSource::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or(path)
                    .to_string()
            }
            ModelSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ModelSource::Inline { file_name, .. } => file_name.clone(),
        }
    }

    /// Human readable reference (URL, path or inline file name).
    pub fn reference(&self) -> String {
        match self {
            ModelSource::Url(url) => url.clone(),
            ModelSource::File(path) => path.display().to_string(),
            ModelSource::Inline { file_name, .. } => file_name.clone(),
        }
    }

    /// Artifact file name: the model's name with the output extension substituted.
    ///
    /// `shirt.glb` rendered as PNG becomes `shirt.png`.
    pub fn artifact_name(&self, format: OutputFormat) -> String {
        let file_name = self.file_name();
        let stem = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "model".to_string());
        format!("{}.{}", stem, format.extension())
    }

    /// Content type for a model file part, derived from its extension.
    pub fn content_type(&self) -> &'static str {
        let file_name = self.file_name();
        match Path::new(&file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("glb") => "model/gltf-binary",
            Some("gltf") => "model/gltf+json",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ModelSource::File(path) => f.debug_tuple("File").field(path).finish(),
            ModelSource::Inline { file_name, bytes } => f
                .debug_struct("Inline")
                .field("file_name", file_name)
                .field("bytes (length)", &bytes.len())
                .finish(),
        }
    }
}

/// A preprocessed texture image bound to one material slot.
#[derive(Clone, PartialEq, Eq)]
pub struct TexturePayload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl TexturePayload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for TexturePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TexturePayload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes (length)", &self.bytes.len())
            .finish()
    }
}

/// Texture slots ordered by index; slot `i` is sent as `textures[i]`.
pub type Textures = BTreeMap<u32, TexturePayload>;

/// Everything needed to build one render request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Position in the job stream, starting at 0.
    pub sequence: usize,
    /// Label printed next to this job's timing.
    pub label: String,
    pub model: ModelSource,
    pub textures: Textures,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

impl JobDescriptor {
    /// Create a job labelled with the model's file name.
    pub fn new(
        sequence: usize,
        model: ModelSource,
        textures: Textures,
        width: u32,
        height: u32,
        format: OutputFormat,
    ) -> Self {
        Self {
            sequence,
            label: model.file_name(),
            model,
            textures,
            width,
            height,
            format,
        }
    }

    /// Replace the default label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// File name the rendered artifact is persisted under.
    pub fn artifact_name(&self) -> String {
        self.model.artifact_name(self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_file_name() {
        let model = ModelSource::Url("https://cdn.example.com/gltf/1_p1_t-shirt.glb".to_string());
        assert_eq!(model.file_name(), "1_p1_t-shirt.glb");
        assert_eq!(model.artifact_name(OutputFormat::Png), "1_p1_t-shirt.png");
    }

    #[test]
    fn test_url_file_name_ignores_query() {
        let model = ModelSource::Url("https://cdn.example.com/m.glb?sig=abc#frag".to_string());
        assert_eq!(model.file_name(), "m.glb");
        assert_eq!(model.artifact_name(OutputFormat::Webp), "m.webp");
    }

    #[test]
    fn test_file_artifact_name() {
        let model = ModelSource::File(PathBuf::from("/models/duvet-cover.glb"));
        assert_eq!(model.file_name(), "duvet-cover.glb");
        assert_eq!(model.artifact_name(OutputFormat::Jpeg), "duvet-cover.jpg");
    }

    #[test]
    fn test_artifact_name_without_stem() {
        let model = ModelSource::File(PathBuf::new());
        assert_eq!(model.artifact_name(OutputFormat::Png), "model.png");
    }

    #[test]
    fn test_model_content_type() {
        let glb = ModelSource::Inline {
            file_name: "m.GLB".to_string(),
            bytes: Bytes::from_static(b"glTF"),
        };
        assert_eq!(glb.content_type(), "model/gltf-binary");
        let gltf = ModelSource::File(PathBuf::from("scene.gltf"));
        assert_eq!(gltf.content_type(), "model/gltf+json");
        let other = ModelSource::File(PathBuf::from("scene.fbx"));
        assert_eq!(other.content_type(), "application/octet-stream");
    }

    #[test]
    fn test_job_label_defaults_to_file_name() {
        let job = JobDescriptor::new(
            3,
            ModelSource::File(PathBuf::from("dir/a.glb")),
            Textures::new(),
            500,
            400,
            OutputFormat::Png,
        );
        assert_eq!(job.label, "a.glb");
        assert_eq!(job.with_label("a.glb [4]").label, "a.glb [4]");
    }

    #[test]
    fn test_inline_debug_hides_bytes() {
        let model = ModelSource::Inline {
            file_name: "m.glb".to_string(),
            bytes: Bytes::from(vec![0u8; 1024]),
        };
        let debug = format!("{:?}", model);
        assert!(debug.contains("1024"));
        assert!(!debug.contains("0, 0, 0"));
    }
}
