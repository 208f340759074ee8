//! Render request construction.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use reqwest::Body;

use crate::error::{BuildError, BuildResult};
use crate::job::{JobDescriptor, ModelSource};

/// Form field carrying a model URL.
pub const MODEL_URL_FIELD: &str = "model_url";
/// Form part carrying model bytes.
pub const MODEL_FILE_FIELD: &str = "model";

/// Form part name for a texture slot.
pub fn texture_field(slot: u32) -> String {
    format!("textures[{}]", slot)
}

/// A `render-form` request, ready to send.
#[derive(Debug)]
pub struct RenderRequest {
    headers: HeaderMap,
    form: Form,
    fields: Vec<String>,
}

impl RenderRequest {
    /// Build the request for a job.
    ///
    /// Parts are added in a fixed order: the model (`model` file part or
    /// `model_url` field), `width`, `height`, then `textures[i]` for every slot
    /// in ascending order. `ModelSource::File` is read from disk here.
    pub fn build(job: &JobDescriptor) -> BuildResult<Self> {
        if job.width == 0 || job.height == 0 {
            return Err(BuildError::InvalidDimensions {
                width: job.width,
                height: job.height,
            });
        }

        let parts = FormParts::new();
        let parts = match &job.model {
            ModelSource::Url(url) => parts.text(MODEL_URL_FIELD, url.clone()),
            ModelSource::File(path) => {
                let bytes = std::fs::read(path).map_err(|source| BuildError::ModelRead {
                    path: path.clone(),
                    source,
                })?;
                parts.file(
                    MODEL_FILE_FIELD.to_string(),
                    job.model.file_name(),
                    job.model.content_type(),
                    Bytes::from(bytes),
                )?
            }
            ModelSource::Inline { file_name, bytes } => parts.file(
                MODEL_FILE_FIELD.to_string(),
                file_name.clone(),
                job.model.content_type(),
                bytes.clone(),
            )?,
        };

        let mut parts = parts
            .text("width", job.width.to_string())
            .text("height", job.height.to_string());

        for (slot, texture) in &job.textures {
            parts = parts.file(
                texture_field(*slot),
                texture.file_name.clone(),
                &texture.content_type,
                texture.bytes.clone(),
            )?;
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(job.format.mime_type()));

        Ok(Self {
            headers,
            form: parts.form,
            fields: parts.fields,
        })
    }

    /// Value of the `Accept` header.
    pub fn accept(&self) -> Option<&str> {
        self.headers.get(ACCEPT).and_then(|v| v.to_str().ok())
    }

    /// Multipart boundary chosen for this request.
    pub fn boundary(&self) -> &str {
        self.form.boundary()
    }

    /// `Content-Type` the body is sent with.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary())
    }

    /// Part names in the order they are sent.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Attach this request to a POST against `endpoint`.
    pub fn into_builder(self, client: &reqwest::Client, endpoint: &str) -> reqwest::RequestBuilder {
        client
            .post(endpoint)
            .headers(self.headers)
            .multipart(self.form)
    }
}

/// A form under construction plus the names of the parts added so far.
struct FormParts {
    form: Form,
    fields: Vec<String>,
}

impl FormParts {
    fn new() -> Self {
        Self {
            form: Form::new(),
            fields: Vec::new(),
        }
    }

    fn text(mut self, name: &'static str, value: String) -> Self {
        self.fields.push(name.to_string());
        self.form = self.form.text(name, value);
        self
    }

    fn file(
        mut self,
        name: String,
        file_name: String,
        content_type: &str,
        bytes: Bytes,
    ) -> BuildResult<Self> {
        let length = bytes.len() as u64;
        let part = Part::stream_with_length(Body::from(bytes), length)
            .file_name(file_name)
            .mime_str(content_type)
            .map_err(|e| BuildError::InvalidContentType {
                part: name.clone(),
                content_type: content_type.to_string(),
                message: e.to_string(),
            })?;
        self.fields.push(name.clone());
        self.form = self.form.part(name, part);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFormat;
    use crate::job::{TexturePayload, Textures};
    use std::path::PathBuf;

    fn job(model: ModelSource) -> JobDescriptor {
        let mut textures = Textures::new();
        textures.insert(1, TexturePayload::new("canvas-1.jpg", "image/jpeg", b"JPEG".to_vec()));
        JobDescriptor::new(0, model, textures, 3000, 2700, OutputFormat::Webp)
    }

    #[test]
    fn test_url_model_uses_model_url_field() {
        let request = RenderRequest::build(&job(ModelSource::Url(
            "https://cdn.example.com/m.glb".to_string(),
        )))
        .unwrap();
        assert_eq!(
            request.fields(),
            &["model_url", "width", "height", "textures[1]"]
        );
        assert_eq!(request.accept(), Some("image/webp"));
    }

    #[test]
    fn test_inline_model_uses_model_part() {
        let request = RenderRequest::build(&job(ModelSource::Inline {
            file_name: "m.glb".to_string(),
            bytes: Bytes::from_static(b"glTF"),
        }))
        .unwrap();
        assert_eq!(request.fields()[0], MODEL_FILE_FIELD);
    }

    #[test]
    fn test_missing_model_file_is_build_error() {
        let err = RenderRequest::build(&job(ModelSource::File(PathBuf::from(
            "/definitely/not/here.glb",
        ))))
        .unwrap_err();
        assert!(matches!(err, BuildError::ModelRead { .. }));
        assert!(err.reason().contains("here.glb"));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let mut j = job(ModelSource::Url("https://x/m.glb".to_string()));
        j.height = 0;
        let err = RenderRequest::build(&j).unwrap_err();
        assert!(matches!(
            err,
            BuildError::InvalidDimensions {
                width: 3000,
                height: 0
            }
        ));
    }

    #[test]
    fn test_bad_texture_content_type_rejected() {
        let mut j = job(ModelSource::Url("https://x/m.glb".to_string()));
        j.textures
            .insert(4, TexturePayload::new("odd.bin", "not a mime", b"x".to_vec()));
        match RenderRequest::build(&j) {
            Err(BuildError::InvalidContentType { part, .. }) => assert_eq!(part, "textures[4]"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_content_type_carries_boundary() {
        let request =
            RenderRequest::build(&job(ModelSource::Url("https://x/m.glb".to_string()))).unwrap();
        assert!(!request.boundary().is_empty());
        assert_eq!(
            request.content_type(),
            format!("multipart/form-data; boundary={}", request.boundary())
        );
    }

    #[test]
    fn test_texture_field_name() {
        assert_eq!(texture_field(0), "textures[0]");
        assert_eq!(texture_field(12), "textures[12]");
    }
}
