//! Job sources: where the stream of render jobs comes from.

use std::path::{Path, PathBuf};

use render_protocol::{JobDescriptor, ModelSource, OutputFormat, Textures};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{LoadTestError, Result};

/// Settings shared by every job a source produces.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub textures: Textures,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

/// Produces the ordered list of jobs for one run.
#[derive(Debug, Clone)]
pub enum JobSource {
    /// The same model `count` times.
    Repeat { model: ModelSource, count: usize },
    /// One job per matching file directly inside `dir`.
    Directory {
        dir: PathBuf,
        /// Matched case-insensitively, without the leading dot.
        extension: String,
        /// When set, jobs reference `<base><file name>` instead of the local file.
        model_base_url: Option<String>,
    },
}

impl JobSource {
    /// Enumerate jobs. Fails only if a directory source cannot be read.
    pub fn jobs(&self, template: &JobTemplate) -> Result<Vec<JobDescriptor>> {
        let jobs = match self {
            JobSource::Repeat { model, count } => repeat_jobs(model, *count, template),
            JobSource::Directory {
                dir,
                extension,
                model_base_url,
            } => {
                let models = scan_directory(dir, extension)?;
                info!(dir = %dir.display(), models = models.len(), "Scanned model directory");
                models
                    .into_iter()
                    .enumerate()
                    .map(|(sequence, path)| {
                        let model = match model_base_url {
                            Some(base) => ModelSource::Url(join_url(base, &path)),
                            None => ModelSource::File(path),
                        };
                        job(sequence, model, template)
                    })
                    .collect()
            }
        };
        Ok(jobs)
    }

    /// Short description for log lines and report headers.
    pub fn describe(&self) -> String {
        match self {
            JobSource::Repeat { model, count } => format!("{} x {}", model.file_name(), count),
            JobSource::Directory { dir, extension, .. } => {
                format!("*.{} in {}", extension, dir.display())
            }
        }
    }
}

/// Interpret a model argument: `http(s)://` references become URLs, anything else a local file.
pub fn parse_model(value: &str) -> ModelSource {
    let trimmed = value.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        ModelSource::Url(trimmed.to_string())
    } else {
        ModelSource::File(PathBuf::from(trimmed))
    }
}

fn repeat_jobs(model: &ModelSource, count: usize, template: &JobTemplate) -> Vec<JobDescriptor> {
    (0..count)
        .map(|sequence| {
            let job = job(sequence, model.clone(), template);
            if count > 1 {
                let label = format!("{} [{}/{}]", job.label, sequence + 1, count);
                job.with_label(label)
            } else {
                job
            }
        })
        .collect()
}

fn job(sequence: usize, model: ModelSource, template: &JobTemplate) -> JobDescriptor {
    JobDescriptor::new(
        sequence,
        model,
        template.textures.clone(),
        template.width,
        template.height,
        template.format,
    )
}

/// Regular files directly inside `dir` whose extension matches, sorted by name.
fn scan_directory(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let unavailable = |reason: String| LoadTestError::SourceUnavailable {
        path: dir.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(dir).map_err(|e| unavailable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }
    std::fs::read_dir(dir).map_err(|e| unavailable(e.to_string()))?;

    let wanted = extension.trim_start_matches('.');
    let mut models = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(unavailable(e.to_string())),
            Err(e) => {
                // dangling symlinks and entries that vanished mid-scan
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(wanted))
            .unwrap_or(false);
        if matches {
            models.push(entry.into_path());
        } else {
            debug!(path = %entry.path().display(), "Skipping non-model file");
        }
    }
    Ok(models)
}

fn join_url(base: &str, path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}{}", base, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{models, ModelDir};

    fn template() -> JobTemplate {
        JobTemplate {
            textures: Textures::new(),
            width: 3000,
            height: 2700,
            format: OutputFormat::Png,
        }
    }

    #[test]
    fn test_parse_model() {
        assert_eq!(
            parse_model("https://cdn.example.com/m.glb"),
            ModelSource::Url("https://cdn.example.com/m.glb".to_string())
        );
        assert_eq!(
            parse_model("../glb/m.glb"),
            ModelSource::File(PathBuf::from("../glb/m.glb"))
        );
    }

    #[test]
    fn test_repeat_labels_and_sequence() {
        let source = JobSource::Repeat {
            model: ModelSource::Url("https://x/shirt.glb".to_string()),
            count: 3,
        };
        let jobs = source.jobs(&template()).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].label, "shirt.glb [1/3]");
        assert_eq!(jobs[2].sequence, 2);
        assert!(jobs.iter().all(|j| j.width == 3000 && j.height == 2700));
    }

    #[test]
    fn test_single_repeat_keeps_plain_label() {
        let source = JobSource::Repeat {
            model: ModelSource::Url("https://x/shirt.glb".to_string()),
            count: 1,
        };
        assert_eq!(source.jobs(&template()).unwrap()[0].label, "shirt.glb");
    }

    #[test]
    fn test_directory_filters_and_sorts() {
        let dir = ModelDir::with_files(&["b.glb", "a.GLB", "c.txt"]).unwrap();
        dir.add_dir("nested.glb").unwrap();

        let source = JobSource::Directory {
            dir: dir.path().to_path_buf(),
            extension: "glb".to_string(),
            model_base_url: None,
        };
        let jobs = source.jobs(&template()).unwrap();
        let labels: Vec<_> = jobs.iter().map(|j| j.label.as_str()).collect();
        assert_eq!(labels, vec!["a.GLB", "b.glb"]);
        assert_eq!(jobs[1].model, ModelSource::File(dir.join("b.glb")));
    }

    #[test]
    fn test_directory_with_base_url() {
        let dir = ModelDir::with_files(&[models::SHIRT]).unwrap();
        let source = JobSource::Directory {
            dir: dir.path().to_path_buf(),
            extension: ".glb".to_string(),
            model_base_url: Some("https://cdn.example.com/gltf/".to_string()),
        };
        let jobs = source.jobs(&template()).unwrap();
        assert_eq!(
            jobs[0].model,
            ModelSource::Url(format!("https://cdn.example.com/gltf/{}", models::SHIRT))
        );
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let source = JobSource::Directory {
            dir: PathBuf::from("/definitely/not/here"),
            extension: "glb".to_string(),
            model_base_url: None,
        };
        let err = source.jobs(&template()).unwrap_err();
        assert!(matches!(err, LoadTestError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let dir = ModelDir::with_files(&[models::MUG]).unwrap();
        let source = JobSource::Directory {
            dir: dir.join(models::MUG),
            extension: "glb".to_string(),
            model_base_url: None,
        };
        match source.jobs(&template()) {
            Err(LoadTestError::SourceUnavailable { reason, .. }) => {
                assert_eq!(reason, "not a directory")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlinks_are_skipped() {
        let dir = ModelDir::with_files(&["a.glb", "b.glb"]).unwrap();
        std::os::unix::fs::symlink("/nonexistent/notes", dir.join("stale-notes.txt")).unwrap();
        std::os::unix::fs::symlink("/nonexistent/model", dir.join("gone.glb")).unwrap();

        let source = JobSource::Directory {
            dir: dir.path().to_path_buf(),
            extension: "glb".to_string(),
            model_base_url: None,
        };
        let jobs = source.jobs(&template()).unwrap();
        let labels: Vec<_> = jobs.iter().map(|j| j.label.as_str()).collect();
        assert_eq!(labels, vec!["a.glb", "b.glb"]);
    }
}
