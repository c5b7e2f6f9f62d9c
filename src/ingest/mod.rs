//! File and directory ingestion for conversation context.
//!
//! Explicitly named files are checked strictly and their failures surface
//! to the caller. Files discovered by walking a directory follow a
//! log-and-skip policy; only batch-level limits fail the whole upload.

use std::path::{Path, PathBuf};

use crate::core::config::FileHandlingConfig;
use crate::core::error::{ChatError, ChatResult};
use crate::core::message::AttachmentRef;

/// Collaborator that turns a structured or binary format (e.g. PDF) into
/// plain text. Registered per extension; extraction failures are always
/// skippable, never fatal to a batch.
pub trait DocumentExtractor: Send + Sync {
    /// Lowercase extensions with leading dot, e.g. `[".pdf"]`.
    fn extensions(&self) -> &[&str];
    fn extract(&self, path: &Path) -> ChatResult<String>;
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub attachments: Vec<AttachmentRef>,
    pub skipped: Vec<SkippedFile>,
}

struct Candidate {
    path: PathBuf,
    /// Whether per-file failures should fail the ingest call. True for
    /// explicitly named files, false for files found by a directory walk.
    strict: bool,
}

pub struct FileIngestor {
    config: FileHandlingConfig,
    extractors: Vec<Box<dyn DocumentExtractor>>,
}

impl FileIngestor {
    pub fn new(config: FileHandlingConfig) -> Self {
        Self {
            config,
            extractors: Vec::new(),
        }
    }

    pub fn register_extractor(&mut self, extractor: Box<dyn DocumentExtractor>) {
        self.extractors.push(extractor);
    }

    /// Ingest files and/or directories into attachment refs.
    pub fn ingest(&self, paths: &[PathBuf]) -> ChatResult<IngestOutcome> {
        let mut candidates = Vec::new();
        for path in paths {
            if path.is_dir() {
                collect_dir(path, &mut candidates)?;
            } else {
                candidates.push(Candidate {
                    path: path.clone(),
                    strict: true,
                });
            }
        }

        if candidates.len() > self.config.max_files_per_upload {
            return Err(ChatError::TooManyFiles {
                count: candidates.len(),
                max: self.config.max_files_per_upload,
            });
        }

        let mut outcome = IngestOutcome::default();
        for candidate in candidates {
            match self.process_file(&candidate.path) {
                Ok(attachment) => outcome.attachments.push(attachment),
                Err(err) if candidate.strict && !is_always_skippable(&err) => return Err(err),
                Err(err) => {
                    tracing::warn!(path = %candidate.path.display(), "skipping file: {err}");
                    outcome.skipped.push(SkippedFile {
                        path: candidate.path,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }

    fn extractor_for(&self, extension: &str) -> Option<&dyn DocumentExtractor> {
        self.extractors
            .iter()
            .find(|e| e.extensions().contains(&extension))
            .map(|e| e.as_ref())
    }

    fn process_file(&self, path: &Path) -> ChatResult<AttachmentRef> {
        let extension = file_extension(path);
        let allowed = self
            .config
            .allowed_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(&extension));
        let extractor = self.extractor_for(&extension);
        if !allowed && extractor.is_none() {
            return Err(ChatError::UnsupportedFileType {
                path: path.to_path_buf(),
            });
        }

        let metadata = std::fs::metadata(path)?;
        let size_bytes = metadata.len();
        if size_bytes > self.config.max_file_size_bytes() {
            return Err(ChatError::FileTooLarge {
                path: path.to_path_buf(),
                size_bytes,
                max_bytes: self.config.max_file_size_bytes(),
            });
        }

        let extracted_text = match extractor {
            Some(extractor) => extractor
                .extract(path)
                .map_err(|e| extraction_error(path, &e))?,
            None => {
                if size_bytes > self.config.max_text_size_bytes() {
                    return Err(ChatError::FileTooLarge {
                        path: path.to_path_buf(),
                        size_bytes,
                        max_bytes: self.config.max_text_size_bytes(),
                    });
                }
                decode_text(std::fs::read(path)?)
            }
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(AttachmentRef {
            filename,
            extracted_text,
            size_bytes,
            source_path: path.to_path_buf(),
        })
    }
}

fn extraction_error(path: &Path, cause: &ChatError) -> ChatError {
    ChatError::Config(format!(
        "extraction failed for {}: {cause}",
        path.display()
    ))
}

/// Extraction failures never fail a batch, even for explicit files.
fn is_always_skippable(err: &ChatError) -> bool {
    matches!(err, ChatError::Config(message) if message.starts_with("extraction failed"))
}

fn collect_dir(dir: &Path, candidates: &mut Vec<Candidate>) -> ChatResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dir(&path, candidates)?;
        } else {
            candidates.push(Candidate {
                path,
                strict: false,
            });
        }
    }
    Ok(())
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Decode raw bytes as UTF-8, falling back to a Latin-1 interpretation so
/// legacy text files never fail outright.
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> FileHandlingConfig {
        FileHandlingConfig {
            allowed_extensions: vec![".txt".to_string(), ".md".to_string()],
            max_file_size_mb: 1,
            max_files_per_upload: 10,
            max_text_size_mb: 1,
        }
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn explicit_disallowed_file_fails_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_file(dir.path(), "tool.exe", b"MZ");
        let ingestor = FileIngestor::new(config());
        let err = ingestor.ingest(&[exe]).unwrap_err();
        assert_eq!(err.kind(), "unsupported-file-type");
    }

    #[test]
    fn directory_walk_skips_disallowed_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", b"alpha");
        write_file(dir.path(), "b.txt", b"bravo");
        write_file(dir.path(), "c.txt", b"charlie");
        write_file(dir.path(), "virus.exe", b"MZ");

        let ingestor = FileIngestor::new(config());
        let outcome = ingestor.ingest(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(outcome.attachments.len(), 3);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].path.ends_with("virus.exe"));
    }

    #[test]
    fn size_boundary_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let limit = config().max_file_size_bytes() as usize;
        let at_limit = write_file(dir.path(), "exact.txt", &vec![b'x'; limit]);
        let over = write_file(dir.path(), "over.txt", &vec![b'x'; limit + 1]);

        let ingestor = FileIngestor::new(config());
        let outcome = ingestor.ingest(&[at_limit]).unwrap();
        assert_eq!(outcome.attachments.len(), 1);

        let err = ingestor.ingest(&[over]).unwrap_err();
        assert_eq!(err.kind(), "file-too-large");
    }

    #[test]
    fn batch_limit_is_a_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..11 {
            paths.push(write_file(dir.path(), &format!("f{i}.txt"), b"x"));
        }
        let ingestor = FileIngestor::new(config());
        let err = ingestor.ingest(&paths).unwrap_err();
        assert_eq!(err.kind(), "too-many-files");
    }

    #[test]
    fn latin1_content_still_decodes() {
        let dir = tempfile::tempdir().unwrap();
        // 0xE9 is 'é' in Latin-1 and invalid standalone UTF-8.
        let path = write_file(dir.path(), "legacy.txt", &[b'c', b'a', b'f', 0xE9]);
        let ingestor = FileIngestor::new(config());
        let outcome = ingestor.ingest(&[path]).unwrap();
        assert_eq!(outcome.attachments[0].extracted_text, "café");
    }

    struct FailingExtractor;

    impl DocumentExtractor for FailingExtractor {
        fn extensions(&self) -> &[&str] {
            &[".pdf"]
        }

        fn extract(&self, _path: &Path) -> ChatResult<String> {
            Err(ChatError::Config("encrypted document".to_string()))
        }
    }

    struct UpperExtractor;

    impl DocumentExtractor for UpperExtractor {
        fn extensions(&self) -> &[&str] {
            &[".pdf"]
        }

        fn extract(&self, path: &Path) -> ChatResult<String> {
            Ok(std::fs::read_to_string(path)?.to_uppercase())
        }
    }

    #[test]
    fn extractor_failure_is_skippable_even_for_explicit_files() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_file(dir.path(), "doc.pdf", b"%PDF-1.4");
        let mut ingestor = FileIngestor::new(config());
        ingestor.register_extractor(Box::new(FailingExtractor));

        let outcome = ingestor.ingest(&[pdf]).unwrap();
        assert!(outcome.attachments.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].reason.contains("extraction failed"));
    }

    #[test]
    fn extractor_output_becomes_the_attachment_text() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_file(dir.path(), "doc.pdf", b"hello");
        let mut ingestor = FileIngestor::new(config());
        ingestor.register_extractor(Box::new(UpperExtractor));

        let outcome = ingestor.ingest(&[pdf]).unwrap();
        assert_eq!(outcome.attachments[0].extracted_text, "HELLO");
    }
}
