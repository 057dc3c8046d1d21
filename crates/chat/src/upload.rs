use std::path::{Path, PathBuf};

use chatline_client::{ChatBackend, ClientError, UploadReport};

/// Upload dialog state. Uploads never touch the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UploadModal {
    #[default]
    Closed,
    Open {
        selected: Option<PathBuf>,
    },
    Uploading {
        path: PathBuf,
    },
}

impl UploadModal {
    pub fn open(&mut self) {
        if matches!(self, Self::Closed) {
            *self = Self::Open { selected: None };
        }
    }

    /// Closing while an upload runs is ignored; the upload finishes first.
    pub fn close(&mut self) {
        if !self.is_uploading() {
            *self = Self::Closed;
        }
    }

    pub fn select(&mut self, path: impl Into<PathBuf>) {
        if let Self::Open { selected } = self {
            *selected = Some(path.into());
        }
    }

    /// Moves the selected file into `Uploading` and returns it.
    pub fn begin(&mut self) -> Option<PathBuf> {
        let Self::Open {
            selected: Some(path),
        } = self
        else {
            return None;
        };

        let path = path.clone();
        *self = Self::Uploading { path: path.clone() };
        Some(path)
    }

    pub fn finish(&mut self) {
        if self.is_uploading() {
            *self = Self::Closed;
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    pub fn is_uploading(&self) -> bool {
        matches!(self, Self::Uploading { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded {
        file_name: String,
        chunks: Option<u64>,
    },
    Failed {
        file_name: String,
        message: String,
    },
}

impl UploadOutcome {
    pub fn from_result(path: &Path, result: Result<UploadReport, ClientError>) -> Self {
        let file_name = display_name(path);
        match result {
            Ok(report) => Self::Uploaded {
                file_name,
                chunks: report.chunks_count,
            },
            Err(error) => Self::Failed {
                file_name,
                message: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Uploaded { .. })
    }

    /// Text for the notification raised after the upload.
    pub fn notification_text(&self) -> String {
        match self {
            Self::Uploaded {
                file_name,
                chunks: Some(chunks),
            } => format!("Uploaded {file_name} ({chunks} chunks)"),
            Self::Uploaded {
                file_name,
                chunks: None,
            } => format!("Uploaded {file_name}"),
            Self::Failed { message, .. } => format!("Upload failed: {message}"),
        }
    }
}

/// Runs the selected upload against the backend.
pub async fn run_upload(backend: &dyn ChatBackend, modal: &mut UploadModal) -> Option<UploadOutcome> {
    let path = modal.begin()?;

    tracing::info!(path = %path.display(), "starting document upload");
    let result = backend.upload(&path).await;
    let outcome = UploadOutcome::from_result(&path, result);

    match &outcome {
        UploadOutcome::Uploaded { chunks, .. } => {
            tracing::info!(path = %path.display(), chunks = ?chunks, "document uploaded");
        }
        UploadOutcome::Failed { message, .. } => {
            tracing::warn!(path = %path.display(), error = %message, "document upload failed");
        }
    }

    modal.finish();
    Some(outcome)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modal_flow() {
        let mut modal = UploadModal::default();
        assert_eq!(modal.begin(), None);

        modal.open();
        assert!(modal.is_open());
        assert_eq!(modal.begin(), None);

        modal.select("docs/handbook.pdf");
        assert_eq!(modal.begin(), Some(PathBuf::from("docs/handbook.pdf")));
        assert!(modal.is_uploading());

        modal.close();
        assert!(modal.is_uploading());

        modal.finish();
        assert_eq!(modal, UploadModal::Closed);
    }

    #[test]
    fn notification_texts() {
        let uploaded = UploadOutcome::from_result(
            Path::new("/tmp/handbook.pdf"),
            Ok(UploadReport {
                chunks_count: Some(42),
                error: None,
            }),
        );
        assert!(uploaded.is_success());
        assert_eq!(
            uploaded.notification_text(),
            "Uploaded handbook.pdf (42 chunks)"
        );

        let failed = UploadOutcome::Failed {
            file_name: "a.bin".into(),
            message: "upload rejected: Unsupported file type".into(),
        };
        assert_eq!(
            failed.notification_text(),
            "Upload failed: upload rejected: Unsupported file type"
        );
    }
}
