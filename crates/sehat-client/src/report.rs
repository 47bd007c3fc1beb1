//! Downloaded report documents.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use sehat_core::SessionId;
use tracing::info;

/// Content type assumed when the service does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/pdf";

/// Report bytes as served by the diagnosis service. The client never looks
/// inside them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportDocument {
    /// Session the report belongs to.
    pub session_id: SessionId,
    /// Raw body.
    pub bytes: Bytes,
    /// Response `Content-Type`.
    pub content_type: String,
}

impl ReportDocument {
    /// Suggested file name, `diagnosis-report-<session>.pdf`.
    #[must_use]
    pub fn file_name(&self) -> String {
        let safe: String = self
            .session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("diagnosis-report-{safe}.pdf")
    }

    /// Byte length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the report into `dir` (created if missing) and return the path.
    pub async fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(self.file_name());
        tokio::fs::write(&path, &self.bytes).await?;
        info!(session_id = %self.session_id, path = %path.display(), bytes = self.len(), "report saved");
        Ok(path)
    }
}
