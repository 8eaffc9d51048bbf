use std::any::Any;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use crate::core::version_locator::{VersionFileMatch, VersionFileQuery};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CompileOutput {
    /// stdout and stderr joined the way the operator reads them.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", "") => String::new(),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipRequest {
    pub files: Vec<String>,
    pub zip_name: Option<String>,
    pub subfolder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlookDraft {
    pub subject: String,
    pub body: String,
    pub to: Option<String>,
    pub send: bool,
    pub save_to_sent: bool,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftReceipt {
    pub subject: String,
    #[serde(default)]
    pub sent: bool,
    #[serde(default)]
    pub entry_id: Option<String>,
    #[serde(default)]
    pub attached_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyQuery {
    pub subject_keyword: String,
    pub since_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailReply {
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub received_time: Option<String>,
}

/// Live subscription to changes of one file. Dropping it stops the watch.
pub struct FileWatch {
    pub events: mpsc::UnboundedReceiver<()>,
    _guard: Box<dyn Any + Send>,
}

impl FileWatch {
    pub fn new(events: mpsc::UnboundedReceiver<()>, guard: Box<dyn Any + Send>) -> Self {
        Self {
            events,
            _guard: guard,
        }
    }

    pub fn stop(self) {
        drop(self);
    }
}

#[async_trait]
pub trait HostApi: Send + Sync {
    async fn file_exists(&self, path: &str) -> bool;

    async fn read_text_file(&self, path: &str) -> Result<String, String>;

    async fn write_text_file(&self, path: &str, content: &str) -> Result<(), String>;

    async fn create_directory(&self, path: &str) -> Result<(), String>;

    async fn copy_file(&self, src: &str, dest: &str) -> Result<(), String>;

    /// Hex MD5 of the file, `None` when it does not exist or cannot be read.
    async fn compute_md5(&self, path: &str) -> Option<String>;

    async fn find_files(&self, root: &str, patterns: &[String]) -> Result<Vec<String>, String>;

    async fn find_version_file(
        &self,
        root: &str,
        query: &VersionFileQuery,
    ) -> Result<Option<VersionFileMatch>, String>;

    /// A non-zero exit is an `Err` carrying the tool output.
    async fn run_compilation(
        &self,
        command: &str,
        cwd: &str,
        stdin: Option<&str>,
    ) -> Result<CompileOutput, String>;

    async fn zip_artifacts(&self, request: &ZipRequest) -> Result<String, String>;

    async fn create_outlook_draft(&self, draft: &OutlookDraft) -> Result<DraftReceipt, String>;

    async fn check_outlook_replies(&self, query: &ReplyQuery) -> Result<Vec<MailReply>, String>;

    /// Hosts without a filesystem watcher keep the default and the caller
    /// falls back to polling.
    async fn start_file_watch(&self, _path: &str) -> Option<FileWatch> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_output_skips_empty_streams() {
        let output = CompileOutput {
            code: Some(1),
            stdout: "  \n".to_string(),
            stderr: "error: missing ;\n".to_string(),
        };
        assert_eq!(output.combined(), "error: missing ;");

        let both = CompileOutput {
            code: Some(2),
            stdout: "linking".to_string(),
            stderr: "failed".to_string(),
        };
        assert_eq!(both.combined(), "linking\nfailed");
    }
}
