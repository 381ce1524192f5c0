use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    #[error("invalid migration config: {0}")]
    Validation(String),
    #[error("{message}{}", render_listing(.listing))]
    Archive {
        message: String,
        listing: Vec<String>,
    },
    #[error("{program} exited with {status}{}", render_output(.stdout, .stderr))]
    Subprocess {
        program: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("directory error: {0}")]
    Directory(String),
}

impl MigrationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn directory(message: impl Into<String>) -> Self {
        Self::Directory(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Archive { .. } => "archive",
            Self::Subprocess { .. } => "subprocess",
            Self::Directory(_) => "directory",
        }
    }
}

fn render_listing(listing: &[String]) -> String {
    if listing.is_empty() {
        return " (parent directory is empty or unreadable)".to_string();
    }
    format!(" (parent directory contains: {})", listing.join(", "))
}

fn render_output(stdout: &str, stderr: &str) -> String {
    let mut rendered = String::new();
    let stderr = stderr.trim();
    let stdout = stdout.trim();
    if !stderr.is_empty() {
        rendered.push_str(&format!("\nstderr: {stderr}"));
    }
    if !stdout.is_empty() {
        rendered.push_str(&format!("\nstdout: {stdout}"));
    }
    rendered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningKind {
    Rewrite,
    Cleanup,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
