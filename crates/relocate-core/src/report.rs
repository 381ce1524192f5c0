use serde::Serialize;

use crate::WarningKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationWarning {
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Warnings {
    entries: Vec<MigrationWarning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rewrite(&mut self, message: impl Into<String>) {
        self.push(WarningKind::Rewrite, message.into());
    }

    pub fn cleanup(&mut self, message: impl Into<String>) {
        self.push(WarningKind::Cleanup, message.into());
    }

    fn push(&mut self, kind: WarningKind, message: String) {
        log::warn!("[{kind}] {message}");
        self.entries.push(MigrationWarning { kind, message });
    }

    pub fn extend(&mut self, other: Warnings) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationWarning> {
        self.entries.iter()
    }

    pub fn of_kind(&self, kind: WarningKind) -> impl Iterator<Item = &MigrationWarning> {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| format!("{}: {}", entry.kind, entry.message))
            .collect()
    }
}
