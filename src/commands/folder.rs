use super::{Command, CommandContext};
use crate::models::format_bytes;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const LARGEST_SHOWN: usize = 5;
const NO_EXTENSION: &str = ".no_extension";

/// Summary of a directory tree
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FolderSummary {
    pub files: usize,
    pub folders: usize,
    pub total_bytes: u64,
    /// Extension (with leading dot) to file count
    pub extensions: BTreeMap<String, usize>,
    /// Largest files first, paths relative to the root
    pub largest: Vec<(PathBuf, u64)>,
}

/// Walk `root` recursively. Unreadable entries are skipped.
pub fn summarize(root: &Path) -> std::io::Result<FolderSummary> {
    let mut summary = FolderSummary::default();
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(e),
            Err(e) => {
                tracing::debug!("Skipping {}: {e}", dir.display());
                continue;
            }
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();

            if file_type.is_dir() {
                summary.folders += 1;
                pending.push(path);
            } else if file_type.is_file() {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                summary.files += 1;
                summary.total_bytes += size;

                let ext = path
                    .extension()
                    .map_or_else(|| NO_EXTENSION.to_string(), |e| {
                        format!(".{}", e.to_string_lossy().to_lowercase())
                    });
                *summary.extensions.entry(ext).or_insert(0) += 1;

                let relative = path.strip_prefix(root).map_or_else(|_| path.clone(), Path::to_path_buf);
                files.push((relative, size));
            }
        }
    }

    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    files.truncate(LARGEST_SHOWN);
    summary.largest = files;

    Ok(summary)
}

fn render(path: &Path, summary: &FolderSummary) -> String {
    let mut out = format!("Folder analysis: {}\n", path.display());
    out.push_str(&format!("Files: {}\n", summary.files));
    out.push_str(&format!("Folders: {}\n", summary.folders));
    out.push_str(&format!("Total size: {}\n", format_bytes(summary.total_bytes)));

    if !summary.extensions.is_empty() {
        let mut by_count: Vec<_> = summary.extensions.iter().collect();
        by_count.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        out.push_str("\nFile types:\n");
        for (ext, count) in by_count {
            out.push_str(&format!("  {ext}: {count}\n"));
        }
    }

    if !summary.largest.is_empty() {
        out.push_str("\nLargest files:\n");
        for (file, size) in &summary.largest {
            out.push_str(&format!("  {} ({})\n", file.display(), format_bytes(*size)));
        }
    }

    out.trim_end().to_string()
}

/// `folder: <path>` - describe a directory so the model can reason about it
#[derive(Debug, Default, Clone, Copy)]
pub struct FolderCommand;

impl FolderCommand {
    #[must_use]
    pub fn boxed() -> Box<dyn Command> {
        Box::new(Self)
    }
}

impl Command for FolderCommand {
    fn name(&self) -> &'static str {
        "folder"
    }

    fn help(&self) -> &'static str {
        "folder: <path>\n\nSummarise a directory (file counts, total size, file types, largest files) \
         and add the summary to the conversation."
    }

    fn is_context_provider(&self) -> bool {
        true
    }

    fn execute(&self, args: &str, ctx: &CommandContext) -> String {
        let raw = if args.trim().is_empty() { "." } else { args.trim() };
        let path = ctx.resolve_path(raw);

        if !path.exists() {
            return format!("Directory does not exist: {}", path.display());
        }
        if !path.is_dir() {
            return format!("Path is not a directory: {}", path.display());
        }

        match summarize(&path) {
            Ok(summary) => render(&path, &summary),
            Err(e) => format!("Failed to read directory {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), vec![b'x'; 300]).unwrap();
        fs::write(dir.path().join("b.RS"), vec![b'x'; 10]).unwrap();
        fs::write(dir.path().join("Makefile"), vec![b'x'; 50]).unwrap();
        fs::create_dir_all(dir.path().join("docs/img")).unwrap();
        fs::write(dir.path().join("docs/readme.md"), vec![b'x'; 2048]).unwrap();
        fs::write(dir.path().join("docs/img/logo.png"), vec![b'x'; 100]).unwrap();
        dir
    }

    fn ctx(cwd: &Path) -> CommandContext {
        CommandContext {
            cwd: cwd.to_path_buf(),
            home: None,
        }
    }

    #[test]
    fn test_summarize_counts() {
        let dir = fixture();
        let summary = summarize(dir.path()).unwrap();

        assert_eq!(summary.files, 5);
        assert_eq!(summary.folders, 2);
        assert_eq!(summary.total_bytes, 300 + 10 + 50 + 2048 + 100);
        assert_eq!(summary.extensions.get(".rs"), Some(&2));
        assert_eq!(summary.extensions.get(".no_extension"), Some(&1));
        assert_eq!(summary.extensions.get(".md"), Some(&1));
    }

    #[test]
    fn test_largest_files_capped_and_sorted() {
        let dir = fixture();
        fs::write(dir.path().join("tiny.txt"), b"x").unwrap();
        let summary = summarize(dir.path()).unwrap();

        assert_eq!(summary.largest.len(), 5);
        assert_eq!(summary.largest[0], (PathBuf::from("docs/readme.md"), 2048));
        assert_eq!(summary.largest[1].1, 300);
        assert!(summary.largest.iter().all(|(p, _)| p != Path::new("tiny.txt")));
    }

    #[test]
    fn test_execute_relative_path() {
        let dir = fixture();
        let out = FolderCommand.execute("docs", &ctx(dir.path()));

        assert!(out.starts_with("Folder analysis:"));
        assert!(out.contains("Files: 2"));
        assert!(out.contains("Folders: 1"));
        assert!(out.contains(".png: 1"));
        assert!(out.contains("Largest files:"));
    }

    #[test]
    fn test_execute_missing_directory() {
        let dir = TempDir::new().unwrap();
        let out = FolderCommand.execute("nope", &ctx(dir.path()));
        assert!(out.starts_with("Directory does not exist:"));
    }

    #[test]
    fn test_execute_on_file() {
        let dir = fixture();
        let out = FolderCommand.execute("a.rs", &ctx(dir.path()));
        assert!(out.starts_with("Path is not a directory:"));
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let out = FolderCommand.execute("", &ctx(dir.path()));
        assert!(out.contains("Files: 0"));
        assert!(out.contains("Total size: 0 B"));
        assert!(!out.contains("Largest files"));
    }
}
