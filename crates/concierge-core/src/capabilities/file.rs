use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tracing::info;

use concierge_config::FileToolConfig;

use crate::task::{Capability, TaskOutcome, TaskRequest};

/// Files untouched for longer than this are removed by `clean`.
const STALE_AFTER: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileAction {
    Organize,
    Search,
    Backup,
    Clean,
}

/// Local file housekeeping: organize, search, backup and clean.
pub struct FileCapability {
    allowed_dir: Option<PathBuf>,
    backup_dir: PathBuf,
    organize_re: Regex,
    search_re: Regex,
    backup_re: Regex,
    clean_re: Regex,
    path_re: Regex,
    term_re: Regex,
}

impl FileCapability {
    pub fn new(config: &FileToolConfig) -> Result<Self> {
        Ok(Self {
            allowed_dir: config
                .restrict_to
                .as_deref()
                .map(concierge_config::resolve_path),
            backup_dir: concierge_config::resolve_path(&config.backup_dir),
            organize_re: Regex::new(r"(?i)organize|sort")?,
            search_re: Regex::new(r"(?i)search|find")?,
            backup_re: Regex::new(r"(?i)backup")?,
            clean_re: Regex::new(r"(?i)clean|delete|remove")?,
            path_re: Regex::new(r"(?i)(?:in|from|at)\s+(\S+)")?,
            term_re: Regex::new(r#"(?i)(?:search|find)\s+(?:for\s+)?["']?([^"'\s]+)["']?"#)?,
        })
    }

    fn action(&self, description: &str) -> Option<FileAction> {
        if self.organize_re.is_match(description) {
            Some(FileAction::Organize)
        } else if self.search_re.is_match(description) {
            Some(FileAction::Search)
        } else if self.backup_re.is_match(description) {
            Some(FileAction::Backup)
        } else if self.clean_re.is_match(description) {
            Some(FileAction::Clean)
        } else {
            None
        }
    }

    fn extract_path(&self, description: &str) -> Option<String> {
        self.path_re
            .captures(description)
            .map(|caps| caps[1].to_string())
    }

    fn extract_term(&self, description: &str) -> String {
        self.term_re
            .captures(description)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default()
    }

    /// Expand `~` and enforce the optional directory restriction.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let expanded = concierge_config::resolve_path(path);
        let resolved = expanded
            .canonicalize()
            .unwrap_or_else(|_| std::path::absolute(&expanded).unwrap_or(expanded));

        if let Some(allowed) = &self.allowed_dir {
            let allowed_resolved = allowed.canonicalize().unwrap_or_else(|_| allowed.clone());
            if !resolved.starts_with(&allowed_resolved) {
                anyhow::bail!(
                    "Path {path} is outside allowed directory {}",
                    allowed.display()
                );
            }
        }
        Ok(resolved)
    }

    fn organize(&self, dir: &Path) -> Result<TaskOutcome> {
        let mut organized = 0u64;
        for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let category = path
                .extension()
                .map(|e| e.to_string_lossy().to_uppercase())
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "OTHER".to_string());
            let target_dir = dir.join(category);
            std::fs::create_dir_all(&target_dir)?;
            std::fs::rename(&path, target_dir.join(entry.file_name()))?;
            organized += 1;
        }

        info!("Organized {organized} files in {}", dir.display());
        Ok(TaskOutcome::ok(format!("Organized {organized} files by extension"))
            .with("filesOrganized", organized))
    }

    fn search(&self, dir: &Path, term: &str) -> TaskOutcome {
        let needle = term.to_lowercase();
        let mut found = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            // Unreadable directories are skipped
            let Ok(entries) = std::fs::read_dir(&current) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => pending.push(path),
                    Ok(_) => {
                        if entry
                            .file_name()
                            .to_string_lossy()
                            .to_lowercase()
                            .contains(&needle)
                        {
                            found.push(path.display().to_string());
                        }
                    }
                    Err(_) => {}
                }
            }
        }
        found.sort();

        info!("Found {} files matching \"{term}\"", found.len());
        TaskOutcome::ok(format!("Found {} matching files", found.len())).with("files", found)
    }

    fn backup(&self, source: &Path) -> Result<TaskOutcome> {
        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "root".to_string());
        let dest = self
            .backup_dir
            .join(format!("{base}_{}", Utc::now().timestamp_millis()));

        copy_dir(source, &dest)?;

        info!("Backup created: {}", dest.display());
        Ok(TaskOutcome::ok("Backup created successfully")
            .with("backupPath", dest.display().to_string()))
    }

    fn clean(&self, dir: &Path) -> Result<TaskOutcome> {
        let cutoff = SystemTime::now()
            .checked_sub(STALE_AFTER)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut deleted = 0u64;

        for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() && meta.modified()? < cutoff {
                std::fs::remove_file(entry.path())?;
                deleted += 1;
            }
        }

        info!("Deleted {deleted} old files from {}", dir.display());
        Ok(TaskOutcome::ok(format!("Deleted {deleted} old files")).with("filesDeleted", deleted))
    }
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    let mut pending = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        std::fs::create_dir_all(&to).with_context(|| format!("creating {}", to.display()))?;
        for entry in std::fs::read_dir(&from).with_context(|| format!("reading {}", from.display()))? {
            let entry = entry?;
            let target = to.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                std::fs::copy(entry.path(), &target)?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Capability for FileCapability {
    fn task_type(&self) -> &str {
        "file"
    }

    async fn execute(&self, task: &TaskRequest) -> Result<TaskOutcome> {
        let Some(action) = self.action(&task.description) else {
            return Ok(TaskOutcome::rejected("File action not recognized"));
        };
        let path = self.extract_path(&task.description);

        match action {
            FileAction::Organize => {
                let dir = self.resolve(path.as_deref().unwrap_or("./Downloads"))?;
                self.organize(&dir)
            }
            FileAction::Search => {
                let dir = self.resolve(path.as_deref().unwrap_or("./"))?;
                Ok(self.search(&dir, &self.extract_term(&task.description)))
            }
            FileAction::Backup => {
                let Some(path) = path else {
                    return Ok(TaskOutcome::rejected("No source directory found in task description"));
                };
                let source = self.resolve(&path)?;
                self.backup(&source)
            }
            FileAction::Clean => {
                let dir = self.resolve(path.as_deref().unwrap_or("./temp"))?;
                self.clean(&dir)
            }
        }
    }
}
