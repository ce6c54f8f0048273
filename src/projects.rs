//! Project bookkeeping for context-provider output
//!
//! Each project lives in `<base>/<id>/` with a `metadata.json` holding the
//! project record and its artifact list. Artifact bodies are written next to
//! it under `artifacts/<artifact id>.txt`.

use crate::error::{BielikError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub artifacts_count: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Shell session that created the project
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub id: String,
    pub name: String,
    /// Producing command, e.g. `folder` or `calc`
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
    pub created_at: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the content
    pub checksum: String,
    pub project_id: String,
}

/// On-disk layout of `metadata.json`
#[derive(Debug, Serialize, Deserialize)]
struct ProjectFile {
    project: ProjectMetadata,
    #[serde(default)]
    artifacts: Vec<ArtifactMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub project: ProjectMetadata,
    pub artifacts: Vec<ArtifactMetadata>,
    pub total_size: u64,
    pub artifact_types: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectListing {
    pub id: String,
    pub name: String,
    pub description: String,
    pub artifacts_count: usize,
    pub created_at: String,
    pub updated_at: String,
    pub tags: Vec<String>,
    pub is_current: bool,
}

/// All projects under one base directory plus the active selection
#[derive(Debug)]
pub struct ProjectStore {
    base_dir: PathBuf,
    session_id: String,
    current: Option<String>,
    projects: BTreeMap<String, ProjectFile>,
}

impl ProjectStore {
    /// Load every readable project under `base_dir`; corrupt ones are skipped
    pub fn open(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir)?;

        let mut projects = BTreeMap::new();
        for entry in fs::read_dir(base_dir)? {
            let path = entry?.path().join(METADATA_FILE);
            if !path.is_file() {
                continue;
            }
            match read_project(&path) {
                Ok(file) => {
                    projects.insert(file.project.id.clone(), file);
                }
                Err(e) => tracing::warn!("Skipping project {}: {e}", path.display()),
            }
        }
        tracing::debug!("Loaded {} project(s) from {}", projects.len(), base_dir.display());

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            session_id: uuid::Uuid::new_v4().to_string(),
            current: None,
            projects,
        })
    }

    /// Create a project and make it current; returns its id
    pub fn create_project(&mut self, name: &str, description: &str, tags: &[String]) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BielikError::Other("Project name cannot be empty".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Local::now().to_rfc3339();
        let file = ProjectFile {
            project: ProjectMetadata {
                id: id.clone(),
                name: name.to_string(),
                description: description.trim().to_string(),
                created_at: now.clone(),
                updated_at: now,
                artifacts_count: 0,
                tags: tags.to_vec(),
                session_id: self.session_id.clone(),
            },
            artifacts: Vec::new(),
        };

        fs::create_dir_all(self.project_dir(&id))?;
        self.save(&file)?;
        self.projects.insert(id.clone(), file);
        self.current = Some(id.clone());
        tracing::info!("Created project {name} ({id})");
        Ok(id)
    }

    /// Select a project by id, id prefix or exact name
    pub fn switch_to_project(&mut self, key: &str) -> bool {
        match self.resolve(key) {
            Some(id) => {
                self.current = Some(id);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&ProjectMetadata> {
        self.current
            .as_ref()
            .and_then(|id| self.projects.get(id))
            .map(|f| &f.project)
    }

    /// Store `content` as an artifact of the current project; returns its id
    pub fn add_artifact(
        &mut self,
        kind: &str,
        command: &str,
        content: &str,
        name: Option<&str>,
    ) -> Result<String> {
        let project_id = self.current.clone().ok_or_else(|| {
            BielikError::Other("No active project. Create or switch to a project first.".to_string())
        })?;

        let now = chrono::Local::now();
        let artifact = ArtifactMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.map_or_else(
                || format!("{kind}_{}", now.format("%H%M%S")),
                ToString::to_string,
            ),
            kind: kind.to_string(),
            command: command.to_string(),
            created_at: now.to_rfc3339(),
            size_bytes: content.len() as u64,
            checksum: hex::encode(Sha256::digest(content.as_bytes())),
            project_id: project_id.clone(),
        };

        let artifacts_dir = self.project_dir(&project_id).join("artifacts");
        fs::create_dir_all(&artifacts_dir)?;
        fs::write(artifacts_dir.join(format!("{}.txt", artifact.id)), content)?;

        let file = self
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| BielikError::Other(format!("Project {project_id} disappeared")))?;
        file.project.artifacts_count += 1;
        file.project.updated_at = artifact.created_at.clone();
        file.artifacts.push(artifact.clone());

        let file = &self.projects[&project_id];
        self.save(file)?;
        tracing::info!("Added artifact {} to project {}", artifact.name, file.project.name);
        Ok(artifact.id)
    }

    /// Summary of `key` (or the current project when `None`)
    #[must_use]
    pub fn summary(&self, key: Option<&str>) -> Option<ProjectSummary> {
        let id = match key {
            Some(key) => self.resolve(key)?,
            None => self.current.clone()?,
        };
        let file = self.projects.get(&id)?;

        Some(ProjectSummary {
            project: file.project.clone(),
            artifacts: file.artifacts.clone(),
            total_size: file.artifacts.iter().map(|a| a.size_bytes).sum(),
            artifact_types: file.artifacts.iter().map(|a| a.kind.clone()).collect(),
        })
    }

    /// Every known project, oldest first
    #[must_use]
    pub fn list_projects(&self) -> Vec<ProjectListing> {
        let mut listings: Vec<ProjectListing> = self
            .projects
            .values()
            .map(|f| ProjectListing {
                id: f.project.id.clone(),
                name: f.project.name.clone(),
                description: f.project.description.clone(),
                artifacts_count: f.project.artifacts_count,
                created_at: f.project.created_at.clone(),
                updated_at: f.project.updated_at.clone(),
                tags: f.project.tags.clone(),
                is_current: self.current.as_deref() == Some(f.project.id.as_str()),
            })
            .collect();
        listings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        listings
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, key: &str) -> Option<String> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        if self.projects.contains_key(key) {
            return Some(key.to_string());
        }

        let by_name: Vec<&String> = self
            .projects
            .iter()
            .filter(|(_, f)| f.project.name == key)
            .map(|(id, _)| id)
            .collect();
        if let [id] = by_name.as_slice() {
            return Some((*id).clone());
        }

        let by_prefix: Vec<&String> = self.projects.keys().filter(|id| id.starts_with(key)).collect();
        match by_prefix.as_slice() {
            [id] => Some((*id).clone()),
            _ => None,
        }
    }

    fn project_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    fn save(&self, file: &ProjectFile) -> Result<()> {
        let path = self.project_dir(&file.project.id).join(METADATA_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn read_project(path: &Path) -> Result<ProjectFile> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ProjectStore {
        ProjectStore::open(dir.path()).unwrap()
    }

    #[test]
    fn test_create_project_becomes_current() {
        let temp_dir = TempDir::new().unwrap();
        let mut projects = store(&temp_dir);

        let id = projects
            .create_project("Raport", "kwartalny", &["praca".to_string()])
            .unwrap();

        let current = projects.current().unwrap();
        assert_eq!(current.id, id);
        assert_eq!(current.name, "Raport");
        assert_eq!(current.tags, vec!["praca"]);
        assert!(temp_dir.path().join(&id).join(METADATA_FILE).is_file());
    }

    #[test]
    fn test_empty_name_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut projects = store(&temp_dir);
        assert!(projects.create_project("  ", "", &[]).is_err());
        assert!(projects.list_projects().is_empty());
    }

    #[test]
    fn test_artifact_needs_active_project() {
        let temp_dir = TempDir::new().unwrap();
        let mut projects = store(&temp_dir);

        let err = projects.add_artifact("calc", "calc: 2+2", "4", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No active project. Create or switch to a project first."
        );
    }

    #[test]
    fn test_add_artifact_updates_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let mut projects = store(&temp_dir);
        let id = projects.create_project("Notatki", "", &[]).unwrap();

        let artifact_id = projects
            .add_artifact("folder", "folder: ~/docs", "a.txt\nb.txt", Some("listing"))
            .unwrap();
        projects.add_artifact("calc", "calc: 2+2", "2+2 = 4", None).unwrap();

        let summary = projects.summary(None).unwrap();
        assert_eq!(summary.project.artifacts_count, 2);
        assert_eq!(summary.total_size, 11 + 7);
        assert_eq!(
            summary.artifact_types.into_iter().collect::<Vec<_>>(),
            vec!["calc", "folder"]
        );

        let first = &summary.artifacts[0];
        assert_eq!(first.id, artifact_id);
        assert_eq!(first.name, "listing");
        assert_eq!(first.project_id, id);
        assert_eq!(first.checksum.len(), 64);
        assert!(summary.artifacts[1].name.starts_with("calc_"));

        let body = temp_dir
            .path()
            .join(&id)
            .join("artifacts")
            .join(format!("{artifact_id}.txt"));
        assert_eq!(std::fs::read_to_string(body).unwrap(), "a.txt\nb.txt");
    }

    #[test]
    fn test_checksum_is_sha256() {
        let temp_dir = TempDir::new().unwrap();
        let mut projects = store(&temp_dir);
        projects.create_project("p", "", &[]).unwrap();
        projects.add_artifact("calc", "calc: x", "abc", None).unwrap();

        let summary = projects.summary(None).unwrap();
        assert_eq!(
            summary.artifacts[0].checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_projects_reload_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let id = {
            let mut projects = store(&temp_dir);
            let id = projects.create_project("Trwały", "", &[]).unwrap();
            projects.add_artifact("calc", "calc: 1", "1", None).unwrap();
            id
        };

        let mut reopened = store(&temp_dir);
        assert!(reopened.current().is_none());
        assert!(reopened.switch_to_project("Trwały"));
        let summary = reopened.summary(None).unwrap();
        assert_eq!(summary.project.id, id);
        assert_eq!(summary.artifacts.len(), 1);
    }

    #[test]
    fn test_switch_by_id_name_and_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let mut projects = store(&temp_dir);
        let first = projects.create_project("Pierwszy", "", &[]).unwrap();
        let second = projects.create_project("Drugi", "", &[]).unwrap();

        assert!(projects.switch_to_project(&first));
        assert_eq!(projects.current().unwrap().id, first);
        assert!(projects.switch_to_project("Drugi"));
        assert_eq!(projects.current().unwrap().id, second);
        assert!(projects.switch_to_project(&first[..8]));
        assert_eq!(projects.current().unwrap().id, first);
        assert!(!projects.switch_to_project("nie ma"));
        assert!(!projects.switch_to_project(""));
        assert_eq!(projects.current().unwrap().id, first);
    }

    #[test]
    fn test_list_marks_current() {
        let temp_dir = TempDir::new().unwrap();
        let mut projects = store(&temp_dir);
        projects.create_project("A", "", &[]).unwrap();
        let b = projects.create_project("B", "", &[]).unwrap();

        let listings = projects.list_projects();
        assert_eq!(listings.len(), 2);
        let current: Vec<_> = listings.iter().filter(|l| l.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, b);
    }

    #[test]
    fn test_corrupt_project_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let broken = temp_dir.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(METADATA_FILE), "{ nope").unwrap();

        let mut projects = store(&temp_dir);
        assert!(projects.list_projects().is_empty());
        projects.create_project("ok", "", &[]).unwrap();
        assert_eq!(store(&temp_dir).list_projects().len(), 1);
    }

    #[test]
    fn test_summary_of_unknown_project() {
        let temp_dir = TempDir::new().unwrap();
        let projects = store(&temp_dir);
        assert!(projects.summary(None).is_none());
        assert!(projects.summary(Some("missing")).is_none());
    }
}
