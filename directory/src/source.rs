//! Sources the directory is populated from at startup.
use crate::config::{Config, ProjectSourceType};
use crate::types::Project;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not parse project list: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("API key is assigned to more than one project: {0}")]
    DuplicateKey(String),

    #[error("project id appears more than once: {0}")]
    DuplicateProject(String),
}

pub trait ProjectSource: Send + Sync {
    fn load(&self) -> Result<Vec<Project>, SourceError>;
}

/// Reads a YAML list of projects from disk.
pub struct FileProjectSource {
    path: PathBuf,
}

impl FileProjectSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileProjectSource {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ProjectSource for FileProjectSource {
    fn load(&self) -> Result<Vec<Project>, SourceError> {
        let file = File::open(&self.path)?;
        let projects: Vec<Project> = serde_yaml::from_reader(io::BufReader::new(file))?;
        check_unique(&projects)?;
        Ok(projects)
    }
}

/// Projects listed inline in the configuration file.
pub struct StaticProjectSource {
    projects: Vec<Project>,
}

impl StaticProjectSource {
    pub fn new(projects: Vec<Project>) -> Self {
        StaticProjectSource { projects }
    }
}

impl ProjectSource for StaticProjectSource {
    fn load(&self) -> Result<Vec<Project>, SourceError> {
        check_unique(&self.projects)?;
        Ok(self.projects.clone())
    }
}

pub fn from_config(config: &Config) -> Box<dyn ProjectSource> {
    match &config.source {
        ProjectSourceType::File { path } => Box::new(FileProjectSource::new(path)),
        ProjectSourceType::Static { projects } => {
            Box::new(StaticProjectSource::new(projects.clone()))
        }
    }
}

fn check_unique(projects: &[Project]) -> Result<(), SourceError> {
    let mut keys = HashSet::new();
    let mut ids = HashSet::new();
    for project in projects {
        if !keys.insert(project.api_key.as_str()) {
            return Err(SourceError::DuplicateKey(project.api_key.clone()));
        }
        if !ids.insert(project.id) {
            return Err(SourceError::DuplicateProject(project.id.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PROJECTS_YAML: &str = r#"
- id: 6f1c2a51-3c1f-4a8e-9d3a-0b8f8f6b1a01
  name: checkout
  api_key: key-checkout
- id: 0d4e9a3b-7c55-4f0e-8f6e-2f1b5d9c7e02
  name: search
  api_key: key-search
"#;

    #[test]
    fn test_file_source() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "{PROJECTS_YAML}").unwrap();

        let projects = FileProjectSource::new(tmp.path()).load().unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].name, "checkout");
        assert_eq!(projects[1].api_key, "key-search");
    }

    #[test]
    fn test_missing_file() {
        let source = FileProjectSource::new("/nonexistent/projects.yaml");
        assert!(matches!(source.load(), Err(SourceError::Io(_))));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut second = Project::new("second");
        let first = Project::new("first");
        second.api_key = first.api_key.clone();

        let source = StaticProjectSource::new(vec![first, second]);
        assert!(matches!(source.load(), Err(SourceError::DuplicateKey(_))));
    }

    #[test]
    fn test_source_from_config() {
        let config: Config = serde_yaml::from_str(
            r#"
source:
  type: static
  projects:
    - id: 6f1c2a51-3c1f-4a8e-9d3a-0b8f8f6b1a01
      name: checkout
      api_key: key-checkout
"#,
        )
        .unwrap();

        let projects = from_config(&config).load().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].api_key, "key-checkout");
    }
}
