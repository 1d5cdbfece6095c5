use crate::metrics_defs::PROJECTS_LOADED;
use crate::negative_cache::NegativeCache;
use crate::source::{ProjectSource, SourceError};
use crate::types::{Project, ProjectId, generate_api_key};
use parking_lot::RwLock;
use shared::gauge;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DirectoryError {
    #[error("no project found for API key")]
    NotFound,

    #[error("unknown project: {0}")]
    UnknownProject(ProjectId),

    #[error("API key is already assigned to project {0}")]
    KeyInUse(ProjectId),
}

#[derive(Default)]
struct DirectoryData {
    key_to_project: HashMap<String, ProjectId>,
    projects: HashMap<ProjectId, Project>,
}

impl DirectoryData {
    fn insert(&mut self, project: Project) {
        self.key_to_project
            .insert(project.api_key.clone(), project.id);
        self.projects.insert(project.id, project);
    }

    fn unused_key(&self) -> String {
        loop {
            let key = generate_api_key();
            if !self.key_to_project.contains_key(&key) {
                return key;
            }
        }
    }
}

struct DirectoryInner {
    data: RwLock<DirectoryData>,
    negative_cache: NegativeCache,
    // Used by the readiness probe. Set once any source has been loaded.
    ready: AtomicBool,
}

/// Read-mostly index of projects by API key. Cheap to clone.
#[derive(Clone)]
pub struct Directory {
    inner: Arc<DirectoryInner>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        Directory {
            inner: Arc::new(DirectoryInner {
                data: RwLock::new(DirectoryData::default()),
                negative_cache: NegativeCache::new(),
                ready: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_source(source: &dyn ProjectSource) -> Result<Self, SourceError> {
        let directory = Directory::new();
        directory.load(source)?;
        Ok(directory)
    }

    /// Replaces the directory contents with the projects from `source`.
    pub fn load(&self, source: &dyn ProjectSource) -> Result<usize, SourceError> {
        let projects = source.load()?;
        let count = projects.len();

        let mut data = DirectoryData::default();
        for project in projects {
            data.insert(project);
        }

        *self.inner.data.write() = data;
        self.inner.ready.store(true, Ordering::Relaxed);
        gauge!(PROJECTS_LOADED).set(count as f64);
        tracing::info!(projects = count, "project directory loaded");

        Ok(count)
    }

    pub fn resolve(&self, api_key: &str) -> Result<ProjectId, DirectoryError> {
        if self.inner.negative_cache.contains(api_key) {
            return Err(DirectoryError::NotFound);
        }

        let project_id = self.inner.data.read().key_to_project.get(api_key).copied();
        match project_id {
            Some(id) => Ok(id),
            None => {
                self.inner.negative_cache.insert(api_key);
                Err(DirectoryError::NotFound)
            }
        }
    }

    pub fn contains(&self, project_id: ProjectId) -> bool {
        self.inner.data.read().projects.contains_key(&project_id)
    }

    /// Creates a project with a freshly generated key.
    pub fn register<N: Into<String>>(&self, name: N) -> Project {
        let mut project = Project::new(name);
        {
            let mut data = self.inner.data.write();
            if data.key_to_project.contains_key(&project.api_key) {
                project.api_key = data.unused_key();
            }
            data.insert(project.clone());
            gauge!(PROJECTS_LOADED).set(data.projects.len() as f64);
        }
        self.inner.negative_cache.invalidate(&project.api_key);
        project
    }

    /// Adds or replaces a project record as issued by the account subsystem.
    /// A key already held by a different project is rejected.
    pub fn insert(&self, project: Project) -> Result<(), DirectoryError> {
        let api_key = project.api_key.clone();
        {
            let mut data = self.inner.data.write();
            if let Some(&owner) = data.key_to_project.get(&api_key)
                && owner != project.id
            {
                return Err(DirectoryError::KeyInUse(owner));
            }
            let previous_key = data.projects.get(&project.id).map(|p| p.api_key.clone());
            if let Some(previous_key) = previous_key {
                data.key_to_project.remove(&previous_key);
            }
            data.insert(project);
            gauge!(PROJECTS_LOADED).set(data.projects.len() as f64);
        }
        self.inner.negative_cache.invalidate(&api_key);
        Ok(())
    }

    /// Issues a new key for the project. The old key stops resolving in the
    /// same critical section that makes the new one resolvable.
    pub fn rotate_key(&self, project_id: ProjectId) -> Result<String, DirectoryError> {
        let new_key = {
            let mut data = self.inner.data.write();
            let new_key = data.unused_key();
            let project = data
                .projects
                .get_mut(&project_id)
                .ok_or(DirectoryError::UnknownProject(project_id))?;
            let old_key = std::mem::replace(&mut project.api_key, new_key.clone());
            data.key_to_project.remove(&old_key);
            data.key_to_project.insert(new_key.clone(), project_id);
            new_key
        };
        self.inner.negative_cache.invalidate(&new_key);
        tracing::info!(project_id = %project_id, "API key rotated");
        Ok(new_key)
    }

    pub fn remove(&self, project_id: ProjectId) -> Result<Project, DirectoryError> {
        let mut data = self.inner.data.write();
        let project = data
            .projects
            .remove(&project_id)
            .ok_or(DirectoryError::UnknownProject(project_id))?;
        data.key_to_project.remove(&project.api_key);
        gauge!(PROJECTS_LOADED).set(data.projects.len() as f64);
        Ok(project)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
