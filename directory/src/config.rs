use crate::types::Project;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum ProjectSourceType {
    File { path: PathBuf },
    Static { projects: Vec<Project> },
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    pub source: ProjectSourceType,
}
