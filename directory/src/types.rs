use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable internal identity of a project. Never changes across key rotations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new_v4() -> Self {
        ProjectId(Uuid::new_v4())
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub api_key: String,
}

impl Project {
    pub fn new<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        Project {
            id: ProjectId::new_v4(),
            name: name.into(),
            api_key: generate_api_key(),
        }
    }
}

pub(crate) fn generate_api_key() -> String {
    Uuid::new_v4().to_string()
}
