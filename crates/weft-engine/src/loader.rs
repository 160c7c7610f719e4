use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use futures::future::BoxFuture;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::WorkflowLoader;
use weft_core::workflow::Workflow;

/// Loader over workflows registered in memory.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflow(self, workflow: Workflow) -> Self {
        self.insert(workflow);
        self
    }

    /// Register (or replace) a workflow under its own id.
    pub fn insert(&self, workflow: Workflow) {
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workflow.id.clone(), workflow);
    }

    pub fn remove(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workflow_id)
    }
}

impl WorkflowLoader for InMemoryLoader {
    fn load(&self, workflow_id: &str) -> BoxFuture<'_, Result<Workflow>> {
        let found = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned();
        let workflow_id = workflow_id.to_string();
        Box::pin(async move { found.ok_or(WeftError::WorkflowNotFound(workflow_id)) })
    }
}

/// Loader reading `<dir>/<workflow_id>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    dir: PathBuf,
}

impl DirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, workflow_id: &str) -> Option<PathBuf> {
        let plain = !workflow_id.is_empty()
            && !workflow_id.contains(['/', '\\'])
            && workflow_id != "."
            && workflow_id != "..";
        plain.then(|| self.dir.join(format!("{}.json", workflow_id)))
    }
}

impl WorkflowLoader for DirectoryLoader {
    fn load(&self, workflow_id: &str) -> BoxFuture<'_, Result<Workflow>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let path = self
                .path_for(&workflow_id)
                .ok_or_else(|| WeftError::WorkflowNotFound(workflow_id.clone()))?;

            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(WeftError::WorkflowNotFound(workflow_id));
                }
                Err(e) => return Err(e.into()),
            };

            debug!(workflow_id = %workflow_id, path = %path.display(), "Loaded workflow file");
            Workflow::from_json(&text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::workflow::Node;

    fn child(id: &str) -> Workflow {
        Workflow::new(id, "child").with_node(Node::new("only", "passthrough"))
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let loader = InMemoryLoader::new().with_workflow(child("c1"));
        assert_eq!(loader.load("c1").await.unwrap().id, "c1");
        let err = loader.load("c2").await.unwrap_err();
        assert!(matches!(err, WeftError::WorkflowNotFound(id) if id == "c2"));
    }

    #[tokio::test]
    async fn directory_reads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c1.json"), child("c1").to_json().unwrap()).unwrap();

        let loader = DirectoryLoader::new(dir.path());
        let wf = loader.load("c1").await.unwrap();
        assert_eq!(wf.nodes.len(), 1);

        assert!(matches!(
            loader.load("missing").await.unwrap_err(),
            WeftError::WorkflowNotFound(_)
        ));
    }

    #[tokio::test]
    async fn directory_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let loader = DirectoryLoader::new(dir.path());
        for id in ["../etc/passwd", "a/b", ".."] {
            assert!(matches!(
                loader.load(id).await.unwrap_err(),
                WeftError::WorkflowNotFound(_)
            ));
        }
    }

    #[tokio::test]
    async fn directory_surfaces_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let err = DirectoryLoader::new(dir.path()).load("bad").await.unwrap_err();
        assert!(matches!(err, WeftError::Json(_)));
    }
}
