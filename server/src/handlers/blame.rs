//! Blame lookups exposed to the client.

use crate::backend::BlameBackend;
use crate::error::{ServerError, ServerResult};
use blame_model::LineAttachedCommit;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower_lsp::lsp_types::Url;

/// Request for the attribution of one line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLineParams {
    pub uri: Url,
    /// 0-based line number.
    pub line: u32,
}

/// Response with the attribution of one line.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineBlameResponse {
    pub commit: Option<LineAttachedCommit>,
    /// Whether the line is not committed yet.
    pub uncommitted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFileParams {
    pub uri: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveRepositoryParams {
    /// Absolute git dir of the repository.
    pub git_root: PathBuf,
}

/// Local path of a `file:` URI.
pub fn uri_to_path(uri: &Url) -> ServerResult<PathBuf> {
    if uri.scheme() != "file" {
        return Err(ServerError::InvalidUri(uri.to_string()));
    }
    uri.to_file_path()
        .map_err(|_| ServerError::InvalidUri(uri.to_string()))
}

impl BlameBackend {
    pub async fn handle_get_line(&self, params: GetLineParams) -> ServerResult<LineBlameResponse> {
        let path = uri_to_path(&params.uri)?;
        let commit = self.blamer.get_line(&path, params.line).await;
        let uncommitted = commit
            .as_ref()
            .map(|line| line.commit.is_uncommitted())
            .unwrap_or(false);

        Ok(LineBlameResponse {
            commit,
            uncommitted,
        })
    }

    /// Every attributed line of a file, in the order git reported them.
    pub async fn handle_get_file(&self, params: GetFileParams) -> ServerResult<Vec<LineAttachedCommit>> {
        let path = uri_to_path(&params.uri)?;
        Ok(match self.blamer.file(&path).await {
            Some(blame) => blame.iter().cloned().collect(),
            None => Vec::new(),
        })
    }

    pub fn handle_remove_repository(&self, params: RemoveRepositoryParams) -> ServerResult<()> {
        if !params.git_root.is_absolute() {
            return Err(ServerError::InvalidParams(format!(
                "gitRoot must be absolute: {}",
                params.git_root.display()
            )));
        }
        self.blamer.remove_from_repository(&params.git_root);
        Ok(())
    }
}
