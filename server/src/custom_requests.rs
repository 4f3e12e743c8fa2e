//! Custom requests for blame lookups.
//!
//! `workspace/executeCommand` forwards its first argument here as the params.

use crate::backend::BlameBackend;
use crate::handlers::*;
use serde_json::Value;
use tower_lsp::jsonrpc::{Error, Result};

/// Custom request handler dispatcher
impl BlameBackend {
    pub async fn handle_custom_request(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "gitblame/getLine" => {
                let params: GetLineParams = serde_json::from_value(params)
                    .map_err(|e| Error::invalid_params(format!("Invalid params: {e}")))?;
                let response = self.handle_get_line(params).await?;
                serde_json::to_value(response).map_err(|_| Error::internal_error())
            }

            "gitblame/getFile" => {
                let params: GetFileParams = serde_json::from_value(params)
                    .map_err(|e| Error::invalid_params(format!("Invalid params: {e}")))?;
                let response = self.handle_get_file(params).await?;
                serde_json::to_value(response).map_err(|_| Error::internal_error())
            }

            "gitblame/removeRepository" => {
                let params: RemoveRepositoryParams = serde_json::from_value(params)
                    .map_err(|e| Error::invalid_params(format!("Invalid params: {e}")))?;
                self.handle_remove_repository(params)?;
                Ok(Value::Null)
            }

            _ => Err(Error::method_not_found()),
        }
    }
}
