//! LSP Backend Implementation
//!
//! Opening a document starts its blame, closing it drops the cached result.
//! Lookups go through `workspace/executeCommand`.

use crate::cache::Blamer;
use crate::config::SharedSettings;
use crate::error::ServerResult;
use crate::git::{GitCommand, ProcessRunner};
use crate::handlers::uri_to_path;
use crate::watcher::WatchService;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

/// Commands accepted by `workspace/executeCommand`, with the request they map to.
pub const COMMANDS: [(&str, &str); 3] = [
    ("gitblame.getLine", "gitblame/getLine"),
    ("gitblame.getFile", "gitblame/getFile"),
    ("gitblame.removeRepository", "gitblame/removeRepository"),
];

/// Git blame language server backend.
pub struct BlameBackend {
    /// LSP client for sending notifications.
    pub client: Client,

    /// Live settings, shared with the git layer.
    pub settings: SharedSettings,

    /// Per-file blame cache.
    pub blamer: Blamer,
}

impl BlameBackend {
    pub fn new(
        client: Client,
        settings: SharedSettings,
        runner: Arc<dyn ProcessRunner>,
        watcher: Arc<dyn WatchService>,
    ) -> Self {
        let git = Arc::new(GitCommand::new(runner, Arc::clone(&settings)));
        let parallel_blames = settings.read().parallel_blames;

        Self {
            client,
            blamer: Blamer::new(git, watcher, parallel_blames),
            settings,
        }
    }

    /// Overlay a settings payload and resize the blame queue.
    pub fn apply_settings(&self, payload: &Value) -> ServerResult<()> {
        let parallel_blames = {
            let mut settings = self.settings.write();
            settings.apply(payload)?;
            settings.parallel_blames
        };
        self.blamer.queue().update_parallel(parallel_blames);
        Ok(())
    }

    fn document_path(uri: &Url) -> Option<PathBuf> {
        match uri_to_path(uri) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!("Ignoring document: {}", e);
                None
            }
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for BlameBackend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        tracing::info!("Initializing git blame LSP server");

        if let Some(options) = params.initialization_options {
            if let Err(e) = self.apply_settings(&options) {
                tracing::warn!("Ignoring invalid initialization options: {}", e);
            }
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::NONE),
                        ..Default::default()
                    },
                )),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: COMMANDS
                        .iter()
                        .map(|(command, _)| command.to_string())
                        .collect(),
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "Git blame LSP server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down git blame LSP server");
        self.blamer.dispose();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        if let Some(path) = Self::document_path(&params.text_document.uri) {
            self.blamer.prepare_file(&path);
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        if let Some(path) = Self::document_path(&params.text_document.uri) {
            self.blamer.remove(&path);
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        if let Err(e) = self.apply_settings(&params.settings) {
            tracing::warn!("Ignoring invalid settings: {}", e);
            self.client
                .log_message(MessageType::WARNING, format!("Invalid gitblame settings: {e}"))
                .await;
        }
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<Value>> {
        tracing::debug!("Executing command: {}", params.command);

        let method = COMMANDS
            .iter()
            .find(|(command, _)| *command == params.command)
            .map(|(_, method)| *method)
            .ok_or_else(|| {
                tower_lsp::jsonrpc::Error::invalid_params(format!(
                    "Unknown command: {}",
                    params.command
                ))
            })?;

        let args = params.arguments.into_iter().next().unwrap_or(Value::Null);
        self.handle_custom_request(method, args).await.map(Some)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::test_service;
    use super::*;
    use serde_json::json;

    const OUTPUT: &str = "60d3fd32a7a9da4c8c93a9f89cfda22a0b4c65ce 1 1 1\nsummary One\nfilename a.rs\n";

    fn open_params(uri: Url) -> DidOpenTextDocumentParams {
        DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri,
                language_id: "rust".to_string(),
                version: 1,
                text: "line\n".to_string(),
            },
        }
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_shared_state_is_send_and_sync() {
        assert_send_sync::<crate::watcher::WatchHandle>();
        assert_send_sync::<Blamer>();
        assert_send_sync::<BlameBackend>();
    }

    #[tokio::test]
    async fn test_initialize_advertises_commands() {
        let fx = test_service(OUTPUT);
        let result = fx
            .service
            .inner()
            .initialize(InitializeParams::default())
            .await
            .unwrap();

        let commands = result
            .capabilities
            .execute_command_provider
            .unwrap()
            .commands;
        assert_eq!(
            commands,
            vec![
                "gitblame.getLine",
                "gitblame.getFile",
                "gitblame.removeRepository"
            ]
        );
    }

    #[tokio::test]
    async fn test_initialize_applies_options() {
        let fx = test_service(OUTPUT);
        let backend = fx.service.inner();
        let params = InitializeParams {
            initialization_options: Some(json!({ "parallelBlames": 4, "ignoreWhitespace": true })),
            ..Default::default()
        };

        backend.initialize(params).await.unwrap();

        assert!(backend.settings.read().ignore_whitespace);
        assert_eq!(backend.blamer.queue().max_parallel(), 4);
    }

    #[tokio::test]
    async fn test_configuration_change_updates_queue() {
        let fx = test_service(OUTPUT);
        let backend = fx.service.inner();

        backend
            .did_change_configuration(DidChangeConfigurationParams {
                settings: json!({ "gitblame": { "parallelBlames": 0 } }),
            })
            .await;

        assert_eq!(backend.settings.read().parallel_blames, 0);
        assert_eq!(backend.blamer.queue().max_parallel(), 1);
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_ignored() {
        let fx = test_service(OUTPUT);
        let backend = fx.service.inner();

        assert!(backend
            .apply_settings(&json!({ "parallelBlames": "lots" }))
            .is_err());
        assert_eq!(backend.settings.read().parallel_blames, 2);
        assert_eq!(backend.blamer.queue().max_parallel(), 2);
    }

    #[tokio::test]
    async fn test_open_prepares_and_close_removes() {
        let fx = test_service(OUTPUT);
        let backend = fx.service.inner();
        let path = fx.file("a.rs");
        let uri = Url::from_file_path(&path).unwrap();

        backend.did_open(open_params(uri.clone())).await;
        assert!(backend.blamer.contains(&path));
        backend.blamer.file(&path).await.unwrap();
        assert_eq!(fx.watches.active(&path), 1);

        backend
            .did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri },
            })
            .await;
        assert!(!backend.blamer.contains(&path));
        assert_eq!(fx.watches.active(&path), 0);
    }

    #[tokio::test]
    async fn test_open_ignores_non_file_uri() {
        let fx = test_service(OUTPUT);
        let backend = fx.service.inner();

        backend
            .did_open(open_params(Url::parse("untitled:Untitled-1").unwrap()))
            .await;

        assert!(backend.blamer.is_empty());
    }

    #[tokio::test]
    async fn test_execute_get_line() {
        let fx = test_service(OUTPUT);
        let uri = Url::from_file_path(fx.file("a.rs")).unwrap();

        let value = fx
            .service
            .inner()
            .execute_command(ExecuteCommandParams {
                command: "gitblame.getLine".to_string(),
                arguments: vec![json!({ "uri": uri, "line": 0 })],
                work_done_progress_params: Default::default(),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(value["commit"]["commit"]["summary"], "One");
        assert_eq!(value["uncommitted"], false);
        assert_eq!(fx.runner.spawn_count("blame"), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_command() {
        let fx = test_service(OUTPUT);
        let err = fx
            .service
            .inner()
            .execute_command(ExecuteCommandParams {
                command: "gitblame.blameEverything".to_string(),
                arguments: vec![],
                work_done_progress_params: Default::default(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.code, tower_lsp::jsonrpc::ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn test_shutdown_disposes_cache() {
        let fx = test_service(OUTPUT);
        let backend = fx.service.inner();
        let path = fx.file("a.rs");
        backend.blamer.file(&path).await.unwrap();

        backend.shutdown().await.unwrap();

        assert!(backend.blamer.is_empty());
        assert_eq!(fx.watches.active_total(), 0);
    }
}
