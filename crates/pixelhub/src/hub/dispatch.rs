//! Command dispatch table.
//!
//! Maps command names to handlers. Handlers are synchronous: they inspect hub
//! state through a [`HubView`] and queue replies on the [`CommandContext`];
//! the relay delivers those replies to the calling connection afterwards.
//! A handler error or panic is contained here and turned into a `500`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, error, warn};
use pixelhub_protocol::{CommandArgs, CommandResponse, codes};
use serde_json::{Map, Value};
use thiserror::Error;

use super::registry::{Connection, ConnectionRegistry};
use crate::logstore::LogStore;

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn code(&self) -> u16 {
        match self {
            HandlerError::InvalidArgs(_) => codes::BAD_REQUEST,
            HandlerError::Failed(_) => codes::INTERNAL,
        }
    }
}

/// Read access to hub state for handlers.
#[derive(Clone, Copy)]
pub struct HubView<'a> {
    pub registry: &'a ConnectionRegistry,
    pub commands: &'a CommandTable,
    pub logs: &'a LogStore,
    pub uptime: Duration,
}

/// Per-invocation context handed to a handler.
pub struct CommandContext<'a> {
    pub connection: &'a Connection,
    pub hub: HubView<'a>,
    replies: Vec<CommandResponse>,
}

impl<'a> CommandContext<'a> {
    pub fn new(connection: &'a Connection, hub: HubView<'a>) -> Self {
        Self {
            connection,
            hub,
            replies: Vec::new(),
        }
    }

    /// Queue a `command:response` for the caller.
    pub fn reply(&mut self, response: CommandResponse) {
        self.replies.push(response);
    }

    pub fn into_replies(self) -> Vec<CommandResponse> {
        self.replies
    }
}

pub trait CommandHandler: Send + Sync {
    fn handle(&self, ctx: &mut CommandContext<'_>, args: CommandArgs) -> Result<(), HandlerError>;

    /// One-line description shown by `help`.
    fn description(&self) -> &str {
        ""
    }
}

/// Adapter turning a closure into a [`CommandHandler`].
pub struct FnHandler<F> {
    description: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&mut CommandContext<'_>, CommandArgs) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            description: description.into(),
            f,
        }
    }
}

impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&mut CommandContext<'_>, CommandArgs) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, ctx: &mut CommandContext<'_>, args: CommandArgs) -> Result<(), HandlerError> {
        (self.f)(ctx, args)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Command name to handler table. Last registration for a name wins.
#[derive(Default)]
pub struct CommandTable {
    handlers: DashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let name = name.into();
        if name.trim().is_empty() {
            warn!("Ignoring command registration with an empty name");
            return;
        }
        if self.handlers.insert(name.clone(), handler).is_some() {
            debug!("Replaced handler for command '{}'", name);
        } else {
            debug!("Registered command '{}'", name);
        }
    }

    pub fn register_fn<F>(&self, name: impl Into<String>, description: impl Into<String>, f: F)
    where
        F: Fn(&mut CommandContext<'_>, CommandArgs) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(FnHandler::new(description, f)));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .handlers
            .iter()
            .map(|e| (e.key().clone(), e.value().description().to_string()))
            .collect();
        entries.sort();
        entries
    }

    /// Run `name` for `connection` and return the replies to deliver.
    ///
    /// Unknown commands produce a single `404` naming the command.
    pub fn execute(
        &self,
        view: HubView<'_>,
        connection: &Connection,
        name: &str,
        args: Map<String, Value>,
    ) -> Vec<CommandResponse> {
        // Clone the handler out so no shard guard is held while it runs.
        let Some(handler) = self.handlers.get(name).map(|h| Arc::clone(h.value())) else {
            debug!("Unknown command '{}' from {}", name, connection.id);
            return vec![CommandResponse::error(
                codes::NOT_FOUND,
                format!("Unknown command: {name}"),
            )];
        };

        let args = match CommandArgs::decode(name, args) {
            Ok(args) => args,
            Err(e) => return vec![CommandResponse::error(codes::BAD_REQUEST, e.to_string())],
        };

        let mut ctx = CommandContext::new(connection, view);
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&mut ctx, args)));

        match outcome {
            Ok(Ok(())) => ctx.into_replies(),
            Ok(Err(e)) => {
                warn!("Command '{}' from {} failed: {}", name, connection.id, e);
                vec![CommandResponse::error(e.code(), e.to_string())]
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "Command '{}' from {} panicked: {}",
                    name, connection.id, detail
                );
                vec![CommandResponse::error(
                    codes::INTERNAL,
                    format!("Command '{name}' failed"),
                )]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelhub_protocol::ClientRole;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: ConnectionRegistry,
        logs: LogStore,
        table: CommandTable,
        conn: Connection,
        _rx: mpsc::Receiver<crate::hub::Outbound>,
    }

    impl Fixture {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(8);
            Self {
                registry: ConnectionRegistry::default(),
                logs: LogStore::new(16),
                table: CommandTable::new(),
                conn: Connection::new("console-1".into(), ClientRole::Console, None, tx),
                _rx: rx,
            }
        }

        fn run(&self, name: &str, args: Value) -> Vec<CommandResponse> {
            let view = HubView {
                registry: &self.registry,
                commands: &self.table,
                logs: &self.logs,
                uptime: Duration::from_secs(1),
            };
            let Value::Object(args) = args else {
                panic!("args must be an object")
            };
            self.table.execute(view, &self.conn, name, args)
        }
    }

    #[test]
    fn test_unknown_command_is_404() {
        let fx = Fixture::new();
        let replies = fx.run("frobnicate", json!({}));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, codes::NOT_FOUND);
        assert!(replies[0].message.contains("frobnicate"));
    }

    #[test]
    fn test_register_and_execute() {
        let fx = Fixture::new();
        fx.table.register_fn("echo", "Echo args", |ctx, args| {
            let CommandArgs::Opaque(map) = args else {
                return Err(HandlerError::InvalidArgs("expected map".into()));
            };
            ctx.reply(CommandResponse::ok_with("echo", Value::Object(map)));
            Ok(())
        });

        let replies = fx.run("echo", json!({ "x": 1 }));
        assert_eq!(replies, vec![CommandResponse::ok_with("echo", json!({ "x": 1 }))]);
    }

    #[test]
    fn test_last_registration_wins() {
        let fx = Fixture::new();
        fx.table.register_fn("dup", "", |ctx, _| {
            ctx.reply(CommandResponse::ok("first"));
            Ok(())
        });
        fx.table.register_fn("dup", "", |ctx, _| {
            ctx.reply(CommandResponse::ok("second"));
            Ok(())
        });

        assert_eq!(fx.table.len(), 1);
        assert_eq!(fx.run("dup", json!({}))[0].message, "second");
    }

    #[test]
    fn test_empty_name_ignored() {
        let fx = Fixture::new();
        fx.table.register_fn("", "", |_, _| Ok(()));
        assert!(fx.table.is_empty());
    }

    #[test]
    fn test_unregister_has_clear_names() {
        let fx = Fixture::new();
        fx.table.register_fn("b", "", |_, _| Ok(()));
        fx.table.register_fn("a", "", |_, _| Ok(()));
        assert_eq!(fx.table.names(), vec!["a", "b"]);
        assert!(fx.table.has("a"));

        assert!(fx.table.unregister("a"));
        assert!(!fx.table.unregister("a"));
        assert!(!fx.table.has("a"));

        fx.table.clear();
        assert!(fx.table.names().is_empty());
    }

    #[test]
    fn test_handler_error_is_reported() {
        let fx = Fixture::new();
        fx.table
            .register_fn("broken", "", |_, _| Err(HandlerError::Failed("disk on fire".into())));

        let replies = fx.run("broken", json!({}));
        assert_eq!(replies[0].code, codes::INTERNAL);
        assert_eq!(replies[0].message, "disk on fire");
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let fx = Fixture::new();
        fx.table.register_fn("explode", "", |_, _| panic!("boom"));

        let replies = fx.run("explode", json!({}));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, codes::INTERNAL);

        // Table still usable afterwards.
        fx.table.register_fn("ok", "", |ctx, _| {
            ctx.reply(CommandResponse::ok("fine"));
            Ok(())
        });
        assert!(fx.run("ok", json!({}))[0].is_success());
    }

    #[test]
    fn test_invalid_typed_args_are_400() {
        let fx = Fixture::new();
        fx.table.register_fn("logs", "", |_, _| Ok(()));
        let replies = fx.run("logs", json!({ "limit": "lots" }));
        assert_eq!(replies[0].code, codes::BAD_REQUEST);
    }
}
