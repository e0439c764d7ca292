//! Built-in hub commands.

use chrono::Utc;
use pixelhub_protocol::{ClientRole, CommandArgs, CommandResponse};
use serde_json::json;

use super::dispatch::{CommandContext, CommandTable, HandlerError};

pub const SERVER_NAME: &str = "Pixel Server";

/// Register the commands every hub starts with.
pub fn load_builtin_commands(table: &CommandTable) {
    table.register_fn("status", "Show hub status", status);
    table.register_fn("ping", "Check the connection", ping);
    table.register_fn("help", "List available commands", help);
    table.register_fn("server:info", "Show server information", server_info);
    table.register_fn("logs", "Show recent log entries", logs);
    table.register_fn("logs:clear", "Clear the log buffer", logs_clear);
}

fn status(ctx: &mut CommandContext<'_>, _args: CommandArgs) -> Result<(), HandlerError> {
    let registry = ctx.hub.registry;
    ctx.reply(CommandResponse::ok_with(
        "Status retrieved",
        json!({
            "connectedClients": registry.len(),
            "nodes": registry.count_by_role(ClientRole::Engine),
            "consoles": registry.count_by_role(ClientRole::Console),
            "serverTime": Utc::now(),
        }),
    ));
    Ok(())
}

fn ping(ctx: &mut CommandContext<'_>, _args: CommandArgs) -> Result<(), HandlerError> {
    ctx.reply(CommandResponse::ok_with(
        "pong",
        json!({ "timestamp": Utc::now().timestamp_millis() }),
    ));
    Ok(())
}

fn help(ctx: &mut CommandContext<'_>, _args: CommandArgs) -> Result<(), HandlerError> {
    let described = ctx.hub.commands.describe();
    let commands: Vec<&str> = described.iter().map(|(name, _)| name.as_str()).collect();
    let description: serde_json::Map<String, serde_json::Value> = described
        .iter()
        .filter(|(_, text)| !text.is_empty())
        .map(|(name, text)| (name.clone(), json!(text)))
        .collect();

    ctx.reply(CommandResponse::ok_with(
        "Available commands",
        json!({ "commands": commands, "description": description }),
    ));
    Ok(())
}

fn server_info(ctx: &mut CommandContext<'_>, _args: CommandArgs) -> Result<(), HandlerError> {
    ctx.reply(CommandResponse::ok_with(
        "Server information",
        json!({
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime": ctx.hub.uptime.as_secs_f64(),
        }),
    ));
    Ok(())
}

fn logs(ctx: &mut CommandContext<'_>, args: CommandArgs) -> Result<(), HandlerError> {
    let CommandArgs::Logs { limit, kind } = args else {
        return Err(HandlerError::InvalidArgs(
            "logs expects `limit` and `kind` arguments".to_string(),
        ));
    };

    let entries = ctx.hub.logs.tail(limit, kind);
    ctx.reply(CommandResponse::ok_with(
        format!("{} log entries", entries.len()),
        json!({ "logs": entries }),
    ));
    Ok(())
}

fn logs_clear(ctx: &mut CommandContext<'_>, _args: CommandArgs) -> Result<(), HandlerError> {
    let removed = ctx.hub.logs.clear();
    ctx.reply(CommandResponse::ok_with(
        "Logs cleared",
        json!({ "removed": removed }),
    ));
    Ok(())
}
