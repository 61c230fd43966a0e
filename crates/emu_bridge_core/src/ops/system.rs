use serde_json::{json, Value};

use super::{action, FEATURES};
use crate::bridge::PROTOCOL_VERSION;
use crate::dispatch::Context;
use crate::logging::LEVELS;
use crate::registry::{CommandSpec, ParamSpec, Registry};
use crate::validate::{ParamKind, Params};
use crate::{BridgeError, Result};

const DEFAULT_HISTORY_COUNT: i64 = 20;

pub(super) fn register(registry: &Registry) {
    registry.register(
        CommandSpec::new("PING", "Liveness check; answers PONG", |_, _| Ok(json!("PONG"))),
    );

    registry.register(CommandSpec::new(
        "STATE",
        "Run state: running, paused, frame, fps, console and last save/load",
        state,
    ));

    registry.register(CommandSpec::new(
        "HEALTH",
        "Run state plus diagnostics for agents, sync watcher, subscriptions and tracers",
        health,
    ));

    registry.register(CommandSpec::new(
        "CAPABILITIES",
        "Protocol version, registered command count and feature flags",
        |ctx, _| {
            Ok(json!({
                "version": PROTOCOL_VERSION,
                "commandCount": ctx.bridge.registry().len(),
                "features": FEATURES,
            }))
        },
    ));

    registry.register(
        CommandSpec::new(
            "HELP",
            "List every command, or describe one command's parameters",
            help,
        )
        .param(ParamSpec::optional("command", ParamKind::Text, "Command to describe"))
        .example(json!({"type": "HELP", "command": "MEM_BLAME"})),
    );

    registry.register(CommandSpec::new(
        "METRICS",
        "Totals, error rate and average latency over every dispatched command",
        |ctx, _| Ok(serde_json::to_value(ctx.bridge.metrics().snapshot())?),
    ));

    registry.register(
        CommandSpec::new(
            "COMMAND_HISTORY",
            "Most recent dispatched commands, oldest first",
            command_history,
        )
        .param(ParamSpec::optional(
            "count",
            ParamKind::Int,
            "Entries to return (default 20)",
        ))
        .example(json!({"type": "COMMAND_HISTORY", "count": "5"})),
    );

    registry.register(
        CommandSpec::new(
            "AGENT_REGISTER",
            "Announce a client agent; re-registering an id overwrites it",
            agent_register,
        )
        .param(ParamSpec::required("agentId", ParamKind::Text, "Stable agent id"))
        .param(ParamSpec::optional("agentName", ParamKind::Text, "Display name"))
        .param(ParamSpec::optional("version", ParamKind::Text, "Agent version"))
        .example(json!({"type": "AGENT_REGISTER", "agentId": "tracer-1", "agentName": "Tracer"})),
    );

    registry.register(
        CommandSpec::new(
            "BATCH",
            "Run sub-commands in order; each result is reported separately",
            batch,
        )
        .param(ParamSpec::required(
            "commands",
            ParamKind::Json,
            "JSON array of command objects",
        ))
        .example(json!({
            "type": "BATCH",
            "commands": r#"[{"type":"PING"},{"type":"READ","addr":"0x7E0020"}]"#,
        })),
    );

    registry.register(
        CommandSpec::new("LOG_LEVEL", "Get or set the live log level", log_level)
            .param(action(&["get", "set"], "get (default) or set"))
            .param(ParamSpec::optional(
                "level",
                ParamKind::Enum(LEVELS),
                "New level for action=set",
            ))
            .example(json!({"type": "LOG_LEVEL", "action": "set", "level": "debug"})),
    );
}

fn state(ctx: &Context<'_>, _: &Params) -> Result<Value> {
    let state = ctx.bridge.require_running()?;
    let activity = ctx.bridge.state_history().snapshot();
    Ok(json!({
        "running": state.running,
        "paused": state.paused,
        "frame": state.frame,
        "fps": state.fps,
        "consoleType": state.console,
        "lastSave": activity.last_save,
        "lastLoad": activity.last_load,
    }))
}

fn health(ctx: &Context<'_>, _: &Params) -> Result<Value> {
    let bridge = ctx.bridge;
    let state = bridge.core().run_state();
    let agents = bridge.agents().list();
    Ok(json!({
        "status": "ok",
        "running": state.running,
        "paused": state.paused,
        "frame": state.frame,
        "romHash": bridge.core().rom_hash(),
        "uptimeSec": bridge.uptime().as_secs(),
        "protocolVersion": PROTOCOL_VERSION,
        "diagnostics": {
            "registeredAgents": agents.len(),
            "agents": agents,
            "syncWatcher": bridge.sync().status(),
            "subscriptions": bridge.bus().subscription_count(),
            "connections": bridge.bus().session_count(),
            "eventsPublished": bridge.bus().published(),
            "eventsDropped": bridge.bus().dropped_total(),
            "memWatches": bridge.watches().len(),
            "triggers": bridge.triggers().len(),
            "pWatch": bridge.ptrace().status(),
            "logLevel": bridge.log_level().get(),
        },
    }))
}

fn help(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let registry = ctx.bridge.registry();
    match params.opt_text("command") {
        Some(name) => registry
            .get(name)
            .map(|spec| spec.help())
            .ok_or_else(|| BridgeError::invalid("command", format!("unknown command '{name}'"))),
        None => {
            let commands = registry.names();
            Ok(json!({
                "version": PROTOCOL_VERSION,
                "count": commands.len(),
                "commands": commands,
            }))
        }
    }
}

fn command_history(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let count = params
        .opt_int_in("count", 1, i64::from(u32::MAX))?
        .unwrap_or(DEFAULT_HISTORY_COUNT) as usize;
    let metrics = ctx.bridge.metrics();
    let entries = metrics.history(count);
    Ok(json!({
        "count": entries.len(),
        "capacity": metrics.history_capacity(),
        "entries": entries,
    }))
}

fn agent_register(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let agent_id = params.text("agentId")?.trim();
    if agent_id.is_empty() {
        return Err(BridgeError::invalid("agentId", "must not be empty"));
    }
    let registration = ctx.bridge.agents().register(
        agent_id,
        params.opt_text("agentName"),
        params.opt_text("version"),
    );
    ctx.bridge.refresh_discovery();

    let mut data = serde_json::to_value(&registration)?;
    data["registered"] = json!(true);
    Ok(data)
}

fn batch(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    if ctx.in_batch {
        return Err(BridgeError::invalid("commands", "BATCH cannot be nested"));
    }
    let Value::Array(commands) = params.json("commands")? else {
        return Err(BridgeError::invalid("commands", "expected a JSON array"));
    };

    let results = commands
        .iter()
        .cloned()
        .map(|command| {
            let response = ctx.bridge.dispatch_value(command, ctx.session);
            serde_json::to_value(response)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(json!({
        "count": results.len(),
        "results": results,
    }))
}

fn log_level(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let control = ctx.bridge.log_level();
    match params.choice("action", "get") {
        "set" => {
            let level = params.text("level")?;
            Ok(json!({ "level": control.set(level)? }))
        }
        _ => Ok(json!({ "level": control.get() })),
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::test_support::harness;
    use crate::registry::CommandSpec;
    use crate::{Command, ErrorCode};
    use serde_json::{json, Value};

    fn send(h: &crate::bridge::test_support::Harness, line: Value) -> crate::Response {
        h.bridge.dispatch_line(&line.to_string(), None)
    }

    #[test]
    fn test_ping_pong_line() {
        let h = harness();
        let resp = h.bridge.dispatch_line(r#"{"type":"PING"}"#, None);
        assert_eq!(resp.to_line(), r#"{"success":true,"data":"PONG"}"#);
    }

    #[test]
    fn test_state_fields() {
        let h = harness();
        let data = send(&h, json!({"type": "STATE"})).data.unwrap();
        assert_eq!(data["running"], true);
        assert_eq!(data["consoleType"], "SNES");
        assert!(data["lastSave"].is_null());
    }

    #[test]
    fn test_help_lists_every_command_including_late_ones() {
        let h = harness();
        let before = send(&h, json!({"type": "HELP"})).data.unwrap();
        assert_eq!(
            before["count"].as_u64().unwrap() as usize,
            h.bridge.registry().len()
        );

        h.bridge.register(CommandSpec::new("LATE", "Registered after startup", |_, _| {
            Ok(json!(null))
        }));
        let after = send(&h, json!({"type": "HELP"})).data.unwrap();
        let names: Vec<&str> = after["commands"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(names.contains(&"LATE"));
        for name in h.bridge.registry().names() {
            assert!(names.contains(&name.as_str()), "{name} missing from HELP");
        }
        assert_eq!(after["count"], before["count"].as_u64().unwrap() + 1);
    }

    #[test]
    fn test_help_for_one_command_and_unknown() {
        let h = harness();
        let data = send(&h, json!({"type": "HELP", "command": "WATCH_TRIGGER"}))
            .data
            .unwrap();
        let params = data["params"].as_array().unwrap();
        let condition = params.iter().find(|p| p["name"] == "condition").unwrap();
        assert_eq!(condition["choices"], json!(["eq", "ne", "gt", "lt", "ge", "le"]));
        assert_eq!(data["example"]["type"], "WATCH_TRIGGER");

        let resp = send(&h, json!({"type": "HELP", "command": "NOPE"}));
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
    }

    #[test]
    fn test_capabilities_reports_registry_size() {
        let h = harness();
        let data = send(&h, json!({"type": "CAPABILITIES"})).data.unwrap();
        assert_eq!(data["version"], "1.0");
        assert_eq!(data["commandCount"].as_u64().unwrap() as usize, h.bridge.registry().len());
        let features = data["features"].as_array().unwrap();
        for flag in ["error_codes", "batch", "events"] {
            assert!(features.contains(&json!(flag)));
        }
    }

    #[test]
    fn test_every_required_param_is_enforced() {
        let h = harness();
        for name in h.bridge.registry().names() {
            let spec = h.bridge.registry().get(&name).unwrap();
            if spec.params.iter().any(|p| p.required) {
                let resp = h.bridge.dispatch(&Command::new(name.as_str()), None);
                assert!(!resp.success, "{name}");
                assert_eq!(resp.error_code(), Some(ErrorCode::MissingParameter), "{name}");
            }
        }
    }

    #[test]
    fn test_metrics_and_history_track_failures() {
        let h = harness();
        send(&h, json!({"type": "PING"}));
        send(&h, json!({"type": "READ"}));
        send(&h, json!({"type": "NOPE"}));

        let metrics = send(&h, json!({"type": "METRICS"})).data.unwrap();
        assert_eq!(metrics["totalCommands"], 3);
        assert_eq!(metrics["errorCount"], 2);

        let history = send(&h, json!({"type": "COMMAND_HISTORY", "count": 3}))
            .data
            .unwrap();
        let entries = history["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["command"], "READ");
        assert_eq!(entries[0]["errorCode"], 2);
        assert_eq!(entries[1]["errorCode"], 4);
        assert_eq!(entries[2]["command"], "METRICS");
        assert_eq!(entries[2]["success"], true);
    }

    #[test]
    fn test_agent_register_shows_in_health_and_discovery() {
        let h = harness();
        h.bridge.init().unwrap();
        let data = send(
            &h,
            json!({"type": "AGENT_REGISTER", "agentId": "bot", "agentName": "Bot", "version": "2"}),
        )
        .data
        .unwrap();
        assert_eq!(data["registered"], true);
        assert_eq!(data["agentId"], "bot");

        let health = send(&h, json!({"type": "HEALTH"})).data.unwrap();
        assert_eq!(health["diagnostics"]["registeredAgents"], 1);
        assert_eq!(health["diagnostics"]["syncWatcher"]["watching"], false);
        assert_eq!(h.bridge.discovery().read().unwrap().registered_agents, 1);
    }

    #[test]
    fn test_batch_preserves_order_and_continues_after_failure() {
        let h = harness();
        let commands = json!([
            {"type": "PING"},
            {"type": "READ"},
            {"type": "NOPE"},
            {"addr": "0x10"},
            {"type": "BATCH", "commands": "[]"},
            {"type": "WRITE", "addr": "0x7E0100", "value": "7"},
            {"type": "READ", "addr": "0x7E0100"},
        ]);
        let resp = send(&h, json!({"type": "BATCH", "commands": commands}));
        assert!(resp.success);
        let results = resp.data.unwrap()["results"].as_array().unwrap().clone();
        assert_eq!(results.len(), 7);
        assert_eq!(results[0]["data"], "PONG");
        assert_eq!(results[1]["errorCode"], 2);
        assert_eq!(results[2]["errorCode"], 4);
        assert_eq!(results[3]["errorCode"], 2);
        assert_eq!(results[4]["errorCode"], 3);
        assert_eq!(results[5]["success"], true);
        assert_eq!(results[6]["data"], "0x07");

        // 7 members plus the batch itself
        assert_eq!(h.bridge.metrics().snapshot().total_commands, 8);
    }

    #[test]
    fn test_batch_rejects_non_array() {
        let h = harness();
        let resp = send(&h, json!({"type": "BATCH", "commands": "{\"type\":\"PING\"}"}));
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
        let resp = send(&h, json!({"type": "BATCH", "commands": "[oops"}));
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
    }

    #[test]
    fn test_log_level_get_set() {
        let h = harness();
        let data = send(&h, json!({"type": "LOG_LEVEL"})).data.unwrap();
        assert_eq!(data["level"], "info");
        let data = send(&h, json!({"type": "LOG_LEVEL", "action": "set", "level": "debug"}))
            .data
            .unwrap();
        assert_eq!(data["level"], "debug");
        let resp = send(&h, json!({"type": "LOG_LEVEL", "action": "set"}));
        assert_eq!(resp.error_code(), Some(ErrorCode::MissingParameter));
        let resp = send(&h, json!({"type": "LOG_LEVEL", "action": "set", "level": "loud"}));
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
    }
}
