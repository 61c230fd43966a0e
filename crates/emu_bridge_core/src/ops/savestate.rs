use std::path::PathBuf;

use serde_json::{json, Value};

use super::{action, required_action};
use crate::dispatch::Context;
use crate::emulator::StateTarget;
use crate::events::{self, payload};
use crate::registry::{CommandSpec, ParamSpec, Registry};
use crate::validate::{ParamKind, Params};
use crate::{BridgeError, Result};

const MAX_SLOT: i64 = 999;

pub(super) fn register(registry: &Registry) {
    registry.register(
        CommandSpec::new("SAVESTATE", "Save state to a slot or a file path", save)
            .param(ParamSpec::optional("slot", ParamKind::Int, "Slot number"))
            .param(ParamSpec::optional("path", ParamKind::Text, "Target file; overrides slot"))
            .example(json!({"type": "SAVESTATE", "slot": "1"})),
    );

    registry.register(
        CommandSpec::new("LOADSTATE", "Load state from a slot or a file path", load)
            .param(ParamSpec::optional("slot", ParamKind::Int, "Slot number"))
            .param(ParamSpec::optional("path", ParamKind::Text, "Source file; overrides slot"))
            .example(json!({"type": "LOADSTATE", "path": "/tmp/checkpoint.mss"})),
    );

    registry.register(
        CommandSpec::new(
            "SAVESTATE_LABEL",
            "Set, get or clear the label stored next to a slot's state file",
            label,
        )
        .param(required_action(&["set", "get", "clear"], "set, get or clear"))
        .param(ParamSpec::required("slot", ParamKind::Int, "Slot number"))
        .param(ParamSpec::optional("label", ParamKind::Text, "Label for action=set"))
        .example(json!({"type": "SAVESTATE_LABEL", "action": "set", "slot": "1", "label": "boss room"})),
    );

    registry.register(
        CommandSpec::new(
            "SAVESTATE_SYNC",
            "Watch a state file and reload it whenever it changes on disk",
            |ctx, p| {
                let path = p.text("path")?.trim();
                if path.is_empty() {
                    return Err(BridgeError::invalid("path", "must not be empty"));
                }
                Ok(serde_json::to_value(ctx.bridge.sync().arm(path))?)
            },
        )
        .param(ParamSpec::required("path", ParamKind::Text, "State file to watch"))
        .example(json!({"type": "SAVESTATE_SYNC", "path": "/tmp/editor-export.mss"})),
    );

    registry.register(
        CommandSpec::new(
            "SAVESTATE_WATCH",
            "Report or stop the savestate sync watcher",
            |ctx, p| {
                let sync = ctx.bridge.sync();
                let stopped = p.choice("action", "status") == "stop" && sync.disarm();
                let mut status = serde_json::to_value(sync.status())?;
                status["stopped"] = json!(stopped);
                Ok(status)
            },
        )
        .param(action(&["status", "stop"], "status (default) or stop")),
    );
}

fn target(params: &Params) -> Result<StateTarget> {
    if let Some(path) = params.opt_text("path").map(str::trim).filter(|p| !p.is_empty()) {
        return Ok(StateTarget::Path(PathBuf::from(path)));
    }
    match params.opt_int_in("slot", 0, MAX_SLOT)? {
        Some(slot) => Ok(StateTarget::Slot(slot as u32)),
        None => Err(BridgeError::MissingParameter("slot".into())),
    }
}

fn save(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    ctx.bridge.require_running()?;
    let target = target(params)?;
    let path = ctx.core().save_state(&target)?;
    let frame = ctx.core().run_state().frame;
    ctx.bridge.state_history().record_save(&path);
    ctx.bridge.bus().publish(
        events::STATE_SAVED,
        payload(json!({ "path": path.display().to_string(), "frame": frame })),
    );
    Ok(json!({ "path": path.display().to_string(), "frame": frame }))
}

fn load(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    ctx.bridge.require_running()?;
    let target = target(params)?;
    let path = match &target {
        StateTarget::Slot(slot) => ctx.core().state_path(*slot),
        StateTarget::Path(path) => path.clone(),
    };
    ctx.core().load_state(&target)?;
    let frame = ctx.core().run_state().frame;
    ctx.bridge.state_history().record_load(&path);
    ctx.bridge.bus().publish(
        events::STATE_LOADED,
        payload(json!({
            "path": path.display().to_string(),
            "frame": frame,
            "source": "command",
        })),
    );
    Ok(json!({ "path": path.display().to_string(), "frame": frame }))
}

fn label(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let slot = params.int_in("slot", 0, MAX_SLOT)?;
    let state_path = ctx.core().state_path(slot as u32);
    let labels = ctx.bridge.labels();
    let label = match params.text("action")? {
        "set" => labels.set(&state_path, params.text("label")?)?,
        "clear" => {
            labels.clear(&state_path)?;
            None
        }
        _ => labels.get(&state_path)?,
    };
    Ok(json!({ "slot": slot, "label": label }))
}
