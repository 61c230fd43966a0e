use serde_json::{json, Value};

use super::{action, hex, required_action};
use crate::dispatch::Context;
use crate::registry::{CommandSpec, ParamSpec, Registry};
use crate::state_diff::sample_state;
use crate::triggers::Condition;
use crate::validate::{ParamKind, Params};
use crate::{BridgeError, Result};

const MAX_WATCH_SIZE: i64 = 0x10000;
const MAX_PTRACE_DEPTH: i64 = 100_000;
const DEFAULT_PLOG_COUNT: i64 = 50;

pub(super) fn register(registry: &Registry) {
    registry.register(
        CommandSpec::new(
            "MEM_WATCH_WRITES",
            "Record who writes to an address range without stopping execution",
            mem_watch,
        )
        .param(required_action(&["add", "list", "remove", "clear"], "add, list, remove or clear"))
        .param(ParamSpec::optional("addr", ParamKind::HexAddr, "Start of range for add"))
        .param(ParamSpec::optional("size", ParamKind::Int, "Bytes covered (default 1)"))
        .param(ParamSpec::optional("depth", ParamKind::Int, "Writes kept per watch"))
        .param(ParamSpec::optional("watch_id", ParamKind::Int, "Watch for remove"))
        .example(json!({"type": "MEM_WATCH_WRITES", "action": "add", "addr": "0x7E0020", "size": "2", "depth": "50"})),
    );

    registry.register(
        CommandSpec::new(
            "MEM_BLAME",
            "Recorded writes for a watch, newest first",
            mem_blame,
        )
        .param(ParamSpec::optional("addr", ParamKind::HexAddr, "Any address inside a watched range"))
        .param(ParamSpec::optional("watch_id", ParamKind::Int, "Watch id; wins over addr"))
        .param(ParamSpec::optional("count", ParamKind::Int, "Limit on writes returned"))
        .example(json!({"type": "MEM_BLAME", "addr": "0x7E0020"})),
    );

    registry.register(
        CommandSpec::new(
            "P_WATCH",
            "Start, stop or inspect the status register change tracer",
            p_watch,
        )
        .param(action(&["start", "stop", "status"], "start, stop or status (default)"))
        .param(ParamSpec::optional("depth", ParamKind::Int, "Ring size for start"))
        .example(json!({"type": "P_WATCH", "action": "start", "depth": "500"})),
    );

    registry.register(
        CommandSpec::new("P_LOG", "Recent status register changes, newest last", |ctx, p| {
            let count = p
                .opt_int_in("count", 1, MAX_PTRACE_DEPTH)?
                .unwrap_or(DEFAULT_PLOG_COUNT) as usize;
            let (total, entries) = ctx.bridge.ptrace().log(count);
            Ok(json!({
                "total": total,
                "entries": entries.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
            }))
        })
        .param(ParamSpec::optional("count", ParamKind::Int, "Entries to return (default 50)"))
        .example(json!({"type": "P_LOG", "count": "20"})),
    );

    registry.register(
        CommandSpec::new(
            "WATCH_TRIGGER",
            "Conditions over memory, polled with check or evaluated on every write",
            watch_trigger,
        )
        .param(required_action(
            &["add", "list", "check", "remove", "enable", "disable"],
            "add, list, check, remove, enable or disable",
        ))
        .param(ParamSpec::optional("addr", ParamKind::HexAddr, "Address compared"))
        .param(ParamSpec::optional("value", ParamKind::Int, "Value compared against"))
        .param(ParamSpec::optional(
            "condition",
            ParamKind::Enum(Condition::TOKENS),
            "Comparison applied as memory <condition> value",
        ))
        .param(ParamSpec::optional("width", ParamKind::Int, "Bytes compared, 1 (default) or 2"))
        .param(ParamSpec::optional("trigger_id", ParamKind::Int, "Trigger for remove, enable, disable"))
        .example(json!({"type": "WATCH_TRIGGER", "action": "add", "addr": "0x7E0020", "value": "0", "condition": "eq"})),
    );

    registry.register(
        CommandSpec::new(
            "STATE_DIFF",
            "Fields changed since the previous call; the first call returns everything",
            |ctx, p| {
                let cache = ctx.bridge.diff_cache();
                if p.flag("reset") {
                    cache.reset();
                }
                Ok(cache.diff(sample_state(ctx.core())))
            },
        )
        .param(ParamSpec::optional("reset", ParamKind::Bool, "Drop the cached sample first")),
    );
}

fn id_param(params: &Params, name: &str) -> Result<u32> {
    Ok(params.int_in(name, 0, i64::from(u32::MAX))? as u32)
}

fn mem_watch(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let watches = ctx.bridge.watches();
    match params.text("action")? {
        "add" => {
            let addr = params.addr("addr")?;
            let size = params.opt_int_in("size", 1, MAX_WATCH_SIZE)?.unwrap_or(1) as u32;
            let depth = match params.opt_int_in("depth", 1, i64::MAX)? {
                Some(depth) => usize::try_from(depth).unwrap_or(usize::MAX),
                None => ctx.bridge.config().default_watch_depth,
            };
            let summary = watches.add(addr, size, depth)?;
            Ok(json!({
                "watch_id": summary.watch_id,
                "addr": summary.addr,
                "size": summary.size,
                "depth": summary.depth,
            }))
        }
        "remove" => {
            let id = id_param(params, "watch_id")?;
            watches.remove(id)?;
            Ok(json!({ "removed": id }))
        }
        "clear" => Ok(json!({ "removed": watches.clear() })),
        _ => Ok(json!({ "watches": watches.list() })),
    }
}

fn mem_blame(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let watches = ctx.bridge.watches();
    let id = if params.contains("watch_id") {
        id_param(params, "watch_id")?
    } else {
        let addr = params.addr("addr")?;
        watches
            .find_by_addr(addr)
            .ok_or_else(|| BridgeError::not_found("watch", hex(addr)))?
    };
    let limit = params
        .opt_int_in("count", 1, i64::MAX)?
        .map_or(usize::MAX, |c| usize::try_from(c).unwrap_or(usize::MAX));

    let (summary, writes) = watches.blame(id)?;
    Ok(json!({
        "watch_id": summary.watch_id,
        "addr": summary.addr,
        "size": summary.size,
        "log_count": summary.log_count,
        "writes": writes.iter().take(limit).map(|w| w.to_json()).collect::<Vec<_>>(),
    }))
}

fn p_watch(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let tracer = ctx.bridge.ptrace();
    let status = match params.choice("action", "status") {
        "start" => {
            let depth = params
                .opt_int_in("depth", 1, MAX_PTRACE_DEPTH)?
                .map_or(ctx.bridge.config().default_ptrace_depth, |d| d as usize);
            tracer.start(depth)
        }
        "stop" => tracer.stop(),
        _ => tracer.status(),
    };
    Ok(serde_json::to_value(status)?)
}

fn watch_trigger(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let table = ctx.bridge.triggers();
    match params.text("action")? {
        "add" => {
            let addr = params.addr("addr")?;
            let value = params.int_in("value", 0, 0xFFFF)? as u32;
            let condition = Condition::parse(params.text("condition")?)?;
            let width = params.opt_int_in("width", 1, 2)?.unwrap_or(1) as u8;
            Ok(table.add(addr, value, condition, width)?.to_json())
        }
        "check" => {
            ctx.bridge.require_running()?;
            let core = ctx.core();
            let frame = core.run_state().frame;
            let fired = table.check(frame, |a| core.read_byte(a));
            Ok(json!({
                "checked": table.enabled_count(),
                "triggered": fired.iter().map(|f| f.to_json()).collect::<Vec<_>>(),
            }))
        }
        "remove" => {
            let id = id_param(params, "trigger_id")?;
            table.remove(id)?;
            Ok(json!({ "removed": id }))
        }
        "enable" | "disable" => {
            let enabled = params.text("action")? == "enable";
            Ok(table
                .set_enabled(id_param(params, "trigger_id")?, enabled)?
                .to_json())
        }
        _ => Ok(json!({
            "triggers": table.list().iter().map(|t| t.to_json()).collect::<Vec<_>>(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::test_support::harness;
    use crate::events::Subscriptions;
    use crate::{Command, EmulatorCore, ErrorCode};
    use serde_json::{json, Value};

    fn send(h: &crate::bridge::test_support::Harness, line: Value) -> crate::Response {
        h.bridge.dispatch_line(&line.to_string(), None)
    }

    #[test]
    fn test_watch_then_write_then_blame_then_remove() {
        let h = harness();
        let added = send(
            &h,
            json!({"type": "MEM_WATCH_WRITES", "action": "add", "addr": "0x7E0100", "size": "2"}),
        )
        .data
        .unwrap();
        let id = added["watch_id"].as_u64().unwrap();
        assert_eq!(added["depth"], 100);

        send(&h, json!({"type": "WRITE", "addr": "0x7E0101", "value": "0x55"}));

        let blame = send(&h, json!({"type": "MEM_BLAME", "addr": "0x7E0100"}))
            .data
            .unwrap();
        assert_eq!(blame["watch_id"], id);
        assert_eq!(blame["writes"][0]["value"], 0x55);
        assert_eq!(blame["writes"][0]["pc"], "008000");

        let list = send(&h, json!({"type": "MEM_WATCH_WRITES", "action": "list"}))
            .data
            .unwrap();
        assert_eq!(list["watches"][0]["log_count"], 1);

        let removed = send(
            &h,
            json!({"type": "MEM_WATCH_WRITES", "action": "remove", "watch_id": id.to_string()}),
        );
        assert!(removed.success);

        let by_id = send(&h, json!({"type": "MEM_BLAME", "watch_id": id.to_string()}));
        assert_eq!(by_id.error_code(), Some(ErrorCode::InvalidParameterValue));
        let by_addr = send(&h, json!({"type": "MEM_BLAME", "addr": "0x7E0100"}));
        assert_eq!(by_addr.error_code(), Some(ErrorCode::InvalidParameterValue));
    }

    #[test]
    fn test_watch_param_errors() {
        let h = harness();
        let resp = send(&h, json!({"type": "MEM_WATCH_WRITES", "action": "add"}));
        assert_eq!(resp.error_code(), Some(ErrorCode::MissingParameter));
        let resp = send(&h, json!({"type": "MEM_WATCH_WRITES", "action": "remove", "watch_id": "999"}));
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
        let resp = send(&h, json!({"type": "MEM_BLAME"}));
        assert_eq!(resp.error_code(), Some(ErrorCode::MissingParameter));
    }

    #[test]
    fn test_blame_during_execution_is_newest_first() {
        let h = harness();
        send(
            &h,
            json!({"type": "MEM_WATCH_WRITES", "action": "add", "addr": "0x7E0020", "depth": "3"}),
        );
        h.core.run_frames(1).unwrap();
        let blame = send(&h, json!({"type": "MEM_BLAME", "addr": "0x7E0020"}))
            .data
            .unwrap();
        let writes = blame["writes"].as_array().unwrap();
        assert_eq!(writes.len(), 3);
        let values: Vec<u64> = writes.iter().map(|w| w["value"].as_u64().unwrap()).collect();
        assert!(values[0] > values[1] && values[1] > values[2]);
        assert_eq!(writes[0]["pc"], "008005");
    }

    #[test]
    fn test_p_watch_and_log() {
        let h = harness();
        let status = send(&h, json!({"type": "P_WATCH", "action": "start", "depth": "4"}))
            .data
            .unwrap();
        assert_eq!(status["enabled"], true);
        assert_eq!(status["depth"], 4);

        h.core.run_frames(1).unwrap();
        let log = send(&h, json!({"type": "P_LOG", "count": "2"})).data.unwrap();
        assert!(log["total"].as_u64().unwrap() > 4);
        let entries = log["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e["flags_changed"].as_str().unwrap().is_empty()));

        let restarted = send(&h, json!({"type": "P_WATCH", "action": "start"}))
            .data
            .unwrap();
        assert_eq!(restarted["total"], 0);
        assert_eq!(restarted["depth"], 1000);

        let stopped = send(&h, json!({"type": "P_WATCH", "action": "stop"})).data.unwrap();
        assert_eq!(stopped["enabled"], false);
    }

    #[test]
    fn test_watch_trigger_add_and_list() {
        let h = harness();
        let added = send(
            &h,
            json!({"type": "WATCH_TRIGGER", "action": "add", "addr": "0x7E0020", "value": "0", "condition": "eq"}),
        );
        assert!(added.success);
        let id = added.data.unwrap()["id"].as_u64().unwrap();

        let list = send(&h, json!({"type": "WATCH_TRIGGER", "action": "list"}))
            .data
            .unwrap();
        let entry = &list["triggers"][0];
        assert_eq!(entry["id"], id);
        assert_eq!(entry["addr"], 0x7E0020);
        assert_eq!(entry["addr"], 8257568);
        assert_eq!(entry["condition"], "eq");
    }

    #[test]
    fn test_watch_trigger_check_and_hook_agree() {
        let h = harness();
        let session = h.bridge.bus().open_session();
        session.set_subscriptions(Subscriptions::parse("watch_trigger").unwrap());

        send(
            &h,
            json!({"type": "WATCH_TRIGGER", "action": "add", "addr": "0x7E0020", "value": "3", "condition": "ge"}),
        );
        let check = send(&h, json!({"type": "WATCH_TRIGGER", "action": "check"}))
            .data
            .unwrap();
        assert_eq!(check["triggered"], json!([]));

        h.core.step(2 + 5 * 3).unwrap();
        assert_eq!(h.core.read_byte(0x7E0020).unwrap(), 3);
        assert_eq!(session.queue().len(), 1);

        let check = send(&h, json!({"type": "WATCH_TRIGGER", "action": "check"}))
            .data
            .unwrap();
        assert_eq!(check["triggered"][0]["current"], 3);

        let list = send(&h, json!({"type": "WATCH_TRIGGER", "action": "list"}))
            .data
            .unwrap();
        assert_eq!(list["triggers"][0]["enabled"], true);
        assert_eq!(list["triggers"][0]["fireCount"], 2);
    }

    #[test]
    fn test_watch_trigger_id_errors() {
        let h = harness();
        for action in ["remove", "enable", "disable"] {
            let resp = send(&h, json!({"type": "WATCH_TRIGGER", "action": action}));
            assert_eq!(resp.error_code(), Some(ErrorCode::MissingParameter), "{action}");
            let resp = send(
                &h,
                json!({"type": "WATCH_TRIGGER", "action": action, "trigger_id": "77"}),
            );
            assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue), "{action}");
        }
        let resp = send(
            &h,
            json!({"type": "WATCH_TRIGGER", "action": "add", "addr": "0x10", "value": "1", "condition": "=="}),
        );
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
    }

    #[test]
    fn test_state_diff_first_then_changes() {
        let h = harness();
        h.core.pause();
        let first = send(&h, json!({"type": "STATE_DIFF"})).data.unwrap();
        assert_eq!(first["firstCall"], true);
        assert_eq!(first["frame"], 0);

        let second = send(&h, json!({"type": "STATE_DIFF"})).data.unwrap();
        assert_eq!(second["firstCall"], false);
        assert_eq!(second["changes"], json!({}));

        h.bridge.dispatch(&Command::new("FRAME"), None);
        let third = send(&h, json!({"type": "STATE_DIFF"})).data.unwrap();
        assert_eq!(third["changes"]["frame"], 1);
        assert!(third["changes"].get("paused").is_none());
        assert!(third["changes"].get("console").is_none());

        let reset = send(&h, json!({"type": "STATE_DIFF", "reset": "true"}))
            .data
            .unwrap();
        assert_eq!(reset["firstCall"], true);
    }
}
