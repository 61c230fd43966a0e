use serde_json::{json, Value};

use super::required_action;
use crate::dispatch::Context;
use crate::registry::{CommandSpec, ParamSpec, Registry};
use crate::validate::{ParamKind, Params};
use crate::Result;

const MAX_STEP: i64 = 100_000;
const MAX_FRAMES: i64 = 600;

pub(super) fn register(registry: &Registry) {
    registry.register(CommandSpec::new("PAUSE", "Pause emulation", |ctx, _| {
        ctx.bridge.require_running()?;
        ctx.core().pause();
        run_state(ctx)
    }));

    registry.register(CommandSpec::new("RESUME", "Resume emulation", |ctx, _| {
        ctx.bridge.require_running()?;
        ctx.core().resume();
        run_state(ctx)
    }));

    registry.register(CommandSpec::new("RESET", "Reset the CPU", |ctx, _| {
        ctx.bridge.require_running()?;
        ctx.core().reset()?;
        Ok(json!("OK"))
    }));

    registry.register(
        CommandSpec::new("STEP", "Execute instructions one at a time", step)
            .param(ParamSpec::optional(
                "count",
                ParamKind::Int,
                "Instructions to execute (default 1)",
            ))
            .example(json!({"type": "STEP", "count": "10"})),
    );

    registry.register(
        CommandSpec::new("FRAME", "Run whole frames, up to 600", frame)
            .param(ParamSpec::optional(
                "count",
                ParamKind::Int,
                "Frames to run (default 1)",
            ))
            .example(json!({"type": "FRAME", "count": "60"})),
    );

    registry.register(CommandSpec::new(
        "CPU",
        "CPU registers as hex strings plus the cycle counter",
        |ctx, _| {
            ctx.bridge.require_running()?;
            Ok(ctx.core().registers()?.to_json())
        },
    ));

    registry.register(
        CommandSpec::new(
            "BREAKPOINT",
            "Arm, remove, list or clear execution breakpoints; a hit pauses and raises breakpoint_hit",
            breakpoint,
        )
        .param(required_action(&["add", "remove", "list", "clear"], "add, remove, list or clear"))
        .param(ParamSpec::optional("addr", ParamKind::HexAddr, "Execution address for add"))
        .param(ParamSpec::optional("breakpoint_id", ParamKind::Int, "Breakpoint for remove"))
        .example(json!({"type": "BREAKPOINT", "action": "add", "addr": "0x008000"})),
    );
}

fn breakpoint(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    let core = ctx.core();
    match params.text("action")? {
        "add" => {
            let addr = params.addr("addr")?;
            let id = core.add_breakpoint(addr)?;
            Ok(json!({ "breakpoint_id": id, "addr": super::hex(addr) }))
        }
        "remove" => {
            let id = params.int_in("breakpoint_id", 0, i64::from(u32::MAX))? as u32;
            core.remove_breakpoint(id)?;
            Ok(json!({ "removed": id }))
        }
        "clear" => Ok(json!({ "removed": core.clear_breakpoints() })),
        _ => Ok(json!({
            "breakpoints": core.list_breakpoints().iter().map(|bp| bp.to_json()).collect::<Vec<_>>(),
        })),
    }
}

fn run_state(ctx: &Context<'_>) -> Result<Value> {
    let state = ctx.core().run_state();
    Ok(json!({ "paused": state.paused, "frame": state.frame }))
}

fn step(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    ctx.bridge.require_running()?;
    let count = params.opt_int_in("count", 1, MAX_STEP)?.unwrap_or(1) as u32;
    ctx.core().step(count)?;
    let regs = ctx.core().registers()?;
    Ok(json!({
        "stepped": count,
        "pc": format!("0x{:06X}", regs.pc),
        "cycles": regs.cycles,
    }))
}

fn frame(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    ctx.bridge.require_running()?;
    let count = params.opt_int_in("count", 1, MAX_FRAMES)?.unwrap_or(1) as u32;
    ctx.core().run_frames(count)?;
    let state = ctx.core().run_state();
    Ok(json!({ "frames": count, "frame": state.frame, "paused": state.paused }))
}
