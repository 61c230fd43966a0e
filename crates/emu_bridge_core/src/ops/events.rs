use serde_json::{json, Value};

use super::action;
use crate::dispatch::Context;
use crate::events::{Subscriptions, EVENT_CATALOG};
use crate::registry::{CommandSpec, ParamSpec, Registry};
use crate::validate::{ParamKind, Params};
use crate::Result;

pub(super) fn register(registry: &Registry) {
    registry.register(
        CommandSpec::new(
            "SUBSCRIBE",
            "Replace this connection's event subscriptions, list the catalog, or clear",
            subscribe,
        )
        .param(action(&["set", "list", "clear"], "set (default), list or clear"))
        .param(ParamSpec::optional(
            "events",
            ParamKind::Text,
            "Comma-separated event names, or all",
        ))
        .example(json!({"type": "SUBSCRIBE", "events": "frame_complete,breakpoint_hit"})),
    );
}

fn subscribe(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    match params.choice("action", "set") {
        "list" => Ok(json!({ "available_events": EVENT_CATALOG })),
        "clear" => {
            let session = ctx.session()?;
            session.set_subscriptions(Subscriptions::default());
            Ok(json!({ "subscribed": Vec::<String>::new() }))
        }
        _ => {
            let subs = Subscriptions::parse(params.text("events")?)?;
            let session = ctx.session()?;
            let names = subs.names();
            session.set_subscriptions(subs);
            Ok(json!({ "subscribed": names }))
        }
    }
}
