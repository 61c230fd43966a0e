use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::bridge::Bridge;
use crate::emulator::EmulatorCore;
use crate::events::Session;
use crate::types::{Command, Response};
use crate::{BridgeError, Result};

/// Name recorded in history for requests that could not be parsed.
const MALFORMED: &str = "<malformed>";

/// What a handler can see besides its parameters.
pub struct Context<'a> {
    pub bridge: &'a Bridge,
    pub session: Option<&'a Arc<Session>>,
    pub in_batch: bool,
}

impl<'a> Context<'a> {
    pub fn core(&self) -> &'a dyn EmulatorCore {
        self.bridge.core()
    }

    pub fn session(&self) -> Result<&'a Arc<Session>> {
        self.session
            .ok_or_else(|| BridgeError::unavailable("event subscriptions need a socket connection"))
    }
}

impl Bridge {
    /// Parse and dispatch one wire line.
    pub fn dispatch_line(&self, line: &str, session: Option<&Arc<Session>>) -> Response {
        match Command::parse_line(line) {
            Ok(command) => self.dispatch_in(&command, session, false),
            Err(err) => self.reject(err),
        }
    }

    pub fn dispatch(&self, command: &Command, session: Option<&Arc<Session>>) -> Response {
        self.dispatch_in(command, session, false)
    }

    /// Dispatch a batch member given as a raw JSON value.
    pub(crate) fn dispatch_value(&self, value: Value, session: Option<&Arc<Session>>) -> Response {
        match Command::from_value(value) {
            Ok(command) => self.dispatch_in(&command, session, true),
            Err(err) => self.reject(err),
        }
    }

    fn dispatch_in(&self, command: &Command, session: Option<&Arc<Session>>, in_batch: bool) -> Response {
        let started = Instant::now();
        let response = Response::from(self.execute(command, session, in_batch));
        let elapsed = started.elapsed();
        self.metrics()
            .record(&command.command_type, elapsed, response.error_code());
        debug!(
            command = %command.command_type,
            success = response.success,
            error_code = response.error_code,
            latency_us = elapsed.as_micros() as u64,
            "command dispatched"
        );
        response
    }

    fn execute(&self, command: &Command, session: Option<&Arc<Session>>, in_batch: bool) -> Result<Value> {
        let spec = self
            .registry()
            .get(&command.command_type)
            .ok_or_else(|| BridgeError::UnknownCommand(command.command_type.clone()))?;
        let params = spec.validate(command)?;
        let ctx = Context {
            bridge: self,
            session,
            in_batch,
        };
        catch_unwind(AssertUnwindSafe(|| (spec.handler())(&ctx, &params))).unwrap_or_else(|_| {
            warn!(command = %command.command_type, "command handler panicked");
            Err(BridgeError::Internal(format!(
                "{} handler panicked",
                command.command_type
            )))
        })
    }

    /// Answer a request that never reached the registry; still counted in metrics.
    pub(crate) fn reject(&self, err: BridgeError) -> Response {
        let response = Response::from_error(&err);
        self.metrics()
            .record(MALFORMED, std::time::Duration::ZERO, response.error_code());
        debug!(error = %err, "rejected malformed request");
        response
    }
}
