//! Declarative command table. The same [`CommandSpec`] drives parameter
//! validation and `HELP` output.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};

use crate::dispatch::Context;
use crate::sync::{read, write};
use crate::types::Command;
use crate::validate::{ParamKind, Params};
use crate::{BridgeError, Result};

pub type Handler = Arc<dyn Fn(&Context<'_>, &Params) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }

    fn schema(&self) -> Value {
        let mut schema = json!({
            "name": self.name,
            "type": self.kind.type_name(),
            "required": self.required,
            "description": self.description,
        });
        if let ParamKind::Enum(choices) = self.kind {
            schema["choices"] = json!(choices);
        }
        schema
    }
}

pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub example: Option<Value>,
    handler: Handler,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl CommandSpec {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Context<'_>, &Params) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            example: None,
            handler: Arc::new(handler),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Missing required parameters are reported before coercion failures.
    /// Undeclared parameters are ignored.
    pub fn validate(&self, command: &Command) -> Result<Params> {
        if let Some(missing) = self
            .params
            .iter()
            .find(|p| p.required && command.param(p.name).is_none())
        {
            return Err(BridgeError::MissingParameter(missing.name.to_string()));
        }

        let mut params = Params::default();
        for spec in &self.params {
            if let Some(raw) = command.param(spec.name) {
                params.insert(spec.name, spec.kind.coerce(spec.name, raw)?);
            }
        }
        Ok(params)
    }

    pub fn help(&self) -> Value {
        let example = self
            .example
            .clone()
            .unwrap_or_else(|| json!({ "type": self.name }));
        json!({
            "command": self.name,
            "description": self.description,
            "params": self.params.iter().map(ParamSpec::schema).collect::<Vec<_>>(),
            "example": example,
        })
    }
}

#[derive(Default)]
pub struct Registry {
    commands: RwLock<BTreeMap<String, Arc<CommandSpec>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an existing name replaces it.
    pub fn register(&self, spec: CommandSpec) {
        write(&self.commands).insert(spec.name.clone(), Arc::new(spec));
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommandSpec>> {
        read(&self.commands).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        read(&self.commands).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.commands).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
