//! Placeholder expansion over configuration trees.
//!
//! Three placeholder forms are understood:
//!
//! - `${environment}`: the active environment name
//! - `${environments.<env>.<dotted.path>}`: a value from the active
//!   environment's definition, usually written
//!   `${environments.${environment}.secrets.key}`. Any other environment
//!   name resolves to nothing.
//! - `${UPPER_SNAKE}`: an OS environment variable
//!
//! Inner placeholders are evaluated first and their results spliced into the
//! outer expression. A value spliced from an environment definition is itself
//! expanded for `${environment}` and `${UPPER_SNAKE}`, but not for further
//! `${environments...}` lookups. A placeholder that cannot be resolved is kept
//! as its original text (nested placeholders included) and reported in
//! [`Expansion::unresolved`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::parser::{parse, Segment};

static ENV_VAR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("valid env var pattern"));

const ENVIRONMENT_EXPR: &str = "environment";
const ENVIRONMENTS_PREFIX: &str = "environments.";

/// Active environment plus the environment definitions, borrowed from the caller
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentContext<'a> {
    pub active_environment: &'a str,
    pub environments: &'a Map<String, Value>,
}

impl<'a> EnvironmentContext<'a> {
    pub fn new(active_environment: &'a str, environments: &'a Map<String, Value>) -> Self {
        Self { active_environment, environments }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandOptions {
    /// Also expand placeholders in map keys. Off by default.
    pub expand_keys: bool,
}

/// A placeholder left in the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    /// JSON pointer of the string holding the placeholder
    pub location: String,
    pub placeholder: String,
}

/// Expanded tree plus everything that could not be resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expansion {
    pub value: Value,
    pub unresolved: Vec<Unresolved>,
}

impl Expansion {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Where the text being evaluated came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Manifest,
    /// Spliced in from an environment definition
    EnvironmentValue,
}

type VarLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct TemplateExpander<'a> {
    context: EnvironmentContext<'a>,
    options: ExpandOptions,
    lookup_var: VarLookup,
}

impl std::fmt::Debug for TemplateExpander<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateExpander")
            .field("active_environment", &self.context.active_environment)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> TemplateExpander<'a> {
    /// Expander reading `${UPPER_SNAKE}` values from the process environment.
    pub fn new(context: EnvironmentContext<'a>) -> Self {
        Self {
            context,
            options: ExpandOptions::default(),
            lookup_var: Box::new(|name| std::env::var(name).ok()),
        }
    }

    pub fn with_options(mut self, options: ExpandOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the OS environment lookup, e.g. with a fixed map.
    pub fn with_var_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lookup_var = Box::new(lookup);
        self
    }

    /// Expand every string in `tree`.
    pub fn expand(&self, tree: &Value) -> Expansion {
        let _span = crate::expand_span!(self.context.active_environment).entered();
        let mut unresolved = Vec::new();
        let mut location = String::new();
        let value = self.expand_value(tree, &mut location, &mut unresolved);

        if !unresolved.is_empty() {
            debug!(count = unresolved.len(), "Template expansion left placeholders unresolved");
        }
        Expansion { value, unresolved }
    }

    /// Expand a single string; unresolved placeholders stay in place.
    pub fn expand_str(&self, input: &str) -> String {
        let mut unresolved = Vec::new();
        self.expand_string(input, "", &mut unresolved)
    }

    fn expand_value(
        &self,
        value: &Value,
        location: &mut String,
        unresolved: &mut Vec<Unresolved>,
    ) -> Value {
        match value {
            Value::String(s) => Value::String(self.expand_string(s, location, unresolved)),
            Value::Array(items) => {
                let mut expanded = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let len = location.len();
                    push_pointer_token(location, &index.to_string());
                    expanded.push(self.expand_value(item, location, unresolved));
                    location.truncate(len);
                }
                Value::Array(expanded)
            }
            Value::Object(map) => {
                let mut expanded = Map::with_capacity(map.len());
                for (key, item) in map {
                    let len = location.len();
                    push_pointer_token(location, key);
                    let new_key = if self.options.expand_keys {
                        self.expand_string(key, location, unresolved)
                    } else {
                        key.clone()
                    };
                    expanded.insert(new_key, self.expand_value(item, location, unresolved));
                    location.truncate(len);
                }
                Value::Object(expanded)
            }
            other => other.clone(),
        }
    }

    fn expand_string(
        &self,
        input: &str,
        location: &str,
        unresolved: &mut Vec<Unresolved>,
    ) -> String {
        if !input.contains("${") {
            return input.to_string();
        }

        let mut missing = Vec::new();
        let expanded = self.evaluate(&parse(input), Scope::Manifest, &mut missing);
        unresolved.extend(missing.into_iter().map(|placeholder| Unresolved {
            location: location.to_string(),
            placeholder,
        }));
        expanded
    }

    /// Evaluate segments bottom-up, collecting the source of outermost unresolved placeholders.
    fn evaluate(&self, segments: &[Segment], scope: Scope, missing: &mut Vec<String>) -> String {
        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(children) => {
                    let mut inner_missing = Vec::new();
                    let expression = self.evaluate(children, scope, &mut inner_missing);
                    let resolved = if inner_missing.is_empty() {
                        self.lookup(&expression, scope, missing)
                    } else {
                        None
                    };

                    match resolved {
                        Some(value) => out.push_str(&value),
                        None => {
                            let source = segment.source();
                            out.push_str(&source);
                            missing.push(source);
                        }
                    }
                }
            }
        }
        out
    }

    fn lookup(&self, expression: &str, scope: Scope, missing: &mut Vec<String>) -> Option<String> {
        if expression == ENVIRONMENT_EXPR {
            return Some(self.context.active_environment.to_string());
        }

        if let Some(path) = expression.strip_prefix(ENVIRONMENTS_PREFIX) {
            if scope == Scope::EnvironmentValue {
                return None;
            }
            let value = self.environment_value(path)?;
            if !value.contains("${") {
                return Some(value);
            }
            return Some(self.evaluate(&parse(&value), Scope::EnvironmentValue, missing));
        }

        if ENV_VAR_NAME.is_match(expression) {
            return (self.lookup_var)(expression);
        }

        None
    }

    /// Value at `<env>.<dotted.path>`, only for the active environment.
    fn environment_value(&self, path: &str) -> Option<String> {
        let (environment, path) = path.split_once('.')?;
        if environment != self.context.active_environment || path.is_empty() {
            return None;
        }

        let mut current = self.context.environments.get(environment)?;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(stringify(current))
    }
}

/// Strings splice in raw; every other JSON value as its JSON text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_pointer_token(pointer: &mut String, token: &str) {
    pointer.push('/');
    pointer.push_str(&token.replace('~', "~0").replace('/', "~1"));
}

/// Expand `tree` against `context`, reading OS variables from the process environment.
pub fn expand(tree: &Value, context: EnvironmentContext<'_>) -> Expansion {
    TemplateExpander::new(context).expand(tree)
}

/// Expand a single string against `context`.
pub fn expand_str(input: &str, context: EnvironmentContext<'_>) -> String {
    TemplateExpander::new(context).expand_str(input)
}
