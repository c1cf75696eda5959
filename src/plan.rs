//! Planner glue for argument templates, variables and field configuration
//!
//! Addresses in schema event definitions may reference field arguments,
//! e.g. `employeeUpdated.{{ args.id }}`. At planning time each template is
//! replaced with a `$$N$$` placeholder bound to an argument path; at
//! execution time `Variables::render` substitutes the request's argument
//! values into the input before it reaches a data source.

use crate::datasource::EngineDataSourceFactory;
use crate::engine::{DataSource, SubscriptionDataSource};
use crate::error::{EventError, Result};
use crate::types::{ProviderType, TypeField};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

type Pattern = OnceLock<std::result::Result<Regex, regex::Error>>;

static ARGUMENT_TEMPLATE: Pattern = OnceLock::new();
static VARIABLE_PLACEHOLDER: Pattern = OnceLock::new();

fn compiled(cell: &'static Pattern, pattern: &str) -> Result<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(|e| EventError::Template(format!("invalid pattern {}: {}", pattern, e)))
}

/// `{{ args.a.b }}`, capturing `.a.b`
pub fn argument_template_regex() -> Result<&'static Regex> {
    compiled(&ARGUMENT_TEMPLATE, r"\{\{\s*args((?:\.[a-zA-Z0-9_]+)+)\s*\}\}")
}

/// `$$N$$`, capturing `N`
pub fn variable_placeholder_regex() -> Result<&'static Regex> {
    compiled(&VARIABLE_PLACEHOLDER, r"\$\$(\d+)\$\$")
}

/// How a variable's value is written into the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableRenderer {
    /// Inside a JSON string: strings are escaped without quotes, null is empty
    Plain,
    /// As a JSON value
    Json,
}

/// A placeholder bound to a path into the field arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextVariable {
    pub path: Vec<String>,
    pub renderer: VariableRenderer,
}

/// Ordered, de-duplicated placeholder table of one planned field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    variables: Vec<ContextVariable>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable, returning its placeholder
    pub fn add_variable(&mut self, variable: ContextVariable) -> String {
        let index = match self.variables.iter().position(|v| *v == variable) {
            Some(index) => index,
            None => {
                self.variables.push(variable);
                self.variables.len() - 1
            }
        };
        format!("$${}$$", index)
    }

    pub fn get(&self, index: usize) -> Option<&ContextVariable> {
        self.variables.get(index)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Substitute every placeholder in `template` with values from `arguments`
    pub fn render(&self, template: &str, arguments: &Value) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in variable_placeholder_regex()?.captures_iter(template) {
            let (Some(whole), Some(index)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let index: usize = index
                .as_str()
                .parse()
                .map_err(|e| EventError::Template(format!("invalid placeholder {}: {}", whole.as_str(), e)))?;
            let variable = self.variables.get(index).ok_or_else(|| {
                EventError::Template(format!("placeholder {} has no variable", whole.as_str()))
            })?;

            out.push_str(&template[last..whole.start()]);
            render_variable(variable, arguments, &mut out)?;
            last = whole.end();
        }

        out.push_str(&template[last..]);
        Ok(out)
    }
}

fn render_variable(variable: &ContextVariable, arguments: &Value, out: &mut String) -> Result<()> {
    let value = variable
        .path
        .iter()
        .try_fold(arguments, |value, segment| value.get(segment));

    match (variable.renderer, value) {
        (VariableRenderer::Json, Some(value)) => out.push_str(&serde_json::to_string(value)?),
        (VariableRenderer::Json, None) => out.push_str("null"),
        (VariableRenderer::Plain, None | Some(Value::Null)) => {}
        (VariableRenderer::Plain, Some(Value::String(s))) => {
            let quoted = serde_json::to_string(s)?;
            out.push_str(&quoted[1..quoted.len() - 1]);
        }
        (VariableRenderer::Plain, Some(value)) if value.is_array() || value.is_object() => {
            let quoted = serde_json::to_string(&serde_json::to_string(value)?)?;
            out.push_str(&quoted[1..quoted.len() - 1]);
        }
        (VariableRenderer::Plain, Some(value)) => out.push_str(&value.to_string()),
    }
    Ok(())
}

/// Replace every `{{ args.path }}` in `template` with a plain placeholder
///
/// The first path segment must name an argument of the field.
pub fn extract_argument_templates(
    template: &str,
    field_name: &str,
    argument_names: &[String],
    variables: &mut Variables,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in argument_template_regex()?.captures_iter(template) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let path: Vec<String> = path
            .as_str()
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let root = path.first().map(String::as_str).unwrap_or_default();
        if !argument_names.iter().any(|name| name == root) {
            return Err(EventError::Template(format!(
                "field \"{}\" has no argument \"{}\" referenced by \"{}\"",
                field_name,
                root,
                whole.as_str()
            )));
        }

        out.push_str(&template[last..whole.start()]);
        out.push_str(&variables.add_variable(ContextVariable {
            path,
            renderer: VariableRenderer::Plain,
        }));
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Event data template of a publish or request field: a JSON object of all
/// field arguments, each bound to a JSON-rendered variable
pub fn build_event_data(argument_names: &[String], variables: &mut Variables) -> Result<String> {
    let mut out = String::from("{");
    for (i, name) in argument_names.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(name)?);
        out.push(':');
        out.push_str(&variables.add_variable(ContextVariable {
            path: vec![name.clone()],
            renderer: VariableRenderer::Json,
        }));
    }
    out.push('}');
    Ok(out)
}

/// A field being planned
#[derive(Debug, Clone, Copy)]
pub struct FieldRequest<'a> {
    pub type_name: &'a str,
    pub field_name: &'a str,
    pub argument_names: &'a [String],
}

/// Planned publish or request field
pub struct FetchConfiguration {
    pub input: String,
    pub variables: Variables,
    pub data_source: Arc<dyn DataSource>,
    pub merge_path: Vec<String>,
}

impl FetchConfiguration {
    pub fn render_input(&self, arguments: &Value) -> Result<String> {
        self.variables.render(&self.input, arguments)
    }
}

impl fmt::Debug for FetchConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfiguration")
            .field("input", &self.input)
            .field("variables", &self.variables)
            .field("merge_path", &self.merge_path)
            .finish_non_exhaustive()
    }
}

/// Planned subscription field
pub struct SubscriptionConfiguration {
    pub input: String,
    pub variables: Variables,
    pub data_source: Arc<dyn SubscriptionDataSource>,
    pub merge_path: Vec<String>,
}

impl SubscriptionConfiguration {
    pub fn render_input(&self, arguments: &Value) -> Result<String> {
        self.variables.render(&self.input, arguments)
    }
}

impl fmt::Debug for SubscriptionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfiguration")
            .field("input", &self.input)
            .field("variables", &self.variables)
            .field("merge_path", &self.merge_path)
            .finish_non_exhaustive()
    }
}

/// Creates a fresh factory for an event-backed field
pub trait FactoryResolver: Send + Sync {
    /// `Ok(None)` when no event backs the field
    fn resolve(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<Option<Box<dyn EngineDataSourceFactory>>>;
}

/// Planner-facing data source of one subgraph and backend
pub struct PlanDataSource {
    id: String,
    provider_type: ProviderType,
    root_nodes: Vec<TypeField>,
    resolver: Arc<dyn FactoryResolver>,
}

impl PlanDataSource {
    pub fn new(
        id: impl Into<String>,
        provider_type: ProviderType,
        root_nodes: Vec<TypeField>,
        resolver: Arc<dyn FactoryResolver>,
    ) -> Self {
        Self {
            id: id.into(),
            provider_type,
            root_nodes,
            resolver,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn root_nodes(&self) -> &[TypeField] {
        &self.root_nodes
    }

    pub fn has_root_node(&self, type_name: &str, field_name: &str) -> bool {
        self.root_nodes
            .iter()
            .any(|node| node.type_name == type_name && node.field_names.iter().any(|f| f == field_name))
    }

    pub fn engine_data_source_factory(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<Box<dyn EngineDataSourceFactory>> {
        self.resolver.resolve(type_name, field_name)?.ok_or_else(|| {
            EventError::Config(format!(
                "data source \"{}\" has no {} event for {}.{}",
                self.id, self.provider_type, type_name, field_name
            ))
        })
    }

    /// Plan a publish or request field
    pub fn configure_fetch(&self, field: FieldRequest<'_>) -> Result<FetchConfiguration> {
        let mut factory = self.engine_data_source_factory(field.type_name, field.field_name)?;
        let mut variables = Variables::new();

        factory.transform_event_data(&mut |address| {
            extract_argument_templates(address, field.field_name, field.argument_names, &mut variables)
        })?;
        let event_data = build_event_data(field.argument_names, &mut variables)?;

        Ok(FetchConfiguration {
            input: factory.resolve_data_source_input(event_data.as_bytes())?,
            data_source: factory.resolve_data_source()?,
            merge_path: vec![factory.field_name().to_string()],
            variables,
        })
    }

    /// Plan a subscription field
    pub fn configure_subscription(&self, field: FieldRequest<'_>) -> Result<SubscriptionConfiguration> {
        let mut factory = self.engine_data_source_factory(field.type_name, field.field_name)?;
        let mut variables = Variables::new();

        factory.transform_event_data(&mut |address| {
            extract_argument_templates(address, field.field_name, field.argument_names, &mut variables)
        })?;

        Ok(SubscriptionConfiguration {
            input: factory.resolve_data_source_subscription_input()?,
            data_source: factory.resolve_data_source_subscription()?,
            merge_path: vec![factory.field_name().to_string()],
            variables,
        })
    }
}

impl fmt::Debug for PlanDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanDataSource")
            .field("id", &self.id)
            .field("provider_type", &self.provider_type)
            .field("root_nodes", &self.root_nodes)
            .finish_non_exhaustive()
    }
}
