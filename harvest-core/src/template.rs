/*!
Filename template resolution.

Templates use `{name}` placeholders; `{{` and `}}` produce literal braces.
Names are matched exactly against the variables of the active stage, with no
attribute, index or format-spec interpretation.
*/

use serde_json::Value;
use std::collections::BTreeMap;

use crate::context::Context;
use crate::metadata::stringify;
use crate::{PersistError, Result};

/// Ad-hoc template values supplied with a single save call
pub type TemplateValues = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed filename template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string
    ///
    /// # Errors
    /// `PersistError::InvalidTemplate` for an unclosed `{`, a stray `}`, a
    /// `{` inside a placeholder or an empty `{}`.
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |reason: &str| PersistError::InvalidTemplate {
            template: source.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(invalid("unexpected '{' inside placeholder")),
                            c => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(invalid("unclosed '{'"));
                    }
                    if name.is_empty() {
                        return Err(invalid("empty placeholder '{}'"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("single '}' outside a placeholder")),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Placeholder names in the order they appear
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Fill every placeholder from `vars`
    ///
    /// Either the whole filename is produced or the first missing variable is
    /// reported; a partially filled string is never returned.
    pub fn render(&self, vars: &TemplateVariables) -> Result<String> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Placeholder(name) => {
                    let value =
                        vars.get(name)
                            .ok_or_else(|| PersistError::MissingTemplateVariable {
                                name: name.clone(),
                                template: self.source.clone(),
                            })?;
                    rendered.push_str(value);
                }
            }
        }
        Ok(rendered)
    }
}

/// Variables visible to a template at resolution time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVariables {
    values: BTreeMap<String, String>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable, replacing any earlier value of the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Layer task fields, stage timestamps and ad-hoc overrides, later layers
    /// winning on name collisions
    pub fn for_context(ctx: &Context, overrides: &TemplateValues) -> Self {
        let mut vars = Self::new();
        for (name, value) in ctx.task() {
            vars.insert(name.as_str(), stringify(value));
        }
        for (name, value) in ctx.timestamp_variables() {
            vars.insert(name, value);
        }
        for (name, value) in overrides {
            vars.insert(name.as_str(), stringify(value));
        }
        vars
    }
}

/// Resolve the configured `{stage}_FILE_TEMPLATE` for a context
pub fn resolve_filename(ctx: &Context, overrides: &TemplateValues) -> Result<String> {
    let template = Template::parse(ctx.config().file_template(ctx.stage())?)?;
    template.render(&TemplateVariables::for_context(ctx, overrides))
}
