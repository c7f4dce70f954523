//! Programmatic template construction.
//!
//! Templates are plain JSON values, but building directive nodes by hand is
//! noisy. This module provides typed builders for every built-in directive
//! plus arithmetic operator overloading, rendered into a standard template
//! with [`build`]:
//!
//! ```
//! use metamap::builder::{build, mapped};
//! use serde_json::json;
//!
//! let template = build(mapped("granule", "size") * 2, "@");
//! assert_eq!(
//!     template,
//!     json!({"@mul": {
//!         "left": {"@mapped": {"source": "granule", "key": "size"}},
//!         "right": 2,
//!     }}),
//! );
//! ```

use serde_json::{Map, Value};

/// A template fragment: a constant, a directive builder, or a container of
/// further fragments.
#[derive(Debug, Clone)]
pub enum TemplateNode {
    Constant(Value),
    Directive(DirectiveBuilder),
    Mapping(Vec<(String, TemplateNode)>),
    Sequence(Vec<TemplateNode>),
}

impl TemplateNode {
    fn render(&self, marker: &str) -> Value {
        match self {
            Self::Constant(value) => value.clone(),
            Self::Directive(directive) => directive.render(marker),
            Self::Mapping(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, node)| (key.clone(), node.render(marker)))
                    .collect(),
            ),
            Self::Sequence(items) => {
                Value::Array(items.iter().map(|node| node.render(marker)).collect())
            }
        }
    }
}

impl From<DirectiveBuilder> for TemplateNode {
    fn from(directive: DirectiveBuilder) -> Self {
        Self::Directive(directive)
    }
}

macro_rules! constant_from {
    ($($ty:ty),+ $(,)?) => {$(
        impl From<$ty> for TemplateNode {
            fn from(value: $ty) -> Self {
                Self::Constant(Value::from(value))
            }
        }
    )+};
}

constant_from!(Value, &str, String, bool, i32, i64, u32, u64, f64);

/// An unrendered directive node: tag plus parameters.
#[derive(Debug, Clone)]
pub struct DirectiveBuilder {
    name: String,
    params: Vec<(String, TemplateNode)>,
}

impl DirectiveBuilder {
    /// A directive with an arbitrary registered tag.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter, builder style.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<TemplateNode>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    fn render(&self, marker: &str) -> Value {
        let body: Map<String, Value> = self
            .params
            .iter()
            .map(|(key, node)| (key.clone(), node.render(marker)))
            .collect();

        let mut node = Map::new();
        node.insert(format!("{marker}{}", self.name), Value::Object(body));
        Value::Object(node)
    }
}

/// Render a template fragment into a standard template using the given
/// directive marker.
pub fn build(template: impl Into<TemplateNode>, marker: &str) -> Value {
    template.into().render(marker)
}

/// A value mapped from a named source.
pub fn mapped(source: &str, key: &str) -> DirectiveBuilder {
    DirectiveBuilder::new("mapped")
        .with_param("source", source)
        .with_param("key", key)
}

/// A value re-parsed with another format and queried.
pub fn reformatted(format: &str, value: impl Into<TemplateNode>, key: &str) -> DirectiveBuilder {
    DirectiveBuilder::new("reformatted")
        .with_param("format", format)
        .with_param("value", value)
        .with_param("key", key)
}

fn binop(
    name: &str,
    left: impl Into<TemplateNode>,
    right: impl Into<TemplateNode>,
) -> DirectiveBuilder {
    DirectiveBuilder::new(name)
        .with_param("left", left)
        .with_param("right", right)
}

pub fn add(left: impl Into<TemplateNode>, right: impl Into<TemplateNode>) -> DirectiveBuilder {
    binop("add", left, right)
}

pub fn sub(left: impl Into<TemplateNode>, right: impl Into<TemplateNode>) -> DirectiveBuilder {
    binop("sub", left, right)
}

pub fn mul(left: impl Into<TemplateNode>, right: impl Into<TemplateNode>) -> DirectiveBuilder {
    binop("mul", left, right)
}

pub fn truediv(left: impl Into<TemplateNode>, right: impl Into<TemplateNode>) -> DirectiveBuilder {
    binop("truediv", left, right)
}

pub fn floordiv(left: impl Into<TemplateNode>, right: impl Into<TemplateNode>) -> DirectiveBuilder {
    binop("floordiv", left, right)
}

impl<T: Into<TemplateNode>> std::ops::Add<T> for DirectiveBuilder {
    type Output = DirectiveBuilder;

    fn add(self, rhs: T) -> Self::Output {
        binop("add", self, rhs)
    }
}

impl<T: Into<TemplateNode>> std::ops::Sub<T> for DirectiveBuilder {
    type Output = DirectiveBuilder;

    fn sub(self, rhs: T) -> Self::Output {
        binop("sub", self, rhs)
    }
}

impl<T: Into<TemplateNode>> std::ops::Mul<T> for DirectiveBuilder {
    type Output = DirectiveBuilder;

    fn mul(self, rhs: T) -> Self::Output {
        binop("mul", self, rhs)
    }
}

impl<T: Into<TemplateNode>> std::ops::Div<T> for DirectiveBuilder {
    type Output = DirectiveBuilder;

    fn div(self, rhs: T) -> Self::Output {
        binop("truediv", self, rhs)
    }
}
