//! XPath queries over XML documents (feature `xml`).

use std::io::Read;

use serde_json::{Map, Number, Value};
use sxd_document::Package;
use sxd_document::parser;
use sxd_xpath::{Context as XPathContext, Factory};

use crate::error::{FormatError, SourceProviderError};
use crate::format::{EvalError, FileFormat, Format};
use crate::key::Key;
use crate::storage::ByteStream;

/// A format for querying XML documents with XPath 1.0.
///
/// The query's namespace map is taken from the root element's in-scope
/// namespace declarations, so prefixed queries resolve against the
/// document's own prefixes. Element matches are reduced to their string
/// value before cardinality resolution; non-node-set results (e.g. from
/// `count(...)`) are returned verbatim.
#[derive(Debug, Clone, Default)]
pub struct Xml;

pub(super) fn xml_from_config(
    args: &Map<String, Value>,
) -> Result<Box<dyn Format>, SourceProviderError> {
    crate::provider::check_fields(args, &[])?;
    Ok(Box::new(Xml))
}

impl FileFormat for Xml {
    type Data = Package;

    fn parse_data(&self, stream: &mut dyn ByteStream) -> Result<Self::Data, FormatError> {
        let mut text = String::new();
        stream.read_to_string(&mut text)?;
        parser::parse(&text).map_err(|e| FormatError::Parse(e.to_string()))
    }

    fn eval_key(&self, data: &Self::Data, key: &Key) -> Result<Value, EvalError> {
        let document = data.as_document();
        let root = document
            .root()
            .children()
            .into_iter()
            .find_map(|child| child.element())
            .ok_or_else(|| EvalError::Message("document has no root element".to_string()))?;

        let xpath = Factory::new()
            .build(key.key())
            .map_err(|e| EvalError::Message(e.to_string()))?
            .ok_or_else(|| EvalError::Message("empty xpath".to_string()))?;

        let mut context = XPathContext::new();
        for namespace in root.namespaces_in_scope() {
            // XPath 1.0 has no default namespace; only prefixed bindings
            // participate in query resolution.
            if !namespace.prefix().is_empty() {
                context.set_namespace(namespace.prefix(), namespace.uri());
            }
        }

        let result = xpath
            .evaluate(&context, root)
            .map_err(|e| EvalError::Message(e.to_string()))?;

        match result {
            sxd_xpath::Value::Nodeset(nodes) => {
                let values = nodes
                    .document_order()
                    .into_iter()
                    .map(|node| Value::String(node.string_value()))
                    .collect();
                Ok(key.resolve_list_match(values)?)
            }
            // Aggregate functions such as count() produce non-node-set
            // results; these bypass cardinality resolution.
            sxd_xpath::Value::Number(n) => Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| EvalError::Message(format!("non-finite number result {n}"))),
            sxd_xpath::Value::String(s) => Ok(Value::String(s)),
            sxd_xpath::Value::Boolean(b) => Ok(Value::Bool(b)),
        }
    }
}
