//! Response templates.
//!
//! Response nodes declare their output as a template mixing literal text
//! with variable references written as `{{#node_id.field#}}`. The response
//! coordinator walks the parsed segments in order, forwarding literal text
//! immediately and variable references as their streams or scalar values
//! become available.

use serde::{Deserialize, Serialize};

use crate::types::Selector;

/// One parsed piece of a response template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateSegment {
    /// Literal text emitted verbatim.
    Text(String),
    /// Reference to an output selector, streamed or scalar.
    Variable(Selector),
}

/// An ordered sequence of template segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

impl Template {
    #[must_use]
    pub fn new(segments: Vec<TemplateSegment>) -> Self {
        Template { segments }
    }

    /// Parse a raw template string.
    ///
    /// Variable references use the `{{#a.b#}}` form, with dot-separated
    /// selector segments. Unterminated or empty references are kept as
    /// literal text rather than rejected; templates come from user-authored
    /// workflow definitions and should degrade, not fail the build.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flowmesh::template::{Template, TemplateSegment};
    /// use flowmesh::types::Selector;
    ///
    /// let t = Template::parse("Answer: {{#llm.text#}}!");
    /// assert_eq!(
    ///     t.segments,
    ///     vec![
    ///         TemplateSegment::Text("Answer: ".into()),
    ///         TemplateSegment::Variable(Selector::of("llm", "text")),
    ///         TemplateSegment::Text("!".into()),
    ///     ]
    /// );
    /// ```
    pub fn parse(raw: &str) -> Self {
        const OPEN: &str = "{{#";
        const CLOSE: &str = "#}}";

        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };

            let reference = &after_open[..end];
            let parts: Vec<&str> = reference
                .split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();

            if parts.len() < 2 {
                // Malformed reference; keep the literal text up to and
                // including the close marker.
                let literal_end = start + OPEN.len() + end + CLOSE.len();
                segments.push(TemplateSegment::Text(rest[..literal_end].to_string()));
                rest = &rest[literal_end..];
                continue;
            }

            if start > 0 {
                segments.push(TemplateSegment::Text(rest[..start].to_string()));
            }
            segments.push(TemplateSegment::Variable(Selector::from_parts(parts)));
            rest = &after_open[end + CLOSE.len()..];
        }

        if !rest.is_empty() {
            segments.push(TemplateSegment::Text(rest.to_string()));
        }

        Template { segments }
    }

    /// Selectors of every variable reference, in template order.
    pub fn variable_selectors(&self) -> Vec<&Selector> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                TemplateSegment::Variable(sel) => Some(sel),
                TemplateSegment::Text(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
