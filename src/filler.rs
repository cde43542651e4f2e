//! # Filler
//! Anything that fills one or more placeholders in a [PartialPrompt].
//!
//! The [adapter](crate::adapter) composes a system prompt from a [SignatureFiller], and every
//! demonstration or live call turn from a [FieldsFiller].

use crate::prompt::PartialPrompt;
use crate::signature::Signature;
use crate::utils::JsonMap;
use anyhow::Result;

pub trait FillPlaceholders {
    fn placeholders_to_fill(&self) -> &Vec<String>;
}

pub trait Fill: FillPlaceholders {
    fn fill(&self, partial_prompt: &mut PartialPrompt) -> Result<()>;
}

pub trait FillWith<CTX>: FillPlaceholders {
    fn fill_with(&self, partial_prompt: &mut PartialPrompt, context: CTX) -> Result<CTX>;
}

impl<T: FillWith<()>> Fill for T {
    fn fill(&self, partial_prompt: &mut PartialPrompt) -> Result<()> {
        self.fill_with(partial_prompt, ())
    }
}

/// Renders a JSON value as prompt text: strings verbatim, everything else as JSON.
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders the `[[ ## name ## ]]` header that marks a field in prompts and replies.
pub fn field_header(name: &str) -> String {
    format!("[[ ## {} ## ]]", name)
}

/// Fills the placeholders describing a [Signature]: its fields, the reply structure and the objective.
pub struct SignatureFiller<'a> {
    signature: &'a Signature,
    placeholders_to_fill: Vec<String>,
}

impl<'a> SignatureFiller<'a> {
    pub const INPUT_FIELDS: &'static str = "input_fields";
    pub const OUTPUT_FIELDS: &'static str = "output_fields";
    pub const STRUCTURE: &'static str = "structure";
    pub const OBJECTIVE: &'static str = "objective";

    pub fn new(signature: &'a Signature) -> Self {
        Self {
            signature,
            placeholders_to_fill: vec![
                Self::INPUT_FIELDS.to_string(),
                Self::OUTPUT_FIELDS.to_string(),
                Self::STRUCTURE.to_string(),
                Self::OBJECTIVE.to_string(),
            ],
        }
    }

    fn describe(fields: &[crate::signature::Field]) -> String {
        fields.iter()
            .enumerate()
            .map(|(i, f)| {
                let mut line = format!("{}. `{}` ({})", i + 1, f.name, f.type_hint.as_deref().unwrap_or("str"));
                if let Some(desc) = &f.description {
                    line.push_str(": ");
                    line.push_str(desc);
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn structure(&self) -> String {
        let mut blocks: Vec<String> = self.signature.inputs.iter()
            .chain(self.signature.outputs.iter())
            .map(|f| format!("{}\n{{{}}}", field_header(&f.name), f.name))
            .collect();
        blocks.push(field_header("completed"));
        blocks.join("\n\n")
    }
}

impl FillPlaceholders for SignatureFiller<'_> {
    fn placeholders_to_fill(&self) -> &Vec<String> {
        &self.placeholders_to_fill
    }
}

impl FillWith<()> for SignatureFiller<'_> {
    fn fill_with(&self, partial_prompt: &mut PartialPrompt, context: ()) -> Result<()> {
        partial_prompt
            .try_fill(Self::INPUT_FIELDS, Self::describe(&self.signature.inputs))?
            .try_fill(Self::OUTPUT_FIELDS, Self::describe(&self.signature.outputs))?
            .try_fill(Self::STRUCTURE, self.structure())?
            .try_fill(Self::OBJECTIVE, self.signature.instructions.as_str())?;
        Ok(context)
    }
}

/// Fills one placeholder with the `[[ ## name ## ]]` blocks of the selected field values.
pub struct FieldsFiller {
    placeholder: String,
    field_names: Vec<String>,
    placeholders_to_fill: Vec<String>,
}

impl FieldsFiller {
    pub fn new(placeholder: impl Into<String>, field_names: Vec<String>) -> Self {
        let placeholder = placeholder.into();
        Self {
            placeholders_to_fill: vec![placeholder.clone()],
            placeholder,
            field_names,
        }
    }
}

impl FillPlaceholders for FieldsFiller {
    fn placeholders_to_fill(&self) -> &Vec<String> {
        &self.placeholders_to_fill
    }
}

impl<'a> FillWith<&'a JsonMap> for FieldsFiller {
    /// Fields absent from `values` are skipped.
    fn fill_with(&self, partial_prompt: &mut PartialPrompt, values: &'a JsonMap) -> Result<&'a JsonMap> {
        let rendered = self.field_names.iter()
            .filter_map(|name| values.get(name).map(|v| format!("{}\n{}", field_header(name), render_value(v))))
            .collect::<Vec<_>>()
            .join("\n\n");
        partial_prompt.try_fill(self.placeholder.as_str(), rendered)?;
        Ok(values)
    }
}
