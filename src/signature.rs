//! # Signature
//! A signature declares what a task takes and what it produces, e.g. `"question -> answer"`.
//!
//! The text form is a tiny language: comma-separated input fields, an arrow `->`, and comma-separated
//! output fields. A field may carry a type annotation (`"question: str -> answer: int"`), which is only
//! used as a hint in prompts.
//!
//! ```
//! use declprompt::signature::Signature;
//! let signature: Signature = "context, question -> answer".parse().unwrap();
//! assert_eq!(signature.input_names(), vec!["context", "question"]);
//! assert_eq!(signature.output_names(), vec!["answer"]);
//! assert_eq!(signature.to_string(), "context, question -> answer");
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fmt::Formatter;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::signature::errors::SignatureParseError;

lazy_static! {
    static ref FIELD_NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// A named field of a [Signature].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), type_hint: None, description: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Ordered input and output fields plus the instruction text of a task.
///
/// Field names are unique across inputs and outputs, and both sides have at least one field.
#[derive(Debug, Clone, PartialEq, Eq)]
#[readonly::make]
pub struct Signature {
    #[readonly]
    pub inputs: Vec<Field>,
    #[readonly]
    pub outputs: Vec<Field>,
    #[readonly]
    pub instructions: String,
}

impl Signature {
    pub fn parse(text: &str) -> Result<Self, SignatureParseError> {
        let mut sides = text.split("->");
        let (inputs, outputs) = match (sides.next(), sides.next(), sides.next()) {
            (Some(inputs), Some(outputs), None) => (inputs, outputs),
            (_, None, _) => return Err(SignatureParseError::new(text, "missing `->` between inputs and outputs")),
            _ => return Err(SignatureParseError::new(text, "more than one `->`")),
        };
        let inputs = Self::parse_fields(text, inputs, "input")?;
        let outputs = Self::parse_fields(text, outputs, "output")?;
        Self::from_fields(inputs, outputs).map_err(|reason| SignatureParseError::new(text, reason))
    }

    fn parse_fields(text: &str, side: &str, kind: &str) -> Result<Vec<Field>, SignatureParseError> {
        if side.trim().is_empty() {
            return Err(SignatureParseError::new(text, format!("no {} fields", kind)));
        }
        split_top_level(side)
            .into_iter()
            .map(|raw| {
                let (name, type_hint) = match raw.split_once(':') {
                    Some((name, hint)) => (name.trim(), Some(hint.trim())),
                    None => (raw.trim(), None),
                };
                if !FIELD_NAME_RE.is_match(name) {
                    return Err(SignatureParseError::new(text, format!("invalid {} field name `{}`", kind, name)));
                }
                let type_hint = match type_hint {
                    Some("") => return Err(SignatureParseError::new(text, format!("empty type annotation on `{}`", name))),
                    hint => hint.map(str::to_string),
                };
                Ok(Field { name: name.to_string(), type_hint, description: None })
            })
            .collect()
    }

    /// Build a signature from field lists, with the default instructions.
    pub fn from_fields(inputs: Vec<Field>, outputs: Vec<Field>) -> Result<Self, String> {
        if inputs.is_empty() || outputs.is_empty() {
            return Err("a signature needs at least one input and one output field".to_string());
        }
        let mut seen = HashSet::new();
        for field in inputs.iter().chain(outputs.iter()) {
            if !seen.insert(field.name.as_str()) {
                return Err(format!("duplicate field name `{}`", field.name));
            }
        }
        let instructions = Self::default_instructions(&inputs, &outputs);
        Ok(Self { inputs, outputs, instructions })
    }

    fn default_instructions(inputs: &[Field], outputs: &[Field]) -> String {
        let quote = |fields: &[Field]| fields.iter().map(|f| format!("`{}`", f.name)).collect::<Vec<_>>().join(", ");
        format!("Given the fields {}, produce the fields {}.", quote(inputs), quote(outputs))
    }

    /// Same fields, different instructions.
    pub fn with_instructions(&self, instructions: impl Into<String>) -> Self {
        Self {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            instructions: instructions.into(),
        }
    }

    /// Prepend an output field, keeping the instructions. Errors if the name is already taken.
    pub fn prepend_output(&self, field: Field) -> Result<Self, SignatureParseError> {
        if self.field(&field.name).is_some() {
            return Err(SignatureParseError::new(self.to_string(), format!("duplicate field name `{}`", field.name)));
        }
        let mut outputs = Vec::with_capacity(self.outputs.len() + 1);
        outputs.push(field);
        outputs.extend(self.outputs.iter().cloned());
        Ok(Self {
            inputs: self.inputs.clone(),
            outputs,
            instructions: self.instructions.clone(),
        })
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.inputs.iter().chain(self.outputs.iter()).find(|f| f.name == name)
    }

    /// Whether two signatures declare the same field names in the same order.
    pub fn same_shape(&self, other: &Signature) -> bool {
        self.input_names() == other.input_names() && self.output_names() == other.output_names()
    }
}

/// Split on commas that are not nested in `[]`, `()` or `{}`, so `dict[str, int]` stays one piece.
fn split_top_level(side: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in side.char_indices() {
        match c {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pieces.push(&side[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&side[start..]);
    pieces
}

impl FromStr for Signature {
    type Err = SignatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Signature {
    type Error = SignatureParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let render = |fields: &[Field]| fields.iter()
            .map(|field| match &field.type_hint {
                Some(hint) => format!("{}: {}", field.name, hint),
                None => field.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} -> {}", render(&self.inputs), render(&self.outputs))
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when a signature string or field list is malformed.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SignatureParseError {
        pub signature: String,
        pub reason: String,
    }

    impl SignatureParseError {
        pub(crate) fn new(signature: impl Into<String>, reason: impl Into<String>) -> Self {
            Self { signature: signature.into(), reason: reason.into() }
        }
    }

    impl fmt::Display for SignatureParseError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "SignatureParseError: cannot parse signature \"{}\": {}", self.signature, self.reason)
        }
    }

    impl Error for SignatureParseError {}
}

#[cfg(test)]
mod test_signature {
    use super::{Field, Signature};

    #[test]
    fn test_parse_simple() {
        let signature = Signature::parse("question -> answer").unwrap();
        assert_eq!(signature.input_names(), vec!["question"]);
        assert_eq!(signature.output_names(), vec!["answer"]);
        assert_eq!(signature.instructions, "Given the fields `question`, produce the fields `answer`.");
    }

    #[test]
    fn test_parse_types_and_spacing() {
        let signature = Signature::parse("  context:list[str],question ->answer: int ").unwrap();
        assert_eq!(signature.input_names(), vec!["context", "question"]);
        assert_eq!(signature.inputs[0].type_hint.as_deref(), Some("list[str]"));
        assert_eq!(signature.outputs[0].type_hint.as_deref(), Some("int"));
        assert_eq!(signature.to_string(), "context: list[str], question -> answer: int");

        let signature = Signature::parse("data: dict[str, int] -> answer").unwrap();
        assert_eq!(signature.input_names(), vec!["data"]);
        assert_eq!(signature.inputs[0].type_hint.as_deref(), Some("dict[str, int]"));
        let signature = Signature::parse("pairs: list[tuple[str, int]], question -> answer").unwrap();
        assert_eq!(signature.input_names(), vec!["pairs", "question"]);
        assert_eq!(signature.inputs[0].type_hint.as_deref(), Some("list[tuple[str, int]]"));
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "question answer",
            "a -> b -> c",
            " -> answer",
            "question -> ",
            "question, -> answer",
            "1st -> answer",
            "question -> question",
            "a, b, a -> c",
            "q: -> a",
        ] {
            let err = Signature::parse(bad).expect_err(bad);
            assert_eq!(err.signature, bad);
        }
    }

    #[test]
    fn test_prepend_output() {
        let signature = Signature::parse("question -> answer").unwrap().with_instructions("Solve it.");
        let extended = signature.prepend_output(Field::new("reasoning")).unwrap();
        assert_eq!(extended.output_names(), vec!["reasoning", "answer"]);
        assert_eq!(extended.instructions, "Solve it.");
        assert!(extended.prepend_output(Field::new("question")).is_err());
        assert!(!signature.same_shape(&extended));
        assert!(signature.same_shape(&signature.with_instructions("other")));
    }
}
