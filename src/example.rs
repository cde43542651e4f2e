//! # Example
//! An immutable record of named values, e.g. a `question` and its gold `answer`.
//!
//! Which fields are inputs depends on the use, so an example carries a set of input keys
//! ([Example::with_inputs]). Everything else is a label.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filler::render_value;
use crate::utils::JsonMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    data: JsonMap,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    input_keys: BTreeSet<String>,
}

impl Example {
    pub fn new(data: JsonMap) -> Self {
        Self { data, input_keys: BTreeSet::new() }
    }

    /// Build an example from `(name, value)` pairs.
    ///
    /// ```
    /// use declprompt::example::Example;
    /// let example = Example::from_pairs([("question", "2 + 2?"), ("answer", "4")]).with_inputs(["question"]);
    /// assert_eq!(example.get_str("answer"), Some("4"));
    /// assert_eq!(example.inputs().len(), 1);
    /// ```
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item=(K, V)>) -> Self
        where K: Into<String>, V: Into<Value> {
        Self::new(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// A copy of this example with the given keys tagged as inputs.
    pub fn with_inputs<S: Into<String>>(&self, keys: impl IntoIterator<Item=S>) -> Self {
        Self {
            data: self.data.clone(),
            input_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// A copy of this example with one more field. Used to attach generated outputs to demos.
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut data = self.data.clone();
        data.insert(key.into(), value.into());
        Self { data, input_keys: self.input_keys.clone() }
    }

    pub fn data(&self) -> &JsonMap {
        &self.data
    }

    pub fn input_keys(&self) -> &BTreeSet<String> {
        &self.input_keys
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// The value of a string field. Non-string values give `None`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// The value of a field rendered as text, as it would appear in a prompt.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.data.get(key).map(render_value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// The input-tagged fields.
    pub fn inputs(&self) -> JsonMap {
        self.data.iter()
            .filter(|(k, _)| self.input_keys.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The fields that are not tagged as inputs.
    pub fn labels(&self) -> JsonMap {
        self.data.iter()
            .filter(|(k, _)| !self.input_keys.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
