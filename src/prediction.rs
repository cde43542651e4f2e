//! # Prediction
//! The output record of one [Program](crate::program::Program) call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::example::Example;
use crate::filler::render_value;
use crate::utils::JsonMap;

/// Name of the rationale field added by chain-of-thought programs.
pub const REASONING_FIELD: &str = "reasoning";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    fields: JsonMap,
}

impl Prediction {
    pub fn new(fields: JsonMap) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &JsonMap {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The field rendered as text, or an empty string when absent.
    pub fn text(&self, name: &str) -> String {
        self.fields.get(name).map(render_value).unwrap_or_default()
    }

    pub fn answer(&self) -> String {
        self.text("answer")
    }

    /// The chain-of-thought rationale, if this prediction has one.
    pub fn reasoning(&self) -> Option<&str> {
        self.fields.get(REASONING_FIELD).and_then(Value::as_str)
    }

    /// Merge the predicted fields into a copy of `example`, e.g. to keep a successful trace as a demo.
    pub fn into_demo(self, example: &Example) -> Example {
        self.fields.into_iter().fold(example.clone(), |demo, (k, v)| demo.with_field(k, v))
    }
}

#[cfg(test)]
mod test_prediction {
    use serde_json::json;
    use super::Prediction;
    use crate::example::Example;
    use crate::utils::JsonMap;

    fn prediction(pairs: &[(&str, &str)]) -> Prediction {
        Prediction::new(pairs.iter().map(|(k, v)| (k.to_string(), json!(v))).collect::<JsonMap>())
    }

    #[test]
    fn test_accessors() {
        let p = prediction(&[("reasoning", "3 * 5 = 15"), ("answer", "15")]);
        assert_eq!(p.answer(), "15");
        assert_eq!(p.reasoning(), Some("3 * 5 = 15"));
        assert_eq!(p.text("missing"), "");
        assert_eq!(prediction(&[("answer", "1")]).reasoning(), None);
    }

    #[test]
    fn test_into_demo_overrides_labels() {
        let example = Example::from_pairs([("question", "q"), ("answer", "gold")]).with_inputs(["question"]);
        let demo = prediction(&[("reasoning", "r"), ("answer", "gold")]).into_demo(&example);
        assert_eq!(demo.get_str("reasoning"), Some("r"));
        assert_eq!(demo.get_str("question"), Some("q"));
        assert!(demo.input_keys().contains("question"));
    }
}
