//! # Chat adapter
//! Turns a [Signature], its demos and the live inputs into chat messages, and parses the reply back
//! into output fields.
//!
//! Every field is delimited by a `[[ ## name ## ]]` header, and a reply ends with
//! `[[ ## completed ## ]]`. A reply that carries a JSON object with the output fields is accepted too.

use std::sync::Arc;

use anyhow::Result;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde_json::Value;

use crate::example::Example;
use crate::filler::{field_header, Fill, FieldsFiller, FillWith, SignatureFiller};
use crate::prompt::PromptTemplate;
use crate::signature::Signature;
use crate::utils::llm::ChatMessage;
use crate::utils::postprocess::json::filter_to_json_object;
use crate::utils::token::CountToken;
use crate::utils::JsonMap;
use crate::adapter::errors::ParseError;

const SYSTEM_TEMPLATE_STR: &str = r#"Your input fields are:
{{input_fields}}
Your output fields are:
{{output_fields}}
All interactions will be structured in the following way, with the appropriate values filled in.

{{structure}}
In adhering to this structure, your objective is:
        {{objective}}"#;

const LAST_USER_TEMPLATE_STR: &str = r#"{{fields}}

Respond with the corresponding output fields, starting with the field {{output_order}}, and then ending with the marker for `[[ ## completed ## ]]`."#;

const FIELDS_PLACEHOLDER: &str = "fields";
const OUTPUT_ORDER_PLACEHOLDER: &str = "output_order";

/// Shown in demos for outputs the demo does not have, e.g. a rationale for a plain labeled example.
pub const NOT_SUPPLIED: &str = "Not supplied for this particular example.";

lazy_static! {
    static ref SYSTEM_TEMPLATE: PromptTemplate = PromptTemplate::new(SYSTEM_TEMPLATE_STR);
    static ref LAST_USER_TEMPLATE: PromptTemplate = PromptTemplate::new(LAST_USER_TEMPLATE_STR);
    static ref FIELDS_TEMPLATE: PromptTemplate = PromptTemplate::new("{{fields}}");
    static ref FIELD_HEADER_RE: Regex = Regex::new(r"\[\[ ## (\w+) ## \]\]").unwrap();
}

/// Upper bound on the prompt size. Demos that would not fit are dropped from the end.
#[derive(Clone)]
pub struct DemoBudget {
    pub max_tokens: usize,
    pub counter: Arc<dyn CountToken + Send + Sync>,
}

#[derive(Clone, Default)]
pub struct ChatAdapter {
    pub demo_budget: Option<DemoBudget>,
}

impl ChatAdapter {
    pub fn with_demo_budget(max_tokens: usize, counter: impl CountToken + Send + Sync + 'static) -> Self {
        Self {
            demo_budget: Some(DemoBudget { max_tokens, counter: Arc::new(counter) }),
        }
    }

    /// Render the full conversation for one call.
    pub fn format(&self, signature: &Signature, demos: &[Example], inputs: &JsonMap) -> Result<Vec<ChatMessage>> {
        let mut system = SYSTEM_TEMPLATE.construct_prompt();
        SignatureFiller::new(signature).fill(&mut system)?;
        let system = ChatMessage::system(system.complete()?);
        let last_user = ChatMessage::user(self.format_last_user(signature, inputs)?);

        let mut used_tokens = self.demo_budget.as_ref()
            .map(|b| b.counter.count_token(&system.content) + b.counter.count_token(&last_user.content))
            .unwrap_or(0);
        let mut messages = vec![system];
        for (idx, demo) in demos.iter().enumerate() {
            let Some((user, assistant)) = self.format_demo(signature, demo)? else {
                debug!("skipping demo {} without inputs or outputs", idx);
                continue;
            };
            if let Some(budget) = &self.demo_budget {
                let demo_tokens = budget.counter.count_token(&user.content) + budget.counter.count_token(&assistant.content);
                if used_tokens + demo_tokens > budget.max_tokens {
                    warn!("dropping {} of {} demos to stay within {} prompt tokens", demos.len() - idx, demos.len(), budget.max_tokens);
                    break;
                }
                used_tokens += demo_tokens;
            }
            messages.push(user);
            messages.push(assistant);
        }
        messages.push(last_user);
        Ok(messages)
    }

    fn format_last_user(&self, signature: &Signature, inputs: &JsonMap) -> Result<String> {
        let output_order = signature.outputs.iter()
            .map(|f| format!("`{}`", field_header(&f.name)))
            .collect::<Vec<_>>()
            .join(", then ");
        let mut prompt = LAST_USER_TEMPLATE.construct_prompt();
        FieldsFiller::new(FIELDS_PLACEHOLDER, signature.input_names().into_iter().map(str::to_string).collect())
            .fill_with(&mut prompt, inputs)?;
        prompt.try_fill(OUTPUT_ORDER_PLACEHOLDER, output_order)?;
        Ok(prompt.complete()?)
    }

    /// A demo becomes a user turn with its inputs and an assistant turn with its outputs.
    /// Demos without any input or without any output are skipped.
    fn format_demo(&self, signature: &Signature, demo: &Example) -> Result<Option<(ChatMessage, ChatMessage)>> {
        let has_input = signature.inputs.iter().any(|f| demo.contains(&f.name));
        let has_output = signature.outputs.iter().any(|f| demo.contains(&f.name));
        if !has_input || !has_output {
            return Ok(None);
        }
        let mut values = demo.data().clone();
        for field in signature.inputs.iter().chain(signature.outputs.iter()) {
            values.entry(field.name.clone()).or_insert_with(|| Value::String(NOT_SUPPLIED.to_string()));
        }

        let mut user = FIELDS_TEMPLATE.construct_prompt();
        FieldsFiller::new(FIELDS_PLACEHOLDER, signature.input_names().into_iter().map(str::to_string).collect())
            .fill_with(&mut user, &values)?;
        let mut assistant = FIELDS_TEMPLATE.construct_prompt();
        FieldsFiller::new(FIELDS_PLACEHOLDER, signature.output_names().into_iter().map(str::to_string).collect())
            .fill_with(&mut assistant, &values)?;
        let assistant = format!("{}\n\n{}", assistant.complete()?, field_header("completed"));
        Ok(Some((ChatMessage::user(user.complete()?), ChatMessage::assistant(assistant))))
    }

    /// Extract the output fields of `signature` from a model reply.
    pub fn parse(&self, signature: &Signature, reply: &str) -> Result<JsonMap, ParseError> {
        let mut fields = Self::parse_sections(signature, reply);
        if fields.len() < signature.outputs.len() {
            if let Ok(object) = filter_to_json_object(reply) {
                for field in &signature.outputs {
                    if let Some(value) = object.get(&field.name) {
                        fields.entry(field.name.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
        }
        let missing: Vec<String> = signature.outputs.iter()
            .filter(|f| !fields.contains_key(&f.name))
            .map(|f| f.name.clone())
            .collect();
        if missing.is_empty() {
            Ok(fields)
        } else {
            Err(ParseError {
                missing_fields: missing,
                expected_fields: signature.output_names().into_iter().map(str::to_string).collect(),
                raw_response: reply.to_string(),
            })
        }
    }

    fn parse_sections(signature: &Signature, reply: &str) -> JsonMap {
        let headers: Vec<(usize, usize, &str)> = FIELD_HEADER_RE.captures_iter(reply)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let name = caps.get(1)?.as_str();
                Some((whole.start(), whole.end(), name))
            })
            .collect();
        let mut fields = JsonMap::new();
        for (i, (_, content_start, name)) in headers.iter().enumerate() {
            let content_end = headers.get(i + 1).map(|h| h.0).unwrap_or(reply.len());
            let is_output = signature.outputs.iter().any(|f| f.name == *name);
            if is_output && !fields.contains_key(*name) {
                let content = reply[*content_start..content_end].trim();
                fields.insert(name.to_string(), Value::String(content.to_string()));
            }
        }
        fields
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when a model reply lacks some of the declared output fields.
    #[derive(Debug, Clone)]
    pub struct ParseError {
        pub missing_fields: Vec<String>,
        pub expected_fields: Vec<String>,
        pub raw_response: String,
    }

    impl fmt::Display for ParseError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "ParseError: expected output fields {:?}, but {:?} are missing in the reply:\n{}",
                   self.expected_fields, self.missing_fields, self.raw_response)
        }
    }

    impl Error for ParseError {}
}

#[cfg(test)]
mod test_adapter {
    use serde_json::json;
    use super::{ChatAdapter, NOT_SUPPLIED};
    use crate::example::Example;
    use crate::signature::{Field, Signature};
    use crate::utils::llm::Role;
    use crate::utils::token::count_tokens_by_len;

    fn cot_signature() -> Signature {
        Signature::parse("question -> answer").unwrap()
            .prepend_output(Field::new("reasoning"))
            .unwrap()
    }

    #[test]
    fn test_format_without_demos() {
        let signature = Signature::parse("question -> answer").unwrap();
        let inputs = Example::from_pairs([("question", "What is 3 * 5?")]).data().clone();
        let messages = ChatAdapter::default().format(&signature, &[], &inputs).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("1. `question` (str)"));
        assert!(messages[0].content.contains("[[ ## answer ## ]]\n{answer}"));
        assert!(messages[0].content.ends_with("Given the fields `question`, produce the fields `answer`."));
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content.starts_with("[[ ## question ## ]]\nWhat is 3 * 5?"));
        assert!(messages[1].content.contains("starting with the field `[[ ## answer ## ]]`, and then ending"));
    }

    #[test]
    fn test_format_demos() {
        let signature = cot_signature();
        let demos = vec![
            Example::from_pairs([("question", "1+1?"), ("answer", "2")]),
            Example::from_pairs([("question", "no outputs")]),
            Example::from_pairs([("question", "2+2?"), ("reasoning", "2 and 2"), ("answer", "4")]),
        ];
        let inputs = Example::from_pairs([("question", "3+3?")]).data().clone();
        let messages = ChatAdapter::default().format(&signature, &demos, &inputs).unwrap();
        // system + 2 demo pairs + last user
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(messages[2].content.contains(&format!("[[ ## reasoning ## ]]\n{}", NOT_SUPPLIED)));
        assert!(messages[2].content.ends_with("[[ ## completed ## ]]"));
        assert_eq!(messages[4].content, "[[ ## reasoning ## ]]\n2 and 2\n\n[[ ## answer ## ]]\n4\n\n[[ ## completed ## ]]");
        assert!(messages[5].content.contains("`[[ ## reasoning ## ]]`, then `[[ ## answer ## ]]`"));
    }

    #[test]
    fn test_demo_budget_drops_trailing_demos() {
        let signature = Signature::parse("question -> answer").unwrap();
        let demos: Vec<Example> = (0..5)
            .map(|i| Example::from_pairs([("question", format!("question {}", i)), ("answer", format!("{}", i))]))
            .collect();
        let inputs = Example::from_pairs([("question", "q")]).data().clone();
        let unlimited = ChatAdapter::default().format(&signature, &demos, &inputs).unwrap();
        let base: usize = [&unlimited[0], &unlimited[11]].iter().map(|m| m.content.len()).sum();
        let pair: usize = unlimited[1].content.len() + unlimited[2].content.len();
        let budget = ChatAdapter::with_demo_budget(base + 2 * pair, count_tokens_by_len);
        let limited = budget.format(&signature, &demos, &inputs).unwrap();
        assert_eq!(limited.len(), 2 + 2 * 2);
    }

    #[test]
    fn test_parse_sections() {
        let signature = cot_signature();
        let reply = "[[ ## reasoning ## ]]\n1000 - 500 - 450 = 50\n\n[[ ## answer ## ]]\n50\n\n[[ ## completed ## ]]";
        let fields = ChatAdapter::default().parse(&signature, reply).unwrap();
        assert_eq!(fields["reasoning"], json!("1000 - 500 - 450 = 50"));
        assert_eq!(fields["answer"], json!("50"));
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["answer", "reasoning"]);
    }

    #[test]
    fn test_parse_json_fallback() {
        let signature = Signature::parse("question -> answer").unwrap();
        let fields = ChatAdapter::default().parse(&signature, "Sure! {\"answer\": \"15\"}").unwrap();
        assert_eq!(fields["answer"], json!("15"));
    }

    #[test]
    fn test_parse_missing_fields() {
        let signature = cot_signature();
        let err = ChatAdapter::default().parse(&signature, "[[ ## reasoning ## ]]\nhmm").unwrap_err();
        assert_eq!(err.missing_fields, vec!["answer".to_string()]);
        assert_eq!(err.raw_response, "[[ ## reasoning ## ]]\nhmm");
    }
}
