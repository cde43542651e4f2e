//! # Prompt
//! Every chat message sent to a model starts as a [PromptTemplate]: text with named `{{slots}}`.
//!
//! A template is never filled in place. [PromptTemplate::construct_prompt] hands out a [PartialPrompt],
//! which remembers a value per slot and only renders text on [PartialPrompt::complete], once no slot is
//! left empty. Values are substituted in a single pass, so a value that itself looks like `{{x}}` stays
//! literal text.
//!
//! Slot names are whatever sits between the double braces, as long as it has no line break or brace.
//!
//! ```
//! use declprompt::prompt::PromptTemplate;
//! let template = PromptTemplate::new("Given {{inputs}}, produce {{outputs}}.");
//! let mut prompt = template.construct_prompt();
//! prompt.try_fill("inputs", "`question`").unwrap();
//! assert!(prompt.complete().is_err());
//! prompt.try_fill("outputs", "`answer`").unwrap();
//! assert_eq!(prompt.complete().unwrap(), "Given `question`, produce `answer`.");
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::warn;

use crate::prompt::errors::{PlaceholderNotExist, UnfilledPlaceholders};
use crate::utils::prompt_processing::{get_placeholders, replace_placeholders};
use crate::utils::token::CountToken;

/// Immutable template text plus the slot names found in it. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
#[readonly::make]
pub struct PromptTemplate {
    text: Arc<str>,
    #[readonly]
    pub placeholders: BTreeSet<String>,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        let text: String = text.into();
        let placeholders = get_placeholders(&text);
        if placeholders.is_empty() {
            warn!("prompt template has no `{{{{name}}}}` slot, it will always render as is:\n{}", text);
        }
        Self { text: Arc::from(text), placeholders }
    }

    #[inline]
    pub fn str(&self) -> &str {
        &self.text
    }

    /// A fresh prompt with every slot empty.
    pub fn construct_prompt(&self) -> PartialPrompt {
        PartialPrompt {
            template: self.clone(),
            values: self.placeholders.iter().map(|name| (name.clone(), None)).collect(),
        }
    }
}

/// A [PromptTemplate] being filled. Only obtainable from [PromptTemplate::construct_prompt].
#[derive(Debug, Clone)]
#[readonly::make]
pub struct PartialPrompt {
    #[readonly]
    pub template: PromptTemplate,
    values: BTreeMap<String, Option<String>>,
}

impl PartialPrompt {
    /// Set the value of a slot, replacing any earlier value. Fails if the template has no such slot.
    pub fn try_fill(&mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Result<&mut Self, PlaceholderNotExist> {
        let placeholder = placeholder.into();
        match self.values.get_mut(&placeholder) {
            Some(slot) => {
                *slot = Some(value.into());
                Ok(self)
            }
            None => Err(PlaceholderNotExist {
                try_fill_placeholder: placeholder,
                value: value.into(),
                available_placeholders: self.template.placeholders.iter().cloned().collect(),
            }),
        }
    }

    /// Slots still waiting for a value, in name order.
    pub fn unfilled(&self) -> impl Iterator<Item=&str> {
        self.values.iter().filter(|(_, v)| v.is_none()).map(|(k, _)| k.as_str())
    }

    /// Size of the prompt rendered so far. Empty slots count as their `{{name}}` text.
    pub fn current_token_num(&self, counter: &(impl CountToken + ?Sized)) -> usize {
        counter.count_token(&replace_placeholders(self.template.str(), &self.values))
    }

    /// Render the prompt. Fails while any slot is empty.
    pub fn complete(&self) -> Result<String, UnfilledPlaceholders> {
        let unfilled_placeholders: Vec<String> = self.unfilled().map(str::to_string).collect();
        if unfilled_placeholders.is_empty() {
            Ok(replace_placeholders(self.template.str(), &self.values))
        } else {
            Err(UnfilledPlaceholders {
                unfilled_placeholders,
                all_placeholders: self.template.placeholders.iter().cloned().collect(),
            })
        }
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when completing a prompt that still has empty slots.
    #[derive(Debug, Clone)]
    pub struct UnfilledPlaceholders {
        pub unfilled_placeholders: Vec<String>,
        pub all_placeholders: Vec<String>,
    }

    impl fmt::Display for UnfilledPlaceholders {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "UnfilledPlaceholders: slots {:?} of {:?} have no value",
                   self.unfilled_placeholders, self.all_placeholders)
        }
    }

    impl Error for UnfilledPlaceholders {}

    /// Error when filling a slot the template does not have.
    #[derive(Debug, Clone)]
    pub struct PlaceholderNotExist {
        pub try_fill_placeholder: String,
        pub value: String,
        pub available_placeholders: Vec<String>,
    }

    impl fmt::Display for PlaceholderNotExist {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "PlaceholderNotExist: no slot `{}` to put {:?} into, the template has {:?}",
                   self.try_fill_placeholder, self.value, self.available_placeholders)
        }
    }

    impl Error for PlaceholderNotExist {}
}

#[cfg(test)]
mod test_prompt {
    use super::PromptTemplate;
    use crate::utils::token::count_tokens_by_len;

    #[test]
    fn test_fill_and_complete() {
        let template = PromptTemplate::new("{{a}} and {{b}} and {{a}}");
        let mut prompt = template.construct_prompt();
        prompt.try_fill("a", "alice").unwrap();
        let err = prompt.complete().expect_err("b is still unfilled");
        assert_eq!(err.unfilled_placeholders, vec!["b".to_string()]);
        assert_eq!(err.all_placeholders, vec!["a".to_string(), "b".to_string()]);
        prompt.try_fill("b", "bob").unwrap();
        assert_eq!(prompt.complete().unwrap(), "alice and bob and alice");
    }

    #[test]
    fn test_fill_unknown_placeholder() {
        let template = PromptTemplate::new("{{a}}");
        let mut prompt = template.construct_prompt();
        let err = prompt.try_fill("c", "carol").expect_err("c is not a placeholder");
        assert_eq!(err.try_fill_placeholder, "c");
        assert_eq!(err.available_placeholders, vec!["a".to_string()]);
    }

    #[test]
    fn test_refill_overrides() {
        let template = PromptTemplate::new("hi {{name}}");
        let mut prompt = template.construct_prompt();
        prompt.try_fill("name", "alice").unwrap().try_fill("name", "bob").unwrap();
        assert_eq!(prompt.complete().unwrap(), "hi bob");
        assert_eq!(prompt.unfilled().count(), 0);
    }

    #[test]
    fn test_token_num_counts_unfilled_names() {
        let template = PromptTemplate::new("ab{{c}}");
        let mut prompt = template.construct_prompt();
        assert_eq!(prompt.current_token_num(&count_tokens_by_len), "ab{{c}}".len());
        prompt.try_fill("c", "").unwrap();
        assert_eq!(prompt.current_token_num(&count_tokens_by_len), 2);
    }

    #[test]
    fn test_template_without_slots() {
        let template = PromptTemplate::new("no slots here");
        assert!(template.placeholders.is_empty());
        assert_eq!(template.construct_prompt().complete().unwrap(), "no slots here");
    }
}
