use anyhow::Result;
pub use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use log::debug;

use crate::utils::llm::ChatMessage;
use crate::utils::token::CountToken;

const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_PER_REPLY: usize = 3;

/// Counter using the Tiktoken tokenizer.
#[derive(Clone)]
#[readonly::make]
pub struct Tiktoken {
    /// The model name of the tokenizer. read-only.
    #[readonly]
    pub model: String,
    /// The tokenizer. read-only.
    #[readonly]
    pub bpe: CoreBPE,
}

impl Tiktoken {
    /// Create a new Tiktoken counter for a model id such as `openai/gpt-4o` or `gpt-3.5-turbo`.
    ///
    /// Models unknown to `tiktoken-rs` fall back to the `cl100k_base` encoding.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let bare_model = model.rsplit('/').next().unwrap_or(model.as_str());
        let bpe = match get_bpe_from_model(bare_model) {
            Ok(bpe) => bpe,
            Err(e) => {
                debug!("no tokenizer registered for {}, using cl100k_base: {}", bare_model, e);
                cl100k_base()?
            }
        };
        Ok(Tiktoken {
            model: bare_model.to_string(),
            bpe,
        })
    }

    /// Count the number of tokens in a chat message. Following best practices from the OpenAI example.
    pub fn count_msg_token(&self, msg: &ChatMessage) -> usize {
        self.count_token(msg.content.as_str()) + TOKENS_PER_MESSAGE
    }

    /// Count the number of tokens a whole conversation takes, including the priming of the reply.
    pub fn count_messages_token(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.count_msg_token(m)).sum::<usize>() + TOKENS_PER_REPLY
    }
}

impl CountToken for Tiktoken {
    fn count_token(&self, string: &str) -> usize {
        self.bpe.encode_with_special_tokens(string).len()
    }
}

#[cfg(test)]
mod test_tiktoken {
    use super::Tiktoken;
    use crate::utils::llm::ChatMessage;
    use crate::utils::token::CountToken;

    #[test]
    fn test_unknown_model_falls_back() {
        let counter = Tiktoken::new("openai/some-future-model").unwrap();
        assert_eq!(counter.model, "some-future-model");
        assert!(counter.count_token("hello world") > 0);
    }

    #[test]
    fn test_message_overhead() {
        let counter = Tiktoken::new("gpt-4").unwrap();
        let msg = ChatMessage::user("hello");
        assert_eq!(counter.count_msg_token(&msg), counter.count_token("hello") + 3);
        assert_eq!(counter.count_messages_token(&[msg.clone(), msg]), 2 * (counter.count_token("hello") + 3) + 3);
    }
}
