//! Shared setup for the walkthrough demos in `examples/`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use declprompt::adapter::ChatAdapter;
use declprompt::dataset::{data_dir, Gsm8k, HotPotQa, Splits};
use declprompt::program::Program;
use declprompt::utils::llm::OpenAiChat;
use declprompt::utils::token::tiktoken::Tiktoken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const TASK_ENV: &str = "DECLPROMPT_TASK";

const DEFAULT_FILTER: &str = "warn,declprompt=info";

/// Prompt size the demos allow before dropping few-shot demos.
pub const DEMO_TOKEN_BUDGET: usize = 6000;

/// The signature every demo program answers.
pub const QA_SIGNATURE: &str = "question -> answer";

/// Load `.env` and install the log subscriber. `RUST_LOG` overrides the default filter.
pub fn init() {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .ok();
}

/// The model configured by `OPENAI_MODEL` and friends.
pub fn language_model() -> Result<OpenAiChat> {
    let lm = OpenAiChat::from_env()?;
    println!("\n✅ Language model configured: {}", lm.config().model);
    Ok(lm)
}

/// A chat adapter that keeps prompts within [DEMO_TOKEN_BUDGET], counted with the model's tokenizer.
pub fn budgeted_adapter(lm: &OpenAiChat) -> Result<ChatAdapter> {
    let counter = Tiktoken::new(lm.config().model.as_str())?;
    Ok(ChatAdapter::with_demo_budget(DEMO_TOKEN_BUDGET, counter))
}

/// The chain-of-thought program saved by `03_optimize`, or `None` if nothing was saved at `path` yet.
pub fn load_optimized(path: impl AsRef<Path>) -> Result<Option<Program>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    // same shape first, then restore the tuned instructions and demos
    let mut program = Program::chain_of_thought(QA_SIGNATURE)?;
    program.load(path)?;
    Ok(Some(program))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoTask {
    Gsm8k,
    HotPotQa,
}

impl DemoTask {
    /// From `DECLPROMPT_TASK`, GSM8K when unset.
    pub fn from_env() -> Result<Self> {
        match env::var(TASK_ENV).ok().as_deref().map(str::trim) {
            None | Some("") | Some("gsm8k") => Ok(DemoTask::Gsm8k),
            Some("hotpotqa") => Ok(DemoTask::HotPotQa),
            Some(other) => bail!("{}={} is not a known task, use `gsm8k` or `hotpotqa`", TASK_ENV, other),
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            DemoTask::Gsm8k => Gsm8k::DIR_NAME,
            DemoTask::HotPotQa => HotPotQa::DIR_NAME,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DemoTask::Gsm8k => "GSM8K (grade-school math word problems)",
            DemoTask::HotPotQa => "HotPotQA (multi-hop question answering)",
        }
    }

    /// 150 training and 50 dev examples, seeded.
    pub fn load(&self) -> Result<Splits> {
        let dir = data_dir().join(self.key());
        match self {
            DemoTask::Gsm8k => Gsm8k::default().load(dir),
            DemoTask::HotPotQa => HotPotQa::default().load(dir),
        }
    }

    /// Where `03_optimize` saves and `04_inference` loads the optimized program.
    pub fn save_path(&self) -> PathBuf {
        PathBuf::from(format!("optimized_{}.json", self.key()))
    }
}

pub fn banner(title: &str) {
    println!("{}", "=".repeat(60));
    println!("{}", title);
    println!("{}", "=".repeat(60));
}

pub fn section(title: &str) {
    println!("\n{}", "-".repeat(60));
    println!("🔹 {}", title);
    println!("{}", "-".repeat(60));
}

pub fn summary(title: &str, body: &str) {
    println!("\n{}", "=".repeat(60));
    println!("📌 {}", title);
    println!("{}", "=".repeat(60));
    println!("{}", body);
}

#[cfg(test)]
mod test_demos {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use declprompt::example::Example;
    use declprompt::program::Program;
    use declprompt::utils::llm::{FnLm, LmConfig, LmRequest, OpenAiChat};

    use super::{budgeted_adapter, load_optimized, DemoTask, DEMO_TOKEN_BUDGET, QA_SIGNATURE};

    #[tokio::test]
    async fn test_budgeted_adapter_drops_oversized_demos() {
        let lm = OpenAiChat::new(LmConfig::new("openai/gpt-4o-mini"));
        let adapter = budgeted_adapter(&lm).unwrap();
        assert_eq!(adapter.demo_budget.as_ref().map(|b| b.max_tokens), Some(DEMO_TOKEN_BUDGET));

        let sent = Arc::new(AtomicUsize::new(0));
        let sent_in_lm = sent.clone();
        let counting = FnLm::new("counting", move |request: &LmRequest| {
            sent_in_lm.store(request.messages.len(), Ordering::SeqCst);
            Ok("[[ ## reasoning ## ]]\nshort\n\n[[ ## answer ## ]]\nok".to_string())
        });
        let mut program = Program::chain_of_thought(QA_SIGNATURE).unwrap().with_adapter(adapter);
        let small = Example::from_pairs([("question", "1 + 1?"), ("answer", "2")]).with_inputs(["question"]);
        let huge = Example::from_pairs([("question", "lorem ipsum ".repeat(DEMO_TOKEN_BUDGET)), ("answer", "x".to_string())])
            .with_inputs(["question"]);
        program.set_demos(vec![small, huge]);
        program.call(&counting, &Example::from_pairs([("question", "2 + 2?")])).await.unwrap();
        // system, one demo pair, the live question
        assert_eq!(sent.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_load_optimized_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_optimized(dir.path().join(DemoTask::Gsm8k.save_path())).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_optimized_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DemoTask::HotPotQa.save_path());
        let mut optimized = Program::chain_of_thought(QA_SIGNATURE).unwrap();
        optimized.set_instructions("Answer with a short phrase.");
        optimized.set_demos(vec![
            Example::from_pairs([("question", "Who wrote Hamlet?"), ("answer", "Shakespeare")]).with_inputs(["question"]),
        ]);
        optimized.save(&path).unwrap();

        let loaded = load_optimized(&path).unwrap().expect("saved program");
        assert_eq!(loaded.params(), optimized.params());
        assert_eq!(loaded.strategy(), optimized.strategy());
    }

    #[test]
    fn test_load_optimized_rejects_other_programs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predict.json");
        Program::predict(QA_SIGNATURE).unwrap().save(&path).unwrap();
        assert!(load_optimized(&path).is_err());
    }
}
