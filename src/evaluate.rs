//! # Evaluate
//! Score a [Program] over a dev set with a boolean metric.
//!
//! ```no_run
//! use declprompt::evaluate::{answer_exact_match, Evaluate};
//! use declprompt::program::Program;
//! use declprompt::utils::llm::OpenAiChat;
//! # async fn run(devset: Vec<declprompt::example::Example>) -> anyhow::Result<()> {
//! let lm = OpenAiChat::from_env()?;
//! let program = Program::chain_of_thought("question -> answer")?;
//! let evaluator = Evaluate::new(devset, answer_exact_match).num_threads(8).display_progress(true);
//! let result = evaluator.run(&program, &lm).await;
//! println!("score: {:.1}%", result.score);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream;
use futures::StreamExt;
use log::{info, warn};

use crate::example::Example;
use crate::prediction::Prediction;
use crate::program::Program;
use crate::utils::llm::LanguageModel;

/// A pass/fail judgement of one prediction against its example.
pub type Metric = Arc<dyn Fn(&Example, &Prediction) -> bool + Send + Sync>;

/// True only when the predicted `answer` equals the gold `answer` byte for byte.
///
/// No normalization is applied: case, whitespace and paraphrases all count as mismatches.
///
/// ```
/// use declprompt::evaluate::answer_exact_match;
/// use declprompt::example::Example;
/// use declprompt::prediction::Prediction;
/// let gold = Example::from_pairs([("question", "2 + 3?"), ("answer", "5")]);
/// let predicted = |a: &str| Prediction::new([("answer".to_string(), a.into())].into_iter().collect());
/// assert!(answer_exact_match(&gold, &predicted("5")));
/// assert!(!answer_exact_match(&gold, &predicted("5.")));
/// assert!(!answer_exact_match(&gold, &predicted(" 5")));
/// ```
pub fn answer_exact_match(example: &Example, prediction: &Prediction) -> bool {
    match (example.get_text("answer"), prediction.get("answer")) {
        (Some(gold), Some(_)) => prediction.answer() == gold,
        _ => false,
    }
}

/// The outcome of one dev example.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRow {
    pub example: Example,
    /// `None` when the call failed.
    pub prediction: Option<Prediction>,
    pub correct: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct EvaluationResult {
    /// Percentage of passing examples, `0.0` for an empty dev set.
    #[readonly]
    pub score: f64,
    /// One row per dev example, in dev set order.
    #[readonly]
    pub results: Vec<EvaluationRow>,
    #[readonly]
    pub answer_field: String,
}

impl EvaluationResult {
    pub(crate) fn from_rows(results: Vec<EvaluationRow>, answer_field: impl Into<String>) -> Self {
        let score = if results.is_empty() {
            0.0
        } else {
            100.0 * results.iter().filter(|r| r.correct).count() as f64 / results.len() as f64
        };
        Self { score, results, answer_field: answer_field.into() }
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.correct).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// A plain-text table of the first `n` rows: question, gold answer, predicted answer, verdict.
    pub fn render_table(&self, n: usize) -> String {
        let mut lines = vec![
            format!("{:>3} | {:<48} | {:<16} | {:<16} | {}", "#", "question", "gold", "predicted", "ok"),
            format!("{}-+-{}-+-{}-+-{}-+-{}", "-".repeat(3), "-".repeat(48), "-".repeat(16), "-".repeat(16), "--"),
        ];
        for (i, row) in self.results.iter().take(n).enumerate() {
            let question = row.example.get_text("question").unwrap_or_default();
            let gold = row.example.get_text(&self.answer_field).unwrap_or_default();
            let predicted = match (&row.prediction, &row.error) {
                (Some(prediction), _) => prediction.text(&self.answer_field),
                (None, Some(_)) => "<error>".to_string(),
                (None, None) => String::new(),
            };
            lines.push(format!(
                "{:>3} | {:<48} | {:<16} | {:<16} | {}",
                i + 1,
                clip(&question, 48),
                clip(&gold, 16),
                clip(&predicted, 16),
                if row.correct { "✔" } else { "✘" },
            ));
        }
        if self.results.len() > n {
            lines.push(format!("... {} more rows", self.results.len() - n));
        }
        lines.join("\n")
    }
}

/// Single-line, at most `width` chars.
fn clip(text: &str, width: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= width {
        flat
    } else {
        let mut clipped: String = flat.chars().take(width.saturating_sub(3)).collect();
        clipped.push_str("...");
        clipped
    }
}

pub struct Evaluate {
    devset: Vec<Example>,
    metric: Metric,
    num_threads: usize,
    display_progress: bool,
    display_table: Option<usize>,
    answer_field: String,
}

impl Evaluate {
    pub fn new(devset: Vec<Example>, metric: impl Fn(&Example, &Prediction) -> bool + Send + Sync + 'static) -> Self {
        Self::with_metric(devset, Arc::new(metric))
    }

    pub fn with_metric(devset: Vec<Example>, metric: Metric) -> Self {
        Self {
            devset,
            metric,
            num_threads: 1,
            display_progress: false,
            display_table: None,
            answer_field: "answer".to_string(),
        }
    }

    /// Maximum number of model calls in flight. Zero is treated as one.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Log the running score after every example.
    pub fn display_progress(mut self, display_progress: bool) -> Self {
        self.display_progress = display_progress;
        self
    }

    /// Log a table of the first `n` rows when the run ends.
    pub fn display_table(mut self, n: usize) -> Self {
        self.display_table = Some(n);
        self
    }

    /// The field shown in the gold and predicted columns of the table.
    pub fn answer_field(mut self, field: impl Into<String>) -> Self {
        self.answer_field = field.into();
        self
    }

    pub fn devset(&self) -> &[Example] {
        &self.devset
    }

    /// Run `program` on every dev example. A failing call is logged and counts as incorrect.
    pub async fn run<L: LanguageModel + ?Sized>(&self, program: &Program, lm: &L) -> EvaluationResult {
        let total = self.devset.len();
        let done = AtomicUsize::new(0);
        let passed = AtomicUsize::new(0);
        let metric = &self.metric;
        let (done, passed) = (&done, &passed);
        let rows: Vec<EvaluationRow> = stream::iter(self.devset.iter())
            .map(|example| async move {
                let row = match program.call(lm, example).await {
                    Ok(prediction) => EvaluationRow {
                        example: example.clone(),
                        correct: metric(example, &prediction),
                        prediction: Some(prediction),
                        error: None,
                    },
                    Err(e) => {
                        warn!("evaluation call failed, counted as incorrect: {:#}", e);
                        EvaluationRow { example: example.clone(), prediction: None, correct: false, error: Some(format!("{:#}", e)) }
                    }
                };
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                let passing = passed.fetch_add(row.correct as usize, Ordering::SeqCst) + row.correct as usize;
                if self.display_progress {
                    info!("Average Metric: {} / {} ({:.1}%) [{}/{}]",
                        passing, finished, 100.0 * passing as f64 / finished as f64, finished, total);
                }
                row
            })
            .buffered(self.num_threads)
            .collect()
            .await;
        let result = EvaluationResult::from_rows(rows, self.answer_field.as_str());
        if let Some(n) = self.display_table {
            info!("evaluation table:\n{}", result.render_table(n));
        }
        info!("Average Metric: {} / {} ({:.1}%)", result.passed(), result.total(), result.score);
        result
    }
}
