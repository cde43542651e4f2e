//! # Optimize
//! A MIPROv2-style optimizer: it tunes the instructions and few-shot demos of a [Program] against a
//! metric, without touching its signature.
//!
//! The search runs in four stages:
//! 1. bootstrap: run the program on part of the trainset and keep the traces that pass the metric,
//! 2. demo sets: build candidate demo lists from those traces and from labeled examples,
//! 3. instructions: ask the model for alternative instructions,
//! 4. trials: score randomly sampled (instruction, demo set) pairs on validation minibatches, and
//!    periodically run the most promising pair on the full validation set.
//!
//! Candidates are sampled uniformly at random. All randomness comes from one seeded RNG, so a
//! deterministic model gives a deterministic search.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;

use anyhow::{bail, Result};
use futures::stream;
use futures::StreamExt;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::evaluate::{Evaluate, Metric};
use crate::example::Example;
use crate::prediction::Prediction;
use crate::program::{CallOptions, Program, ProgramParams};
use crate::utils::llm::LanguageModel;

const PROPOSER_SIGNATURE: &str = "dataset_sample, program_signature, program_demos, current_instruction, tip -> proposed_instruction";

const PROPOSER_INSTRUCTIONS: &str = "Use the information below to write a new instruction for a language model program. \
The instruction should describe the task so that the model answers as accurately as possible. \
Reply with the instruction only.";

const TIPS: [&str; 6] = [
    "",
    "Don't be afraid to be creative when creating the new instruction!",
    "Keep the instruction clear and concise.",
    "Make sure your instruction is very informative and descriptive.",
    "The instruction should include a high stakes scenario in which the LM must solve the task!",
    "Include a persona that is relevant to the task in the instruction (ie. \"You are a ...\")",
];

/// Examples shown to the instruction proposer.
const PROPOSER_SAMPLE_SIZE: usize = 5;

/// Search-size presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoMode {
    Light,
    Medium,
    Heavy,
}

impl AutoMode {
    pub fn num_candidates(&self) -> usize {
        match self {
            AutoMode::Light => 6,
            AutoMode::Medium => 12,
            AutoMode::Heavy => 18,
        }
    }

    /// Upper bound on the validation set size.
    pub fn val_size(&self) -> usize {
        match self {
            AutoMode::Light => 100,
            AutoMode::Medium => 300,
            AutoMode::Heavy => 1000,
        }
    }

    /// Enough trials to cover both parameters of a single predictor: `max(4 log2 n, 1.5 n)`.
    pub fn num_trials(&self) -> usize {
        let n = self.num_candidates() as f64;
        (4.0 * n.log2()).max(1.5 * n) as usize
    }
}

impl fmt::Display for AutoMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AutoMode::Light => f.write_str("light"),
            AutoMode::Medium => f.write_str("medium"),
            AutoMode::Heavy => f.write_str("heavy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiproConfig {
    /// When set, overrides `num_candidates`, `num_trials` and caps the validation set.
    pub auto: Option<AutoMode>,
    pub num_candidates: usize,
    pub num_trials: usize,
    pub minibatch_size: usize,
    /// Run a full validation evaluation every this many trials.
    pub minibatch_full_eval_steps: usize,
    pub max_bootstrapped_demos: usize,
    /// Labeled demos fill a mixed set only up to this total, counting its bootstrapped traces.
    pub max_labeled_demos: usize,
    pub num_threads: usize,
    pub seed: u64,
    /// Sampling temperature for instruction proposals.
    pub init_temperature: f32,
}

impl Default for MiproConfig {
    fn default() -> Self {
        Self {
            auto: Some(AutoMode::Light),
            num_candidates: 6,
            num_trials: 10,
            minibatch_size: 35,
            minibatch_full_eval_steps: 5,
            max_bootstrapped_demos: 4,
            max_labeled_demos: 4,
            num_threads: 1,
            seed: 9,
            init_temperature: 1.0,
        }
    }
}

impl MiproConfig {
    /// `(num_candidates, num_trials, val_size)` after applying the auto preset.
    pub fn resolved(&self) -> (usize, usize, usize) {
        match self.auto {
            Some(auto) => (auto.num_candidates(), auto.num_trials(), auto.val_size()),
            None => (self.num_candidates.max(1), self.num_trials, usize::MAX),
        }
    }
}

/// One scored candidate. Minibatch trials and full evaluations are both logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub number: usize,
    pub instruction_index: usize,
    pub demo_set_index: usize,
    pub score: f64,
    pub full_eval: bool,
}

#[derive(Debug, Clone)]
#[readonly::make]
pub struct OptimizedProgram {
    /// The input program with the best parameters found.
    #[readonly]
    pub program: Program,
    /// Full-validation score of `program`.
    #[readonly]
    pub best_score: f64,
    /// Full-validation score of the input program.
    #[readonly]
    pub baseline_score: f64,
    #[readonly]
    pub instruction_candidates: Vec<String>,
    #[readonly]
    pub trials: Vec<Trial>,
}

pub struct MiproV2 {
    metric: Metric,
    config: MiproConfig,
}

impl MiproV2 {
    pub fn new(metric: impl Fn(&Example, &Prediction) -> bool + Send + Sync + 'static) -> Self {
        Self::with_metric(Arc::new(metric))
    }

    pub fn with_metric(metric: Metric) -> Self {
        Self { metric, config: MiproConfig::default() }
    }

    pub fn with_config(mut self, config: MiproConfig) -> Self {
        self.config = config;
        self
    }

    pub fn auto(mut self, auto: AutoMode) -> Self {
        self.config.auto = Some(auto);
        self
    }

    pub fn config(&self) -> &MiproConfig {
        &self.config
    }

    /// Search instructions and demos for `program` on `trainset`. The input program is not modified.
    pub async fn compile<L: LanguageModel + ?Sized>(&self, program: &Program, lm: &L, trainset: &[Example]) -> Result<OptimizedProgram> {
        if trainset.len() < 2 {
            bail!("MIPROv2 needs at least 2 training examples, got {}", trainset.len());
        }
        let (num_candidates, num_trials, val_size) = self.config.resolved();
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let split = (trainset.len() / 5).clamp(1, trainset.len() - 1);
        let (bootstrap_part, valset) = trainset.split_at(split);
        let valset: Vec<Example> = valset.iter().take(val_size).cloned().collect();
        info!("MIPROv2 ({}): {} bootstrap examples, {} validation examples, {} candidates, {} trials",
            self.config.auto.map(|a| a.to_string()).unwrap_or_else(|| "manual".to_string()),
            bootstrap_part.len(), valset.len(), num_candidates, num_trials);

        info!("==> STEP 1: BOOTSTRAP FEWSHOT EXAMPLES <==");
        let traces = self.bootstrap(program, lm, bootstrap_part).await;
        let demo_sets = self.demo_sets(program, &traces, bootstrap_part, num_candidates, &mut rng);

        info!("==> STEP 2: PROPOSE INSTRUCTION CANDIDATES <==");
        let instructions = self.propose_instructions(program, lm, bootstrap_part, &demo_sets, num_candidates, &mut rng).await;
        for (i, instruction) in instructions.iter().enumerate() {
            info!("{}: {}", i, instruction);
        }

        info!("==> STEP 3: FINDING OPTIMAL PROMPT PARAMETERS <==");
        let candidate = |i: usize, d: usize| {
            let mut candidate = program.clone();
            candidate.set_params(ProgramParams { instructions: instructions[i].clone(), demos: demo_sets[d].clone() });
            candidate
        };
        let mut trials = Vec::new();
        let mut fully_evaluated = BTreeSet::new();
        let baseline_score = self.score(&candidate(0, 0), lm, valset.clone()).await;
        fully_evaluated.insert((0, 0));
        trials.push(Trial { number: 0, instruction_index: 0, demo_set_index: 0, score: baseline_score, full_eval: true });
        info!("Default program score: {:.1}", baseline_score);
        let mut best = (0, 0);
        let mut best_score = baseline_score;

        let mut minibatch_scores: BTreeMap<(usize, usize), (f64, usize)> = BTreeMap::new();
        let minibatch_size = self.config.minibatch_size.clamp(1, valset.len());
        let full_eval_steps = self.config.minibatch_full_eval_steps.max(1);
        for number in 1..=num_trials {
            let pair = (rng.gen_range(0..instructions.len()), rng.gen_range(0..demo_sets.len()));
            let minibatch: Vec<Example> = valset.choose_multiple(&mut rng, minibatch_size).cloned().collect();
            let score = self.score(&candidate(pair.0, pair.1), lm, minibatch).await;
            info!("== Trial {} / {} - Minibatch == score {:.1} with instruction {} and demo set {}",
                number, num_trials, score, pair.0, pair.1);
            trials.push(Trial { number, instruction_index: pair.0, demo_set_index: pair.1, score, full_eval: false });
            let entry = minibatch_scores.entry(pair).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;

            if number % full_eval_steps != 0 && number != num_trials {
                continue;
            }
            let promising = minibatch_scores.iter()
                .filter(|(pair, _)| !fully_evaluated.contains(*pair))
                .map(|(pair, (sum, n))| (*pair, sum / *n as f64))
                .fold(None, |acc: Option<((usize, usize), f64)>, (pair, mean)| match acc {
                    Some((_, best_mean)) if best_mean >= mean => acc,
                    _ => Some((pair, mean)),
                });
            let Some((pair, _)) = promising else {
                continue;
            };
            let score = self.score(&candidate(pair.0, pair.1), lm, valset.clone()).await;
            fully_evaluated.insert(pair);
            info!("== Trial {} / {} - Full Evaluation == score {:.1} with instruction {} and demo set {}",
                number, num_trials, score, pair.0, pair.1);
            trials.push(Trial { number, instruction_index: pair.0, demo_set_index: pair.1, score, full_eval: true });
            if score > best_score {
                info!("new best full-evaluation score: {:.1}", score);
                best = pair;
                best_score = score;
            }
        }

        info!("returning instruction {} with demo set {}, scoring {:.1} (baseline {:.1})", best.0, best.1, best_score, baseline_score);
        Ok(OptimizedProgram {
            program: candidate(best.0, best.1),
            best_score,
            baseline_score,
            instruction_candidates: instructions,
            trials,
        })
    }

    async fn score<L: LanguageModel + ?Sized>(&self, program: &Program, lm: &L, examples: Vec<Example>) -> f64 {
        Evaluate::with_metric(examples, self.metric.clone())
            .num_threads(self.config.num_threads)
            .run(program, lm)
            .await
            .score
    }

    /// Run `program` on `examples` and keep every passing trace as a demo, in example order.
    async fn bootstrap<L: LanguageModel + ?Sized>(&self, program: &Program, lm: &L, examples: &[Example]) -> Vec<Example> {
        if self.config.max_bootstrapped_demos == 0 {
            return Vec::new();
        }
        let metric = &self.metric;
        let traces: Vec<Option<Example>> = stream::iter(examples.iter())
            .map(|example| async move {
                match program.call(lm, example).await {
                    Ok(prediction) if metric(example, &prediction) => Some(prediction.into_demo(example)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("bootstrap call failed, skipping example: {:#}", e);
                        None
                    }
                }
            })
            .buffered(self.config.num_threads.max(1))
            .collect()
            .await;
        let traces: Vec<Example> = traces.into_iter().flatten().collect();
        info!("bootstrapped {} passing traces out of {} examples", traces.len(), examples.len());
        traces
    }

    /// Set 0 holds the program's current demos, set 1 labeled examples only, the rest mix
    /// bootstrapped traces with labeled examples.
    fn demo_sets(&self, program: &Program, traces: &[Example], labeled: &[Example], n: usize, rng: &mut StdRng) -> Vec<Vec<Example>> {
        let max_boot = self.config.max_bootstrapped_demos;
        let max_labeled = self.config.max_labeled_demos;
        let mut sets = vec![program.demos().to_vec()];
        if n > 1 {
            sets.push(labeled.choose_multiple(rng, max_labeled).cloned().collect());
        }
        while sets.len() < n {
            let boot_count = if traces.is_empty() || max_boot == 0 { 0 } else { rng.gen_range(1..=max_boot) };
            let mut set: Vec<Example> = traces.choose_multiple(rng, boot_count).cloned().collect();
            let fill: Vec<&Example> = labeled.iter()
                .filter(|example| !set.iter().any(|demo| demo.inputs() == example.inputs()))
                .collect();
            let room = max_labeled.saturating_sub(set.len());
            set.extend(fill.choose_multiple(rng, room).map(|example| (*example).clone()));
            sets.push(set);
        }
        debug!("demo set sizes: {:?}", sets.iter().map(Vec::len).collect::<Vec<_>>());
        sets
    }

    /// Candidate 0 is the current instruction, the rest are proposed by `lm`. A failed or empty
    /// proposal falls back to the current instruction.
    async fn propose_instructions<L: LanguageModel + ?Sized>(
        &self,
        program: &Program,
        lm: &L,
        examples: &[Example],
        demo_sets: &[Vec<Example>],
        n: usize,
        rng: &mut StdRng,
    ) -> Vec<String> {
        let current = program.instructions().to_string();
        let mut instructions = vec![current.clone()];
        if n < 2 {
            return instructions;
        }
        let proposer = match Program::predict(PROPOSER_SIGNATURE) {
            Ok(proposer) => {
                let mut proposer = proposer;
                proposer.set_instructions(PROPOSER_INSTRUCTIONS);
                proposer
            }
            Err(e) => {
                warn!("cannot build the instruction proposer: {:#}", e);
                return vec![current; n];
            }
        };
        let dataset_sample = examples.iter()
            .take(PROPOSER_SAMPLE_SIZE)
            .map(render_example)
            .collect::<Vec<_>>()
            .join("\n\n");
        let program_signature = format!("{} ({})", program.signature(), program.strategy());
        for i in 1..n {
            let tip = *TIPS.choose(rng).unwrap_or(&"");
            let demos = demo_sets.get(i).or_else(|| demo_sets.last()).map(Vec::as_slice).unwrap_or(&[]);
            let program_demos = if demos.is_empty() {
                "No demos.".to_string()
            } else {
                demos.iter().map(render_example).collect::<Vec<_>>().join("\n\n")
            };
            let request = Example::from_pairs([
                ("dataset_sample", dataset_sample.as_str()),
                ("program_signature", program_signature.as_str()),
                ("program_demos", program_demos.as_str()),
                ("current_instruction", current.as_str()),
                ("tip", tip),
            ]);
            let options = CallOptions { temperature: Some(self.config.init_temperature), rollout_id: Some(i as u64) };
            let proposal = match proposer.call_with(lm, &request, options).await {
                Ok(prediction) => prediction.text("proposed_instruction").trim().to_string(),
                Err(e) => {
                    warn!("instruction proposal {} failed: {:#}", i, e);
                    String::new()
                }
            };
            instructions.push(if proposal.is_empty() { current.clone() } else { proposal });
        }
        instructions
    }
}

fn render_example(example: &Example) -> String {
    example.data().iter()
        .map(|(k, v)| format!("{}: {}", k, crate::filler::render_value(v)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod test_optimize {
    use lazy_static::lazy_static;
    use regex::Regex;

    use super::{AutoMode, MiproConfig, MiproV2};
    use crate::evaluate::answer_exact_match;
    use crate::example::Example;
    use crate::program::Program;
    use crate::utils::llm::{FnLm, LmRequest};

    lazy_static! {
        static ref NUMBER_RE: Regex = Regex::new(r"item (\d+)").unwrap();
    }

    fn trainset(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| Example::from_pairs([("question", format!("What is the id of item {}?", i)), ("answer", i.to_string())])
                .with_inputs(["question"]))
            .collect()
    }

    /// Proposes "Instruction variant <rollout>", and answers correctly only under variant 1.
    fn scripted_lm() -> FnLm {
        FnLm::new("scripted", |request: &LmRequest| {
            let system = &request.messages[0].content;
            if system.contains("`proposed_instruction`") {
                return Ok(format!("[[ ## proposed_instruction ## ]]\nInstruction variant {}", request.rollout_id.unwrap_or(0)));
            }
            let last = &request.messages.last().unwrap().content;
            let id = NUMBER_RE.captures(last).map(|c| c[1].to_string()).unwrap_or_default();
            let answer = if system.contains("Instruction variant 1") { id } else { "unknown".to_string() };
            Ok(format!("[[ ## reasoning ## ]]\nLook up the item.\n\n[[ ## answer ## ]]\n{}", answer))
        })
    }

    fn config() -> MiproConfig {
        MiproConfig {
            auto: None,
            num_candidates: 2,
            num_trials: 12,
            minibatch_size: 5,
            minibatch_full_eval_steps: 3,
            num_threads: 4,
            ..MiproConfig::default()
        }
    }

    #[test]
    fn test_auto_presets() {
        assert_eq!(AutoMode::Light.num_trials(), 10);
        assert_eq!(AutoMode::Medium.num_trials(), 18);
        assert_eq!(AutoMode::Heavy.num_trials(), 27);
        assert_eq!(MiproConfig::default().resolved(), (6, 10, 100));
        assert_eq!(config().resolved(), (2, 12, usize::MAX));
    }

    #[tokio::test]
    async fn test_compile_finds_better_instruction() {
        let program = Program::chain_of_thought("question -> answer").unwrap();
        let optimizer = MiproV2::new(answer_exact_match).with_config(config());
        let result = optimizer.compile(&program, &scripted_lm(), &trainset(20)).await.unwrap();
        assert_eq!(result.baseline_score, 0.0);
        assert_eq!(result.best_score, 100.0);
        assert_eq!(result.program.instructions(), "Instruction variant 1");
        assert_eq!(result.instruction_candidates.len(), 2);
        assert!(result.program.signature().same_shape(program.signature()));
        assert_eq!(result.program.strategy(), program.strategy());
        assert!(result.trials.iter().any(|t| t.full_eval && t.score == 100.0));
        // the input program is untouched
        assert_eq!(program.instructions(), "Given the fields `question`, produce the fields `answer`.");
    }

    #[tokio::test]
    async fn test_compile_is_deterministic() {
        let program = Program::chain_of_thought("question -> answer").unwrap();
        let optimizer = MiproV2::new(answer_exact_match).with_config(config());
        let first = optimizer.compile(&program, &scripted_lm(), &trainset(20)).await.unwrap();
        let second = optimizer.compile(&program, &scripted_lm(), &trainset(20)).await.unwrap();
        assert_eq!(first.trials, second.trials);
        assert_eq!(first.program.params(), second.program.params());
    }

    #[tokio::test]
    async fn test_bootstrap_keeps_passing_traces() {
        let mut program = Program::chain_of_thought("question -> answer").unwrap();
        program.set_instructions("Instruction variant 1");
        let lm = FnLm::new("even-only", |request: &LmRequest| {
            let last = &request.messages.last().unwrap().content;
            let id: usize = NUMBER_RE.captures(last).map(|c| c[1].parse().unwrap()).unwrap();
            let answer = if id % 2 == 0 { id.to_string() } else { "odd".to_string() };
            Ok(format!("[[ ## reasoning ## ]]\nitem {} checked\n\n[[ ## answer ## ]]\n{}", id, answer))
        });
        let optimizer = MiproV2::new(answer_exact_match).with_config(config());
        let traces = optimizer.bootstrap(&program, &lm, &trainset(6)).await;
        assert_eq!(traces.len(), 3);
        for trace in &traces {
            assert!(trace.get_str("reasoning").unwrap().ends_with("checked"));
            assert!(trace.input_keys().contains("question"));
        }
    }

    #[test]
    fn test_demo_sets_shape() {
        use rand::SeedableRng;
        let program = Program::predict("question -> answer").unwrap();
        let labeled = trainset(10);
        let traces: Vec<Example> = labeled[..3].iter().map(|e| e.with_field("answer", "traced")).collect();
        let optimizer = MiproV2::new(answer_exact_match);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let sets = optimizer.demo_sets(&program, &traces, &labeled, 5, &mut rng);
        assert_eq!(sets.len(), 5);
        assert!(sets[0].is_empty());
        assert_eq!(sets[1].len(), 4);
        assert!(sets[1].iter().all(|demo| demo.get_str("answer") != Some("traced")));
        for set in &sets[2..] {
            let traced = set.iter().filter(|demo| demo.get_str("answer") == Some("traced")).count();
            assert!((1..=3).contains(&traced));
            assert_eq!(set.len(), 4);
        }

        let optimizer = MiproV2::new(answer_exact_match).with_config(MiproConfig { max_labeled_demos: 1, ..MiproConfig::default() });
        let sets = optimizer.demo_sets(&program, &traces, &labeled, 6, &mut rng);
        assert_eq!(sets[1].len(), 1);
        for set in &sets[2..] {
            let traced = set.iter().filter(|demo| demo.get_str("answer") == Some("traced")).count();
            assert!(traced >= 1);
            assert_eq!(set.len(), traced);
        }
    }

    #[tokio::test]
    async fn test_too_small_trainset() {
        let program = Program::predict("question -> answer").unwrap();
        let optimizer = MiproV2::new(answer_exact_match);
        assert!(optimizer.compile(&program, &scripted_lm(), &trainset(1)).await.is_err());
    }
}
