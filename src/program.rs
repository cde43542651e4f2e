//! # Program
//! A [Signature] plus a prediction [Strategy] plus the parameters an optimizer tunes: the instruction
//! text and the few-shot demos.
//!
//! The fields of the signature never change after construction. [Program::set_params] (used by the
//! [optimizer](crate::optimize)) and [Program::load] only swap the parameters, and
//! [Program::signature] always reports the current instructions.
//!
//! ```no_run
//! use declprompt::example::Example;
//! use declprompt::program::Program;
//! use declprompt::utils::llm::OpenAiChat;
//! # async fn run() -> anyhow::Result<()> {
//! let lm = OpenAiChat::from_env()?;
//! let cot = Program::chain_of_thought("question -> answer")?;
//! let prediction = cot.call(&lm, &Example::from_pairs([("question", "What is 3 * 5?")])).await?;
//! println!("{:?} => {}", prediction.reasoning(), prediction.answer());
//! cot.save("optimized.json")?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::fmt::Formatter;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::adapter::errors::ParseError;
use crate::adapter::ChatAdapter;
use crate::example::Example;
use crate::prediction::{Prediction, REASONING_FIELD};
use crate::program::errors::{IncompatibleProgram, MissingInputs};
use crate::signature::{Field, Signature};
use crate::utils::llm::{LanguageModel, LmRequest};
use crate::utils::JsonMap;

const REASONING_DESCRIPTION: &str = "Let's think step by step in order to produce the outputs.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Ask for the outputs directly.
    Predict,
    /// Ask for a free-text `reasoning` field before the outputs.
    ChainOfThought,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Predict => f.write_str("Predict"),
            Strategy::ChainOfThought => f.write_str("ChainOfThought"),
        }
    }
}

/// The tunable part of a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramParams {
    pub instructions: String,
    pub demos: Vec<Example>,
}

/// Per-call knobs passed through to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallOptions {
    pub temperature: Option<f32>,
    pub rollout_id: Option<u64>,
}

#[derive(Clone)]
pub struct Program {
    signature: Signature,
    strategy: Strategy,
    params: ProgramParams,
    adapter: ChatAdapter,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("signature", &self.signature.to_string())
            .field("strategy", &self.strategy)
            .field("params", &self.params)
            .finish()
    }
}

impl Program {
    pub fn new(signature: Signature, strategy: Strategy) -> Result<Self> {
        if strategy == Strategy::ChainOfThought {
            signature.prepend_output(Field::new(REASONING_FIELD))?;
        }
        let params = ProgramParams {
            instructions: signature.instructions.clone(),
            demos: Vec::new(),
        };
        Ok(Self { signature, strategy, params, adapter: ChatAdapter::default() })
    }

    /// A direct-prediction program, e.g. `Program::predict("question -> answer")`.
    pub fn predict<S>(signature: S) -> Result<Self>
        where S: TryInto<Signature>, S::Error: Into<anyhow::Error> {
        Self::new(signature.try_into().map_err(Into::into)?, Strategy::Predict)
    }

    /// A chain-of-thought program, whose predictions carry an extra `reasoning` field.
    pub fn chain_of_thought<S>(signature: S) -> Result<Self>
        where S: TryInto<Signature>, S::Error: Into<anyhow::Error> {
        Self::new(signature.try_into().map_err(Into::into)?, Strategy::ChainOfThought)
    }

    pub fn with_adapter(mut self, adapter: ChatAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn params(&self) -> &ProgramParams {
        &self.params
    }

    /// The single tunable predictor of this program, under the name its parameters are reported with.
    pub fn named_predictor(&self) -> (&'static str, &ProgramParams) {
        ("predict", &self.params)
    }

    pub fn instructions(&self) -> &str {
        &self.params.instructions
    }

    pub fn demos(&self) -> &[Example] {
        &self.params.demos
    }

    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        self.params.instructions = instructions.into();
        self.sync_instructions();
    }

    pub fn set_demos(&mut self, demos: Vec<Example>) {
        self.params.demos = demos;
    }

    pub fn set_params(&mut self, params: ProgramParams) {
        self.params = params;
        self.sync_instructions();
    }

    fn sync_instructions(&mut self) {
        self.signature = self.signature.with_instructions(self.params.instructions.as_str());
    }

    /// The signature actually sent to the model: current instructions, plus `reasoning` for chain-of-thought.
    pub fn effective_signature(&self) -> Result<Signature> {
        let signature = self.signature.with_instructions(self.params.instructions.as_str());
        match self.strategy {
            Strategy::Predict => Ok(signature),
            Strategy::ChainOfThought => Ok(signature.prepend_output(Field::new(REASONING_FIELD).with_description(REASONING_DESCRIPTION))?),
        }
    }

    /// The output fields a prediction of this program carries.
    pub fn output_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.signature.output_names().into_iter().map(str::to_string).collect();
        if self.strategy == Strategy::ChainOfThought {
            names.insert(0, REASONING_FIELD.to_string());
        }
        names
    }

    fn collect_inputs(&self, example: &Example) -> Result<JsonMap, MissingInputs> {
        let missing: Vec<String> = self.signature.inputs.iter()
            .filter(|f| !example.contains(&f.name))
            .map(|f| f.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(MissingInputs { missing, signature: self.signature.to_string() });
        }
        Ok(self.signature.inputs.iter()
            .filter_map(|f| example.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect())
    }

    /// Run the program on the input fields of `example`. Other fields of the example are ignored.
    pub async fn call<L: LanguageModel + ?Sized>(&self, lm: &L, example: &Example) -> Result<Prediction> {
        self.call_with(lm, example, CallOptions::default()).await
    }

    pub async fn call_with<L: LanguageModel + ?Sized>(&self, lm: &L, example: &Example, options: CallOptions) -> Result<Prediction> {
        let inputs = self.collect_inputs(example)?;
        let signature = self.effective_signature()?;
        let messages = self.adapter.format(&signature, &self.params.demos, &inputs)?;
        let mut request = LmRequest::new(messages);
        request.temperature = options.temperature;
        request.rollout_id = options.rollout_id;
        let response = lm.complete(&request).await?;
        debug!("{} reply from {}: {}", self.strategy, lm.model_name(), response.text);
        let fields = self.adapter.parse(&signature, &response.text)?;
        if self.strategy == Strategy::ChainOfThought && Self::blank_reasoning(&fields) {
            return Err(ParseError {
                missing_fields: vec![REASONING_FIELD.to_string()],
                expected_fields: signature.output_names().into_iter().map(str::to_string).collect(),
                raw_response: response.text,
            }.into());
        }
        Ok(Prediction::new(fields))
    }

    /// A rationale that is absent, not a string, or only whitespace.
    fn blank_reasoning(fields: &JsonMap) -> bool {
        fields.get(REASONING_FIELD)
            .and_then(serde_json::Value::as_str)
            .map_or(true, |r| r.trim().is_empty())
    }

    /// Write the parameters, along with the shape they belong to, to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let saved = SavedProgram {
            strategy: self.strategy,
            signature: SavedSignature {
                inputs: self.signature.inputs.clone(),
                outputs: self.signature.outputs.clone(),
                instructions: self.params.instructions.clone(),
            },
            demos: self.params.demos.clone(),
            metadata: json!({ "dependency_versions": { env!("CARGO_PKG_NAME"): env!("CARGO_PKG_VERSION") } }),
        };
        let text = serde_json::to_string_pretty(&saved)?;
        fs::write(path, text).with_context(|| format!("cannot write program to {}", path.display()))?;
        info!("saved {} program with {} demos to {}", self.strategy, self.params.demos.len(), path.display());
        Ok(())
    }

    /// Restore parameters saved by [Program::save] into this program.
    ///
    /// Fails with [IncompatibleProgram] if the file was saved from a program of another strategy or
    /// with other field names. The signature of `self` is never replaced.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("cannot read program from {}", path.display()))?;
        let saved: SavedProgram = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a saved program", path.display()))?;
        if saved.strategy != self.strategy {
            return Err(IncompatibleProgram::new(path, format!("saved as {}, loading into {}", saved.strategy, self.strategy)).into());
        }
        let saved_signature = Signature::from_fields(saved.signature.inputs, saved.signature.outputs)
            .map_err(|reason| IncompatibleProgram::new(path, reason))?;
        if !saved_signature.same_shape(&self.signature) {
            return Err(IncompatibleProgram::new(path, format!("saved for `{}`, loading into `{}`", saved_signature, self.signature)).into());
        }
        self.set_params(ProgramParams {
            instructions: saved.signature.instructions,
            demos: saved.demos,
        });
        info!("loaded {} demos from {}", self.params.demos.len(), path.display());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedSignature {
    inputs: Vec<Field>,
    outputs: Vec<Field>,
    instructions: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedProgram {
    strategy: Strategy,
    signature: SavedSignature,
    demos: Vec<Example>,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;
    use std::path::{Path, PathBuf};

    /// Error when an input field of the signature is absent from the example passed to a program.
    #[derive(Debug, Clone)]
    pub struct MissingInputs {
        pub missing: Vec<String>,
        pub signature: String,
    }

    impl fmt::Display for MissingInputs {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "MissingInputs: signature `{}` requires inputs {:?}", self.signature, self.missing)
        }
    }

    impl Error for MissingInputs {}

    /// Error when a saved program does not fit the program it is loaded into.
    #[derive(Debug, Clone)]
    pub struct IncompatibleProgram {
        pub path: PathBuf,
        pub reason: String,
    }

    impl IncompatibleProgram {
        pub(crate) fn new(path: &Path, reason: impl Into<String>) -> Self {
            Self { path: path.to_path_buf(), reason: reason.into() }
        }
    }

    impl fmt::Display for IncompatibleProgram {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "IncompatibleProgram: cannot load {}: {}", self.path.display(), self.reason)
        }
    }

    impl Error for IncompatibleProgram {}
}

#[cfg(test)]
mod test_program {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::errors::{IncompatibleProgram, MissingInputs};
    use crate::adapter::errors::ParseError;
    use super::{CallOptions, Program, ProgramParams, Strategy};
    use crate::example::Example;
    use crate::signature::Signature;
    use crate::utils::llm::{FnLm, LmRequest};

    /// Answers every arithmetic word problem with the same fields, and echoes the instruction count.
    fn math_lm() -> FnLm {
        FnLm::new("scripted", |request: &LmRequest| {
            let system = &request.messages[0].content;
            if system.contains("`reasoning`") {
                Ok("[[ ## reasoning ## ]]\n1000 - 2 * 250 - 3 * 150 = 50\n\n[[ ## answer ## ]]\n50\n\n[[ ## completed ## ]]".to_string())
            } else {
                Ok("[[ ## answer ## ]]\n50\n\n[[ ## completed ## ]]".to_string())
            }
        })
    }

    fn question() -> Example {
        Example::from_pairs([("question", "Taro has 1000 yen. He buys two 250-yen notebooks and three 150-yen pencils. How much is left?")])
    }

    #[tokio::test]
    async fn test_predict_returns_answer() {
        let program = Program::predict("question -> answer").unwrap();
        let prediction = program.call(&math_lm(), &question()).await.unwrap();
        assert!(prediction.answer().parse::<i64>().is_ok());
        assert_eq!(prediction.reasoning(), None);
    }

    #[tokio::test]
    async fn test_chain_of_thought_adds_reasoning() {
        let program = Program::chain_of_thought("question -> answer").unwrap();
        assert_eq!(program.output_names(), vec!["reasoning", "answer"]);
        let prediction = program.call(&math_lm(), &question()).await.unwrap();
        assert_eq!(prediction.answer(), "50");
        assert!(!prediction.reasoning().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chain_of_thought_rejects_blank_reasoning() {
        let program = Program::chain_of_thought("question -> answer").unwrap();
        for reply in ["[[ ## reasoning ## ]]\n\n[[ ## answer ## ]]\n50", "[[ ## reasoning ## ]]\n   \n[[ ## answer ## ]]\n50"] {
            let lm = FnLm::new("blank-reasoning", move |_: &LmRequest| Ok(reply.to_string()));
            let err = program.call(&lm, &question()).await.unwrap_err();
            let err = err.downcast_ref::<ParseError>().expect("ParseError");
            assert_eq!(err.missing_fields, vec!["reasoning".to_string()]);
        }
        // a plain Predict program does not ask for a rationale at all
        let lm = FnLm::new("no-reasoning", |_: &LmRequest| Ok("[[ ## answer ## ]]\n50".to_string()));
        let prediction = Program::predict("question -> answer").unwrap().call(&lm, &question()).await.unwrap();
        assert_eq!(prediction.answer(), "50");
    }

    #[tokio::test]
    async fn test_missing_inputs() {
        let program = Program::predict("context, question -> answer").unwrap();
        let err = program.call(&math_lm(), &question()).await.unwrap_err();
        let err = err.downcast_ref::<MissingInputs>().expect("MissingInputs");
        assert_eq!(err.missing, vec!["context".to_string()]);
    }

    #[test]
    fn test_constructors_accept_signatures() {
        let signature = Signature::parse("context, question -> answer").unwrap().with_instructions("Answer briefly.");
        let program = Program::chain_of_thought(signature).unwrap();
        assert_eq!(program.instructions(), "Answer briefly.");
        assert_eq!(program.named_predictor().0, "predict");
        assert!(Program::predict("question answer").is_err());
    }

    #[test]
    fn test_signature_follows_instructions() {
        let mut program = Program::predict("question -> answer").unwrap();
        program.set_instructions("Answer with a number.");
        assert_eq!(program.signature().instructions, "Answer with a number.");
        assert_eq!(program.signature().input_names(), vec!["question"]);
        let params = ProgramParams { instructions: "Be brief.".to_string(), demos: Vec::new() };
        program.set_params(params);
        assert_eq!(program.signature().instructions, "Be brief.");
        assert_eq!(program.effective_signature().unwrap().instructions, "Be brief.");
    }

    #[test]
    fn test_reasoning_name_clash() {
        assert!(Program::chain_of_thought("question -> reasoning").is_err());
        assert!(Program::predict("question -> reasoning").is_ok());
    }

    #[tokio::test]
    async fn test_call_options_reach_the_model() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_lm = seen.clone();
        let lm = FnLm::new("options", move |request: &LmRequest| {
            assert_eq!(request.temperature, Some(1.0));
            seen_in_lm.store(request.rollout_id.unwrap_or(0) as usize, Ordering::SeqCst);
            Ok("[[ ## answer ## ]]\nok".to_string())
        });
        let program = Program::predict("question -> answer").unwrap();
        program.call_with(&lm, &question(), CallOptions { temperature: Some(1.0), rollout_id: Some(7) }).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optimized.json");
        let lm = FnLm::new("echo-system", |request: &LmRequest| {
            // the reply depends on the whole prompt, so identical prompts give identical predictions
            Ok(format!("[[ ## reasoning ## ]]\n{}\n\n[[ ## answer ## ]]\n{}", request.messages.len(), request.messages[0].content.len()))
        });

        let mut optimized = Program::chain_of_thought("question -> answer").unwrap();
        optimized.set_instructions("Solve the arithmetic word problem and answer with a number.");
        optimized.set_demos(vec![
            Example::from_pairs([("question", "2 + 3?"), ("reasoning", "2 + 3 = 5"), ("answer", "5")]).with_inputs(["question"]),
        ]);
        optimized.save(&path).unwrap();

        let mut restored = Program::chain_of_thought("question -> answer").unwrap();
        restored.load(&path).unwrap();
        assert_eq!(restored.params(), optimized.params());
        assert_eq!(restored.signature().instructions, restored.instructions());

        let before = optimized.call(&lm, &question()).await.unwrap();
        let after = restored.call(&lm, &question()).await.unwrap();
        assert_eq!(before, after);

        let baseline = Program::chain_of_thought("question -> answer").unwrap();
        assert_ne!(baseline.call(&lm, &question()).await.unwrap(), after);
    }

    #[test]
    fn test_load_rejects_other_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.json");
        Program::chain_of_thought("question -> answer").unwrap().save(&path).unwrap();

        let mut predict = Program::predict("question -> answer").unwrap();
        let err = predict.load(&path).unwrap_err();
        assert!(err.downcast_ref::<IncompatibleProgram>().is_some());

        let mut other_fields = Program::chain_of_thought("context, question -> answer").unwrap();
        let err = other_fields.load(&path).unwrap_err();
        assert!(err.downcast_ref::<IncompatibleProgram>().is_some());
        assert_eq!(other_fields.strategy(), Strategy::ChainOfThought);
        assert_eq!(other_fields.signature().input_names(), vec!["context", "question"]);
    }

    #[test]
    fn test_load_missing_file() {
        let mut program = Program::predict("question -> answer").unwrap();
        assert!(program.load("/definitely/not/here.json").is_err());
    }
}
