//! # Dataset
//! Loaders for the two benchmark tasks, reading JSON-lines exports from a local directory.
//!
//! | task | files | fields kept |
//! |------|-------|-------------|
//! | [HotPotQa] | `train.jsonl`, `validation.jsonl` | `question`, `answer` |
//! | [Gsm8k] | `train.jsonl`, `test.jsonl` | `question`, `answer` (the number after `####`) |
//!
//! Every split is shuffled with a seeded RNG and then truncated, so a fixed seed over fixed files
//! always gives the same examples in the same order. Examples come back with `question` tagged as input.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;

use crate::dataset::errors::DatasetError;
use crate::example::Example;
use crate::utils::JsonMap;

pub const DATA_DIR_ENV: &str = "DECLPROMPT_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "data";

/// The root data directory, from `DECLPROMPT_DATA_DIR` or `data`.
pub fn data_dir() -> PathBuf {
    env::var(DATA_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// A training split and an evaluation split.
#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct Splits {
    #[readonly]
    pub train: Vec<Example>,
    #[readonly]
    pub dev: Vec<Example>,
}

/// Multi-hop question answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotPotQa {
    pub train_seed: u64,
    pub train_size: usize,
    pub eval_seed: u64,
    pub dev_size: usize,
    /// Keep only training rows with `level == "hard"`.
    pub only_hard_examples: bool,
}

impl Default for HotPotQa {
    fn default() -> Self {
        Self {
            train_seed: 1,
            train_size: 150,
            eval_seed: 2023,
            dev_size: 50,
            only_hard_examples: true,
        }
    }
}

impl HotPotQa {
    pub const DIR_NAME: &'static str = "hotpotqa";

    pub fn load(&self, dir: impl AsRef<Path>) -> Result<Splits> {
        let dir = dir.as_ref();
        let parse = |path: &Path, line: usize, row: &JsonMap| -> Result<(String, String), DatasetError> {
            Ok((required_str(path, line, row, "question")?, required_str(path, line, row, "answer")?))
        };
        let train_path = dir.join("train.jsonl");
        let mut train = read_jsonl(&train_path)?;
        if self.only_hard_examples {
            train.retain(|(_, row)| row.get("level").and_then(Value::as_str) == Some("hard"));
        }
        let train = to_examples(&train_path, train, parse)?;
        let dev_path = dir.join("validation.jsonl");
        let dev = to_examples(&dev_path, read_jsonl(&dev_path)?, parse)?;
        let splits = Splits {
            train: sample(train, self.train_seed, self.train_size, "train"),
            dev: sample(dev, self.eval_seed, self.dev_size, "dev"),
        };
        info!("loaded HotPotQA from {}: {} train, {} dev", dir.display(), splits.train.len(), splits.dev.len());
        Ok(splits)
    }
}

/// Grade-school math word problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gsm8k {
    pub train_seed: u64,
    pub train_size: usize,
    pub eval_seed: u64,
    pub dev_size: usize,
}

impl Default for Gsm8k {
    fn default() -> Self {
        Self { train_seed: 1, train_size: 150, eval_seed: 2023, dev_size: 50 }
    }
}

impl Gsm8k {
    pub const DIR_NAME: &'static str = "gsm8k";

    pub fn load(&self, dir: impl AsRef<Path>) -> Result<Splits> {
        let dir = dir.as_ref();
        let parse = |path: &Path, line: usize, row: &JsonMap| -> Result<(String, String), DatasetError> {
            let question = required_str(path, line, row, "question")?;
            let solution = required_str(path, line, row, "answer")?;
            let answer = final_answer(&solution)
                .ok_or_else(|| DatasetError::new(path, Some(line), "answer has no `####` final answer"))?;
            Ok((question, answer))
        };
        let train_path = dir.join("train.jsonl");
        let train = to_examples(&train_path, read_jsonl(&train_path)?, parse)?;
        let test_path = dir.join("test.jsonl");
        let dev = to_examples(&test_path, read_jsonl(&test_path)?, parse)?;
        let splits = Splits {
            train: sample(train, self.train_seed, self.train_size, "train"),
            dev: sample(dev, self.eval_seed, self.dev_size, "dev"),
        };
        info!("loaded GSM8K from {}: {} train, {} dev", dir.display(), splits.train.len(), splits.dev.len());
        Ok(splits)
    }
}

/// The final answer of a GSM8K solution: the text after the last `####`, without thousands separators.
///
/// ```
/// use declprompt::dataset::final_answer;
/// assert_eq!(final_answer("3 * 400 = 1200\n#### 1,200").as_deref(), Some("1200"));
/// assert_eq!(final_answer("no marker"), None);
/// ```
pub fn final_answer(solution: &str) -> Option<String> {
    let (_, answer) = solution.rsplit_once("####")?;
    let answer = answer.trim().replace(',', "");
    if answer.is_empty() {
        None
    } else {
        Some(answer)
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<(usize, JsonMap)>, DatasetError> {
    let text = fs::read_to_string(path)
        .map_err(|e| DatasetError::new(path, None, format!("{} (export the split as JSON lines into this path)", e)))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<JsonMap>(line)
                .map(|row| (i + 1, row))
                .map_err(|e| DatasetError::new(path, Some(i + 1), e.to_string()))
        })
        .collect()
}

fn required_str(path: &Path, line: usize, row: &JsonMap, key: &str) -> Result<String, DatasetError> {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DatasetError::new(path, Some(line), format!("missing string field `{}`", key)))
}

fn to_examples<F>(path: &Path, rows: Vec<(usize, JsonMap)>, parse: F) -> Result<Vec<Example>, DatasetError>
    where F: Fn(&Path, usize, &JsonMap) -> Result<(String, String), DatasetError> {
    rows.iter()
        .map(|(line, row)| {
            let (question, answer) = parse(path, *line, row)?;
            Ok(Example::from_pairs([("question", question), ("answer", answer)]).with_inputs(["question"]))
        })
        .collect()
}

fn sample(mut examples: Vec<Example>, seed: u64, size: usize, split: &str) -> Vec<Example> {
    examples.shuffle(&mut StdRng::seed_from_u64(seed));
    if examples.len() < size {
        warn!("requested {} {} examples but only {} are available", size, split, examples.len());
    }
    examples.truncate(size);
    examples
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;
    use std::path::{Path, PathBuf};

    /// Error when a dataset file is missing or malformed.
    #[derive(Debug, Clone)]
    pub struct DatasetError {
        pub path: PathBuf,
        pub line: Option<usize>,
        pub reason: String,
    }

    impl DatasetError {
        pub(crate) fn new(path: &Path, line: Option<usize>, reason: impl Into<String>) -> Self {
            Self { path: path.to_path_buf(), line, reason: reason.into() }
        }
    }

    impl fmt::Display for DatasetError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self.line {
                Some(line) => write!(f, "DatasetError: {}:{}: {}", self.path.display(), line, self.reason),
                None => write!(f, "DatasetError: {}: {}", self.path.display(), self.reason),
            }
        }
    }

    impl Error for DatasetError {}
}
