//! # declprompt
//!
//! Declarative, signature-centric prompt programs for LLM applications in Rust.
//!
//! **Note: `declprompt` is a WIP, so the APIs are subject to change.**
//!
//! ## Usage
//! `declprompt` is not released on crates.io. To use it, add a path or git dependency in `Cargo.toml`
//! ```toml
//! declprompt = { path = "../declprompt" }
//! ```
//!
//! ## Why `declprompt`
//!
//! Hand-written prompts rot: every model change means re-tuning wording and examples by hand.
//! `declprompt` lets you declare *what* a task takes and produces, and leaves the wording of the prompt,
//! the parsing of the reply and the choice of few-shot demos to the library and its optimizer.
//!
//! ## Concepts and Design
//! The APIs are meant to be explicit, so every step from a declaration to a model reply is easy to follow.
//! There is no global state: the language model is passed to every call.
//!
//! ### Signature
//!
//! A declaration of input and output fields, written in a tiny language:
//!
//! ```text
//! question -> answer
//! context, question -> answer
//! ```
//!
//! See [signature].
//!
//! ### Program
//!
//! A signature plus a strategy. [Predict](crate::program::Strategy::Predict) asks for the outputs directly,
//! [ChainOfThought](crate::program::Strategy::ChainOfThought) asks for a `reasoning` field first.
//! A program also owns the parameters an optimizer tunes: its instruction text and its few-shot demos.
//!
//! ```no_run
//! use declprompt::example::Example;
//! use declprompt::program::Program;
//! use declprompt::utils::llm::OpenAiChat;
//! # async fn run() -> anyhow::Result<()> {
//! let lm = OpenAiChat::from_env()?;
//! let qa = Program::predict("question -> answer")?;
//! let prediction = qa.call(&lm, &Example::from_pairs([("question", "What is 3 * 5?")])).await?;
//! println!("{}", prediction.answer());
//! # Ok(())
//! # }
//! ```
//!
//! ### Adapter
//!
//! The [adapter] renders a signature, its demos and the live inputs as chat messages through
//! [prompt templates](crate::prompt) and [fillers](crate::filler), and parses the reply back into fields.
//!
//! ### Evaluation and Optimization
//!
//! [Evaluate](crate::evaluate::Evaluate) scores a program over a dev set with a metric.
//! [MiproV2](crate::optimize::MiproV2) searches instructions and demos that raise that score.
//! An optimized program can be [saved](crate::program::Program::save) to JSON and
//! [loaded](crate::program::Program::load) back into a program of the same shape.
//!
//! ### Prompt Template and Placeholder
//!
//! Underneath, every message is built from a template with `{{name}}` placeholders:
//!
//! ```text
//! Your input fields are:
//! {{input_fields}}
//! ```
//!
//! A [`PartialPrompt`](crate::prompt::PartialPrompt) records which placeholder got filled by what value, and is
//! complete when no placeholder is left. Anything that fills placeholders is a filler, see
//! [`FillPlaceholders`](crate::filler::FillPlaceholders).
//!
//! ## Attribution
//! * `tiktoken-rs`: In [crate::utils::token::tiktoken], we count tokens with the `tiktoken-rs` crate.

pub mod adapter;
pub mod dataset;
pub mod evaluate;
pub mod example;
pub mod filler;
pub mod optimize;
pub mod prediction;
pub mod program;
pub mod prompt;
pub mod signature;
pub mod utils;
