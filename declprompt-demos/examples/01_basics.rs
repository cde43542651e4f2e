//! Part 1: the basics.
//! Configure a model, declare a signature, and call it through Predict and ChainOfThought.

use declprompt::example::Example;
use declprompt::program::Program;
use declprompt::utils::llm::LanguageModel;
use declprompt_demos::{banner, language_model, section, summary};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    declprompt_demos::init();
    banner("Part 1: the basics");

    let lm = language_model()?;

    // a signature declares what goes in and what comes out; no prompt is written by hand
    section("Predict: plain question answering");
    let predict = Program::predict("question -> answer")?;
    let question = "There are 3 boxes with 5 apples each. How many apples are there in total?";
    let result = predict.call(&lm, &Example::from_pairs([("question", question)])).await?;
    println!("\n📝 Question: {}", question);
    println!("💡 Answer: {}", result.answer());

    section("ChainOfThought: step-by-step reasoning");
    let cot = Program::chain_of_thought("question -> answer")?;
    let question = "Taro has 1000 yen. He buys two 250-yen notebooks and three 150-yen pencils. How much money is left?";
    let result = cot.call(&lm, &Example::from_pairs([("question", question)])).await?;
    println!("\n📝 Question: {}", question);
    println!("🤔 Reasoning: {}", result.reasoning().unwrap_or_default());
    println!("💡 Answer: {}", result.answer());

    section("The prompt that was actually sent (inspect_history)");
    println!("\nLast request:");
    println!("{}", lm.inspect_history(1));

    summary("Part 1 summary", r#"
Core concepts:
  1. Language model  → OpenAiChat::from_env(), passed to every call
  2. Signature       → declare inputs and outputs, e.g. "question -> answer"
  3. Predict         → call the model with the signature as is
  4. ChainOfThought  → ask for reasoning before the answer

Takeaways:
  - no hand-written prompts
  - declare *what* you want, the library builds the prompt
  - Part 2 measures a baseline on a dataset

Next step:
  cargo run -p declprompt-demos --example 02_evaluate
"#);
    Ok(())
}
