//! Part 4: save, load and reuse.
//! Load the program optimized in Part 3 and answer new questions with it.

use declprompt::example::Example;
use declprompt::program::Program;
use declprompt_demos::{banner, budgeted_adapter, language_model, load_optimized, section, summary, DemoTask, QA_SIGNATURE};

const QUESTIONS: [&str; 3] = [
    "Taro has 500 yen. He buys two 150-yen juices. How much change does he get?",
    "There are 15 boys and 18 girls in a classroom. 5 of them go home. How many are left in the classroom?",
    "Hanako reads 3 pages a day. The book has 42 pages. How many days does it take her to finish it?",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    declprompt_demos::init();
    let task = DemoTask::from_env()?;
    banner("Part 4: save, load and inference");

    let lm = language_model()?;

    section("Loading the optimized program");
    let save_path = task.save_path();
    let Some(optimized) = load_optimized(&save_path)? else {
        println!("\n❌ {} not found.", save_path.display());
        println!("   Run Part 3 first:");
        println!("   cargo run -p declprompt-demos --example 03_optimize");
        return Ok(());
    };
    let optimized = optimized.with_adapter(budgeted_adapter(&lm)?);
    println!("\n✅ Loaded the optimized program from {}", save_path.display());

    section("Answering new questions");
    for (i, question) in QUESTIONS.iter().enumerate() {
        println!("\n{}", "─".repeat(50));
        println!("📝 Question {}: {}", i + 1, question);
        println!("{}", "─".repeat(50));
        let result = optimized.call(&lm, &Example::from_pairs([("question", *question)])).await?;
        println!("🤔 Reasoning: {}", result.reasoning().unwrap_or_default());
        println!("💡 Answer: {}", result.answer());
    }

    section("Compared with the baseline (same question)");
    let baseline = Program::chain_of_thought(QA_SIGNATURE)?;
    let question = Example::from_pairs([("question", QUESTIONS[0])]);
    println!("\n📝 Question: {}", QUESTIONS[0]);
    let baseline_result = baseline.call(&lm, &question).await?;
    let optimized_result = optimized.call(&lm, &question).await?;
    println!("\n  [baseline, not optimized]");
    println!("    reasoning: {}", baseline_result.reasoning().unwrap_or_default());
    println!("    answer: {}", baseline_result.answer());
    println!("\n  [optimized, MIPROv2]");
    println!("    reasoning: {}", optimized_result.reasoning().unwrap_or_default());
    println!("    answer: {}", optimized_result.answer());

    summary("Wrap-up", r#"
What the library gives you:
  ✅ no hand-written prompts    → declare the task with a signature
  ✅ automatic optimization     → MIPROv2 finds instructions and demos from data
  ✅ reproducible and reusable  → optimized programs are saved to and loaded from JSON
  ✅ evaluation-driven          → Evaluate puts a number on every change

Hand-tuned prompt engineering:
  😰 trial and error on wording
  😰 "feels better" judgements
  😰 start over for every new model

The declarative way:
  😊 prepare data → define a metric → optimize
  😊 improvements you can measure
  😊 re-optimize when the model changes
"#);
    Ok(())
}
