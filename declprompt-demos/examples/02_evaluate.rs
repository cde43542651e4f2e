//! Part 2: datasets and evaluation.
//! Load the task's dataset, define a baseline and measure its exact-match accuracy.

use declprompt::evaluate::{answer_exact_match, Evaluate};
use declprompt::program::Program;
use declprompt_demos::{banner, language_model, section, summary, DemoTask};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    declprompt_demos::init();
    let task = DemoTask::from_env()?;
    banner(&format!("Part 2: evaluation on {}", task.title()));

    let lm = language_model()?;

    section("Loading the dataset");
    let splits = task.load()?;
    println!("\n  training examples: {}", splits.train.len());
    println!("  dev examples: {}", splits.dev.len());

    section("A look at the data");
    for (i, example) in splits.train.iter().take(3).enumerate() {
        println!("\n  --- example {} ---", i + 1);
        println!("  question: {}", example.get_text("question").unwrap_or_default());
        println!("  answer: {}", example.get_text("answer").unwrap_or_default());
    }

    section("Baseline program (not optimized)");
    let baseline = Program::predict("question -> answer")?;
    println!("\n  program: Predict(\"question -> answer\")");
    println!("  no reasoning, default instructions, no demos");
    let Some(example) = splits.dev.first() else {
        anyhow::bail!("the dev split is empty");
    };
    let prediction = baseline.call(&lm, example).await?;
    println!("\n  question: {}", example.get_text("question").unwrap_or_default());
    println!("  predicted: {}", prediction.answer());
    println!("  gold: {}", example.get_text("answer").unwrap_or_default());

    section("Metric");
    println!("\n  answer_exact_match: {}", answer_exact_match(example, &prediction));
    println!("  (the predicted and gold strings must be identical)");

    section("Measuring baseline accuracy...");
    let evaluator = Evaluate::new(splits.dev.clone(), answer_exact_match)
        .num_threads(4)
        .display_progress(true)
        .display_table(5);
    let result = evaluator.run(&baseline, &lm).await;
    println!("\n📊 Baseline accuracy: {:.1}%", result.score);

    summary("Part 2 summary", &format!(r#"
Baseline accuracy (not optimized): {:.1}%

Evaluation in a nutshell:
  1. Dataset             → seeded train/dev splits from local JSON lines
  2. answer_exact_match  → strict string comparison
  3. Evaluate            → batch evaluation with bounded parallelism

Part 3 improves this score with MIPROv2.

Next step:
  cargo run -p declprompt-demos --example 03_optimize
"#, result.score));
    Ok(())
}
