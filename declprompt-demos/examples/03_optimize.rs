//! Part 3: optimization.
//! Tune a chain-of-thought program with MIPROv2, compare against the baseline and save the result.

use declprompt::evaluate::{answer_exact_match, Evaluate};
use declprompt::optimize::{AutoMode, MiproConfig, MiproV2};
use declprompt::program::Program;
use declprompt_demos::{banner, budgeted_adapter, language_model, section, summary, DemoTask, DEMO_TOKEN_BUDGET, QA_SIGNATURE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    declprompt_demos::init();
    let task = DemoTask::from_env()?;
    banner(&format!("Part 3: MIPROv2 on {}", task.title()));

    let lm = language_model()?;
    let splits = task.load()?;
    println!("\n  training examples: {}", splits.train.len());
    println!("  dev examples: {}", splits.dev.len());

    let evaluator = Evaluate::new(splits.dev.clone(), answer_exact_match)
        .num_threads(4)
        .display_progress(true);

    section("Baseline: ChainOfThought, not optimized");
    // demos that would push a prompt past the budget are dropped, counted with the model's tokenizer
    let program = Program::chain_of_thought(QA_SIGNATURE)?.with_adapter(budgeted_adapter(&lm)?);
    println!("\n  prompt budget: {} tokens", DEMO_TOKEN_BUDGET);
    let baseline = evaluator.run(&program, &lm).await;
    println!("\n📊 Baseline accuracy: {:.1}%", baseline.score);

    section("Optimizing with MIPROv2 (auto = light)");
    println!("\n  1. bootstrap demos from passing traces");
    println!("  2. propose instruction candidates");
    println!("  3. search (instruction, demos) pairs on minibatches");
    let optimizer = MiproV2::new(answer_exact_match).with_config(MiproConfig {
        auto: Some(AutoMode::Light),
        num_threads: 4,
        ..MiproConfig::default()
    });
    let optimized = optimizer.compile(&program, &lm, &splits.train).await?;
    println!("\n  best validation score during the search: {:.1}%", optimized.best_score);
    println!("  trials run: {}", optimized.trials.len());
    println!("\n  optimized instructions:\n    {}", optimized.program.instructions());
    println!("  demos: {}", optimized.program.demos().len());

    section("Optimized program on the dev set");
    let result = evaluator.run(&optimized.program, &lm).await;
    println!("\n📊 Optimized accuracy: {:.1}%", result.score);

    let save_path = task.save_path();
    optimized.program.save(&save_path)?;
    println!("\n💾 Saved the optimized program to {}", save_path.display());

    summary("Part 3 summary", &format!(r#"
  baseline:  {:.1}%
  optimized: {:.1}%  ({:+.1} points)

MIPROv2 searched instructions and few-shot demos for you, driven only by data and a metric.

Next step:
  cargo run -p declprompt-demos --example 04_inference
"#, baseline.score, result.score, result.score - baseline.score));
    Ok(())
}
