use declprompt_demos::{banner, DemoTask, TASK_ENV};

fn main() -> anyhow::Result<()> {
    declprompt_demos::init();
    let task = DemoTask::from_env()?;

    banner("declprompt demo: declarative prompt programs and MIPROv2");
    println!();
    println!("Build LLM programs from signatures, measure them, and let MIPROv2 tune the prompts.");
    println!("Current task: {} (set {} to `gsm8k` or `hotpotqa`)", task.title(), TASK_ENV);
    println!();
    println!("Run the demos in this order:");
    println!();
    println!("  Step 1: cargo run -p declprompt-demos --example 01_basics");
    println!("    → signatures, Predict and ChainOfThought");
    println!();
    println!("  Step 2: cargo run -p declprompt-demos --example 02_evaluate");
    println!("    → measure the baseline accuracy on the dev set");
    println!();
    println!("  Step 3: cargo run -p declprompt-demos --example 03_optimize");
    println!("    → optimize with MIPROv2, compare scores, save {}", task.save_path().display());
    println!();
    println!("  Step 4: cargo run -p declprompt-demos --example 04_inference");
    println!("    → load the optimized program and answer new questions");
    println!();
    println!("Before you start:");
    println!("  export OPENAI_API_KEY=\"sk-...\"   (or put it in .env)");
    println!("  export the dataset as JSON lines under data/{}/", task.key());
    println!();
    Ok(())
}
