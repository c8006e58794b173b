pub mod bootstrap;
pub mod status;
pub mod unbootstrap;

use flexnode::ExecutionResult;

/// Print the per-step outcome table after a run.
pub fn print_summary(result: &ExecutionResult) {
    for step in &result.step_results {
        let marker = if step.success { "ok" } else { "FAILED" };
        println!(
            "{:<8} {:<32} {:.1}s",
            marker,
            step.step_name,
            step.duration.as_secs_f64()
        );
        if let Some(error) = &step.error {
            println!("         {}", error);
        }
    }
    println!("{}", result);
}
