//! Runs a feedback session for a sample transfer instruction.
//!
//! With no argument the loop runs in-process; with an address it runs
//! against a round service.

use hkp_client::HkpClient;
use hkp_core::{
    HkpError, HkpResult, Pipeline, PipelineConfig, RoleLevel, RoundOutcome, StructuredInput,
};

fn sample_input() -> StructuredInput {
    StructuredInput::new("transfer", RoleLevel::L4)
        .with_entity("amount", "75000 USD")
        .with_entity("to_account", "7395-8845-2291")
        .with_entity("from_account", "1559-6623-4401")
}

fn env_number<T: std::str::FromStr>(name: &str) -> HkpResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| HkpError::Validation(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

fn print_outcome(outcome: &RoundOutcome) {
    println!(
        "round {}: params ({:.3}, {:.3}, {:.3}) score {:.3} [{}] mode {}",
        outcome.round,
        outcome.params.entropy(),
        outcome.params.cipher_strength(),
        outcome.params.role_decay(),
        outcome.report.score,
        outcome.report.protection,
        outcome.calibration.mode,
    );
    for (name, value) in outcome.report.factors.iter() {
        println!("    {:<24} {:.3}", name, value);
    }
}

#[tokio::main]
async fn main() -> HkpResult<()> {
    tracing_subscriber::fmt::init();

    let seed: Option<u64> = env_number("HKP_SEED")?;
    let rounds: u32 = env_number("HKP_ROUNDS")?.unwrap_or(3);
    let input = sample_input();

    match std::env::args().nth(1) {
        None => {
            let mut config = PipelineConfig::default().with_max_rounds(rounds);
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }
            let pipeline = Pipeline::new(config);

            println!("Running {} local round(s)", rounds);
            let outcomes = pipeline.run_feedback_loop(&input, &mut pipeline.rng())?;
            outcomes.iter().for_each(print_outcome);

            if let Some(last) = outcomes.last() {
                println!("\nLast mimic:\n{}", serde_json::to_string_pretty(&last.mimic)?);
            }
        }
        Some(addr) => {
            println!("Connecting to {}", addr);
            let mut client = HkpClient::connect(&addr).await?;
            if let Some(seed) = seed {
                client = client.with_seed(seed);
            }

            let responses = client.run_feedback_loop(&input, rounds).await?;
            for response in &responses {
                response
                    .results
                    .iter()
                    .filter_map(|r| r.outcome())
                    .for_each(print_outcome);
            }
            println!("\nSession ended in state {:?}", client.state());
        }
    }

    Ok(())
}
