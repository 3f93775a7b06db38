use anyhow::Result;
use aoede_core::types::Turn;
use aoede_memory::ConsolidationEngine;
use aoede_pipeline::{FeedbackSignal, Pipeline, TurnOutcome};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How often the background task checks affect decay and the sleep window.
const MAINTENANCE_TICK: Duration = Duration::from_secs(600);
/// Per-tick pull of every affect channel toward its baseline.
const AFFECT_DECAY_RATE: f64 = 0.05;

pub async fn run(
    pipeline: Arc<Pipeline>,
    consolidation: Arc<ConsolidationEngine>,
    user: String,
    one_shot: Option<String>,
) -> Result<()> {
    if let Some(text) = one_shot {
        let outcome = pipeline.handle_turn(&Turn::new(user.as_str(), text)).await;
        println!("{}", outcome.text);
        return Ok(());
    }

    println!("Aoede online. Rate the last reply with '+' or '-', comment with 'e <text>'.");
    println!("'/sleep' consolidates memory now. 'quit' exits.");

    let maintenance = tokio::spawn(maintenance_loop(pipeline.clone(), consolidation.clone()));

    let mut rl = DefaultEditor::new()?;
    loop {
        let line = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(trimmed);

        match trimmed {
            "quit" | "exit" => break,
            "+" => feedback(&pipeline, &user, FeedbackSignal::Up).await,
            "-" => feedback(&pipeline, &user, FeedbackSignal::Down).await,
            "/sleep" => match consolidation.run_now().await {
                Ok(report) => crate::print_sleep_report(&report),
                Err(e) => println!("Sleep failed: {}", e),
            },
            _ if trimmed == "e" || trimmed.starts_with("e ") => {
                let body = trimmed.trim_start_matches('e').trim();
                if body.is_empty() {
                    println!("Usage: e <comment on the last reply>");
                } else {
                    feedback(&pipeline, &user, FeedbackSignal::Text(body.to_string())).await;
                }
            }
            text => {
                let outcome = pipeline.handle_turn(&Turn::new(user.as_str(), text)).await;
                print_outcome(&outcome);
            }
        }
    }

    maintenance.abort();
    println!("Until next time.");
    Ok(())
}

/// Ticks affect decay and lets consolidation fire when its nightly window
/// opens. Bandit decay piggybacks on a performed sleep batch so both run at
/// most once per rest cycle.
async fn maintenance_loop(pipeline: Arc<Pipeline>, consolidation: Arc<ConsolidationEngine>) {
    let mut tick = tokio::time::interval(MAINTENANCE_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        pipeline.affect().decay(AFFECT_DECAY_RATE).await;
        match consolidation.run_scheduled().await {
            Ok(report) if report.performed => {
                if let Err(e) = pipeline.bandit().decay().await {
                    warn!(error = %e, "bandit decay after sleep failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "scheduled consolidation failed"),
        }
    }
}

async fn feedback(pipeline: &Pipeline, user: &str, signal: FeedbackSignal) {
    let target = match pipeline.store().last_assistant_message_id(user).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            println!("Nothing to rate yet.");
            return;
        }
        Err(e) => {
            println!("Feedback failed: {}", e);
            return;
        }
    };
    match pipeline.ingest_feedback(target, signal).await {
        Ok(()) => println!("Noted."),
        Err(e) => println!("Feedback failed: {}", e),
    }
}

fn print_outcome(outcome: &TurnOutcome) {
    for tool in &outcome.tool_outcomes {
        match &tool.error {
            Some(error) => println!("  [{}: {}]", tool.name, error),
            None => println!("  [{} ok]", tool.name),
        }
    }
    println!("\nAoede: {}\n", outcome.text);
}
