//! Chat command handler: interactive REPL, or one-shot when stdin is piped.

use std::io::{IsTerminal, Read, Write};
use std::pin::pin;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tweety_core::config::{self, Config};
use tweety_core::core::message::{Message, Role};
use tweety_core::core::session::{SessionController, SubmitOutcome};
use tweety_core::engine::{InferenceEngine, SimulatedEngine};
use tweety_core::models::{AVAILABLE_MODELS, ModelInfo};
use tweety_core::store::FileStore;

type Session = SessionController<SimulatedEngine, FileStore>;

pub async fn run(config: &Config) -> Result<()> {
    let model = resolve_model(&config.model)?;

    let mut engine = SimulatedEngine::new(config.load_tick(), config.delta_delay());
    load_with_progress(&mut engine, model).await?;
    info!(model = model.id, "model loaded");

    let store = FileStore::new(config::paths::session_dir());
    let mut session = SessionController::open(engine, store, config.system_prompt.clone())
        .context("open session")?;

    // If stdin is piped, answer once and exit
    if !std::io::stdin().is_terminal() {
        let mut prompt = String::new();
        std::io::stdin().lock().read_to_string(&mut prompt)?;
        if prompt.trim().is_empty() {
            bail!("No input provided via pipe");
        }
        return run_once(&mut session, &prompt).await;
    }

    run_interactive(&mut session, model).await
}

fn resolve_model(id: &str) -> Result<&'static ModelInfo> {
    ModelInfo::find_by_id(id).ok_or_else(|| {
        let known = AVAILABLE_MODELS
            .iter()
            .map(|m| m.id)
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::anyhow!("unknown model '{id}' (available: {known})")
    })
}

/// Loads a model, rendering progress on stderr so piped stdout stays clean.
async fn load_with_progress(engine: &mut SimulatedEngine, model: &ModelInfo) -> Result<()> {
    let name = model.name;
    let mut on_progress = |p: f64| {
        eprint!("\rLoading {name}... {:3.0}%", p * 100.0);
        let _ = std::io::stderr().flush();
    };
    engine
        .load(model, &mut on_progress)
        .await
        .with_context(|| format!("load model '{}'", model.id))?;
    eprintln!();
    Ok(())
}

async fn run_once(session: &mut Session, prompt: &str) -> Result<()> {
    let outcome = generate(session, Turn::Submit(prompt)).await?;
    println!();
    if let SubmitOutcome::Failed(err) = outcome {
        bail!("generation failed: {err}");
    }
    Ok(())
}

async fn run_interactive(session: &mut Session, model: &'static ModelInfo) -> Result<()> {
    let mut current_model = model;
    println!(
        "{} ({}) ready. Type /help for commands.",
        current_model.name, current_model.parameters
    );
    if !session.messages().is_empty() {
        println!("Restored {} saved messages.", session.messages().len());
        println!();
        for message in session.messages() {
            print_message(message);
        }
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        // next_line is cancel-safe, so a signal while idle just drops the
        // pending read. Ctrl+C only stops generation while one is running;
        // at the prompt it exits.
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break; // EOF
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match handle_slash(session, &mut current_model, command).await? {
                Flow::Continue => continue,
                Flow::Quit => break,
            }
        }

        let outcome = generate(session, Turn::Submit(&line)).await?;
        render_outcome(&outcome);
    }

    Ok(())
}

enum Turn<'a> {
    Submit(&'a str),
    Reload,
}

/// Drives one generation, echoing deltas to stdout. Ctrl+C stops the
/// in-flight generation instead of killing the process.
async fn generate(session: &mut Session, turn: Turn<'_>) -> Result<SubmitOutcome> {
    let stop = session.stop_handle();
    let mut on_delta = |delta: &str| {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    };

    let mut fut = pin!(async {
        match turn {
            Turn::Submit(text) => session.submit(text, &mut on_delta).await,
            Turn::Reload => session.reload(&mut on_delta).await,
        }
    });

    loop {
        tokio::select! {
            result = &mut fut => break result,
            _ = tokio::signal::ctrl_c() => {
                stop.stop();
            }
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

async fn handle_slash(
    session: &mut Session,
    current_model: &mut &'static ModelInfo,
    command: &str,
) -> Result<Flow> {
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, arg)| (name, arg.trim()));

    match name {
        "help" => {
            println!("/reload        regenerate the last reply");
            println!("/clear         start a new chat");
            println!("/models        list available models");
            println!("/model <id>    switch to another model");
            println!("/quit          exit");
        }
        "quit" | "exit" => return Ok(Flow::Quit),
        "reload" => {
            let outcome = generate(session, Turn::Reload).await?;
            if outcome == SubmitOutcome::Ignored {
                println!("Nothing to reload yet.");
            } else {
                render_outcome(&outcome);
            }
        }
        "clear" => {
            if session.clear().context("clear session")? {
                println!("Started a new chat.");
            }
        }
        "models" => {
            for model in AVAILABLE_MODELS {
                let marker = if model.id == current_model.id { "*" } else { " " };
                println!("{marker} {:<18} {}", model.id, model.name);
            }
        }
        "model" => {
            if arg.is_empty() {
                println!("Current model: {}", current_model.id);
            } else if let Some(model) = ModelInfo::find_by_id(arg) {
                load_with_progress(session.engine_mut(), model).await?;
                info!(model = model.id, "model switched");
                *current_model = model;
                println!("Switched to {}.", model.name);
            } else {
                println!("Unknown model '{arg}'. Use /models to list them.");
            }
        }
        _ => println!("Unknown command /{name}. Type /help for commands."),
    }
    Ok(Flow::Continue)
}

fn render_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Completed => println!(),
        SubmitOutcome::Stopped => {
            println!();
            println!("[stopped]");
        }
        SubmitOutcome::Failed(err) => {
            println!();
            eprintln!("Failed to generate response: {err}. The last message was removed.");
        }
        SubmitOutcome::Ignored | SubmitOutcome::Busy => {}
    }
}

fn print_message(message: &Message) {
    match message.role {
        Role::User => println!("> {}", message.content),
        Role::Assistant => {
            println!("{}", message.content);
            println!();
        }
        Role::System => {}
    }
}
