use anyhow::{bail, Context, Result};
use ayush_mapper::{
    init_tracing, login_failure_message, registration_failure_message, AppConfig, AppState,
    HistorySummary, MappingResult, MappingService, Registration, RequestState, SubmitOutcome,
};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

#[derive(Debug, Parser)]
#[command(
    name = "ayush-mapper",
    about = "Map AYUSH terms to ICD-11 codes through the mapping service",
    version
)]
struct Cli {
    /// Overrides AYUSH_API_BASE_URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the session tokens.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "AYUSH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "AYUSH_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "")]
        organization: String,
        /// Defaults to the part of the email before '@'.
        #[arg(long)]
        name: Option<String>,
    },
    /// Forget the stored session.
    Logout,
    /// Show the signed-in identity.
    Whoami,
    /// Map one AYUSH term.
    Map { term: String },
    /// List previous mappings, newest first.
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(url) = cli.api_url {
        config = config.with_base_url(url);
    }
    let state = AppState::initialize(config).context("failed to initialize mapping client")?;

    match cli.command {
        Command::Login { email, password } => {
            let password = SecretString::from(password);
            match state.client().login(&email, &password).await {
                Ok(identity) => println!("Signed in as {}", identity.display_name()),
                Err(err) => bail!(login_failure_message(&err)),
            }
        }
        Command::Register {
            email,
            password,
            organization,
            name,
        } => {
            let registration =
                Registration::new(email, SecretString::from(password), organization, name);
            if let Err(err) = state.client().register(&registration).await {
                bail!(registration_failure_message(&err));
            }
            println!("Registered {}. You can sign in now.", registration.username);
        }
        Command::Logout => {
            state.client().logout()?;
            println!("Signed out");
        }
        Command::Whoami => match state.session().current_identity() {
            Some(identity) => {
                println!("{} <{}>", identity.display_name(), identity.email);
                if let Some(org) = &identity.organization {
                    println!("Organization: {org}");
                }
                println!("Token expires: {}", identity.expires_at.to_rfc3339());
            }
            None => println!("Not signed in"),
        },
        Command::Map { term } => map_term(&state, &term).await?,
        Command::History => show_history(&state).await?,
    }
    Ok(())
}

async fn map_term(state: &AppState, term: &str) -> Result<()> {
    let controller = state.controller();
    let mut updates = controller.subscribe();
    let submission = controller.submit(term);
    tokio::pin!(submission);

    let outcome = loop {
        tokio::select! {
            outcome = &mut submission => break outcome,
            changed = updates.changed() => {
                if changed.is_err() {
                    continue;
                }
                if let Some(stages) = updates.borrow_and_update().progress() {
                    eprintln!("Mapping AYUSH term to modern medical terminology...");
                    for stage in stages {
                        eprintln!("  {}", stage.status_line());
                    }
                }
            }
        }
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => bail!(err.user_message()),
    };
    match outcome {
        SubmitOutcome::Applied(RequestState::Succeeded(result)) => {
            print_result(&result);
            Ok(())
        }
        SubmitOutcome::Applied(RequestState::Failed(failure)) => {
            if failure.session_ended {
                eprintln!("Session ended; run `ayush-mapper login` to sign in again.");
            }
            bail!(failure.message)
        }
        other => bail!("mapping did not complete: {other:?}"),
    }
}

async fn show_history(state: &AppState) -> Result<()> {
    let entries = match state.gateway().fetch_history().await {
        Ok(entries) => entries,
        Err(err) => bail!(err.user_message()),
    };
    if entries.is_empty() {
        println!("No mapping history found. Start by creating a new mapping.");
        return Ok(());
    }

    let summary = HistorySummary::from_entries(&entries);
    println!(
        "{} mappings, {} with 90%+ confidence, average {:.1}%",
        summary.total, summary.high_confidence, summary.average_confidence
    );
    for entry in &entries {
        println!(
            "{}  {:<20} {:<10} {:>4} ({})  {}",
            entry.created_at.format("%Y-%m-%d"),
            entry.result.term,
            entry.result.code,
            entry.result.confidence.to_string(),
            entry.result.confidence.band().as_str(),
            entry.result.disease_name
        );
    }
    Ok(())
}

fn print_result(result: &MappingResult) {
    println!("AYUSH term:   {}", result.term);
    println!("ICD-11 code:  {}", result.code);
    println!("Disease:      {}", result.disease_name);
    println!(
        "Category:     {}",
        result.disease_category.as_deref().unwrap_or("Not specified")
    );
    println!(
        "Confidence:   {} ({})",
        result.confidence,
        result.confidence.band().as_str()
    );
    if let Some(source) = &result.source {
        println!("Source:       {source}");
    }
    println!(
        "Description:  {}",
        result
            .description
            .as_deref()
            .unwrap_or("No detailed description available for this mapping.")
    );
    if let Some(explanation) = &result.explanation {
        println!("Explanation:  {explanation}");
    }
    if result.processing_steps.is_empty() {
        println!("No processing steps available.");
        return;
    }
    println!("Agent processing pipeline:");
    for step in &result.processing_steps {
        println!("  {}: {}", step.agent_name, step.output);
    }
}
