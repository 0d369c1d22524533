//! Command-line interface for procflow.
//!
//! Provides commands for deploying definitions, running process
//! instances, inspecting instance state, driving waiting tasks,
//! publishing messages, and resolving incidents.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config;
use crate::domain::{Command as EngineCommand, ProcessDefinition, Record, RecordBody};
use crate::engine::{Engine, Journal};

/// procflow - event-sourced process orchestration engine
#[derive(Parser, Debug)]
#[command(name = "procflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a process definition (YAML)
    Deploy {
        /// Definition file
        file: PathBuf,
    },

    /// Validate a definition file without deploying it
    Validate {
        /// Definition file
        file: PathBuf,
    },

    /// Create and run an instance of a deployed process
    Run {
        /// Process id
        process_id: String,

        /// Initial variables as a JSON object
        #[arg(short, long)]
        variables: Option<String>,
    },

    /// Show the state of a process instance
    Status {
        /// Root process instance key
        instance_key: u64,
    },

    /// List journaled process instances
    List,

    /// Complete a waiting task
    Complete {
        /// Root process instance key
        instance_key: u64,

        /// Element instance key of the task
        element_key: u64,

        /// Result variables as a JSON object
        #[arg(short, long)]
        variables: Option<String>,
    },

    /// Publish a message (correlates to subscriptions, or starts a
    /// process with a matching message start event)
    Publish {
        /// Message name
        name: String,

        /// Root process instance key to correlate into
        #[arg(short, long)]
        instance: Option<u64>,

        /// Correlation key
        #[arg(short, long, default_value = "")]
        correlation_key: String,

        /// Message variables as a JSON object
        #[arg(short, long)]
        variables: Option<String>,
    },

    /// List open incidents of a process instance
    Incidents {
        /// Root process instance key
        instance_key: u64,
    },

    /// Resolve an incident and re-drive the blocked transition
    ResolveIncident {
        /// Root process instance key
        instance_key: u64,

        /// Incident key
        incident_key: u64,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Deploy { file } => deploy(&file).await,
            Commands::Validate { file } => validate(&file),
            Commands::Run {
                process_id,
                variables,
            } => run(&process_id, variables.as_deref()).await,
            Commands::Status { instance_key } => status(instance_key).await,
            Commands::List => list().await,
            Commands::Complete {
                instance_key,
                element_key,
                variables,
            } => complete(instance_key, element_key, variables.as_deref()).await,
            Commands::Publish {
                name,
                instance,
                correlation_key,
                variables,
            } => publish(&name, instance, &correlation_key, variables.as_deref()).await,
            Commands::Incidents { instance_key } => incidents(instance_key).await,
            Commands::ResolveIncident {
                instance_key,
                incident_key,
            } => resolve_incident(instance_key, incident_key).await,
            Commands::Config => show_config(),
        }
    }
}

async fn deploy(file: &PathBuf) -> Result<()> {
    let definition = ProcessDefinition::from_file(file)?;

    // a scratch engine gives us digest/version against what is deployed
    let mut engine = load_engine()?;
    let deployed = engine.deploy(definition.clone())?;

    let target = config::definitions_dir()?.join(format!("{}.yaml", definition.id));
    tokio::fs::write(&target, serde_yaml::to_string(&definition)?)
        .await
        .with_context(|| format!("Failed to write definition: {}", target.display()))?;

    println!(
        "Deployed '{}' version {} (digest {})",
        definition.id,
        deployed.version,
        &deployed.digest[..12]
    );
    Ok(())
}

fn validate(file: &PathBuf) -> Result<()> {
    let definition = ProcessDefinition::from_file(file)?;
    definition.validate()?;
    println!(
        "'{}' is valid ({} elements)",
        definition.id,
        definition.elements.len()
    );
    Ok(())
}

async fn run(process_id: &str, variables: Option<&str>) -> Result<()> {
    let mut engine = load_engine()?;
    let variables = parse_variables(variables)?;

    let instance_key = engine.create_instance(process_id, variables)?;

    let home = config::home_dir()?;
    let journal = Journal::open(&home, instance_key).await?;
    journal.append_batch(engine.records()).await?;

    println!("Started instance {instance_key} of '{process_id}'");
    print_status(&engine, instance_key);
    Ok(())
}

async fn status(instance_key: u64) -> Result<()> {
    let (engine, _journal) = open_instance(instance_key).await?;
    print_status(&engine, instance_key);
    Ok(())
}

async fn list() -> Result<()> {
    let home = config::home_dir()?;
    let keys = Journal::list(&home).await?;

    if keys.is_empty() {
        println!("No instances");
        return Ok(());
    }
    for key in keys {
        println!("{key}");
    }
    Ok(())
}

async fn complete(instance_key: u64, element_key: u64, variables: Option<&str>) -> Result<()> {
    let (mut engine, journal) = open_instance(instance_key).await?;
    let mark = engine.records().len();

    // result variables land in the task scope before its output mappings
    for (name, value) in parse_variables(variables)? {
        engine.set_task_variable(element_key, name, value)?;
    }
    engine.submit(EngineCommand::CompleteElement {
        element_instance_key: element_key,
    });
    engine.run_to_idle()?;

    journal.append_batch(&engine.records()[mark..]).await?;
    print_status(&engine, instance_key);
    Ok(())
}

async fn publish(
    name: &str,
    instance: Option<u64>,
    correlation_key: &str,
    variables: Option<&str>,
) -> Result<()> {
    let variables = parse_variables(variables)?;
    let home = config::home_dir()?;

    match instance {
        Some(instance_key) => {
            let (mut engine, journal) = open_instance(instance_key).await?;
            let mark = engine.records().len();

            let started = engine.publish_message(name, correlation_key, variables)?;
            match started {
                Some(new_key) => {
                    // the message matched no subscription but started a new
                    // instance; its records belong to the new journal
                    let new_journal = Journal::open(&home, new_key).await?;
                    new_journal.append_batch(&engine.records()[mark..]).await?;
                    println!("Message '{name}' started new instance {new_key}");
                }
                None => {
                    let delivered = engine.records().len() > mark;
                    journal.append_batch(&engine.records()[mark..]).await?;
                    if delivered {
                        println!("Correlated '{name}' into instance {instance_key}");
                        print_status(&engine, instance_key);
                    } else {
                        println!("No open subscription for '{name}' in instance {instance_key}");
                    }
                }
            }
        }
        None => {
            let mut engine = load_engine()?;
            match engine.publish_message(name, correlation_key, variables)? {
                Some(new_key) => {
                    let journal = Journal::open(&home, new_key).await?;
                    journal.append_batch(engine.records()).await?;
                    println!("Message '{name}' started instance {new_key}");
                    print_status(&engine, new_key);
                }
                None => println!("No process with a start event for message '{name}'"),
            }
        }
    }
    Ok(())
}

async fn incidents(instance_key: u64) -> Result<()> {
    let (engine, _journal) = open_instance(instance_key).await?;
    let incidents = open_incidents(&engine);

    if incidents.is_empty() {
        println!("No open incidents");
        return Ok(());
    }
    for incident in incidents {
        println!(
            "{}  element {}  {:?}  {}",
            incident.key,
            incident.element_instance_key,
            incident.failure.kind,
            incident.failure.message
        );
    }
    Ok(())
}

async fn resolve_incident(instance_key: u64, incident_key: u64) -> Result<()> {
    let (mut engine, journal) = open_instance(instance_key).await?;
    let mark = engine.records().len();

    engine.resolve_incident(incident_key)?;

    journal.append_batch(&engine.records()[mark..]).await?;
    println!("Resolved incident {incident_key}");
    print_status(&engine, instance_key);
    Ok(())
}

fn show_config() -> Result<()> {
    let config = config::config()?;
    println!("home: {}", config.home.display());
    match &config.config_file {
        Some(path) => println!("config file: {}", path.display()),
        None => println!("config file: (none)"),
    }
    Ok(())
}

// ── helpers ──

/// Build an engine with every deployed definition loaded, in stable
/// (filename) order so definition keys match earlier sessions.
fn load_engine() -> Result<Engine> {
    let dir = config::definitions_dir()?;
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
        .with_context(|| format!("Failed to read definitions: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|e| e == "yaml").unwrap_or(false))
        .collect();
    files.sort();

    let mut engine = Engine::new();
    for file in files {
        let definition = ProcessDefinition::from_file(&file)?;
        engine.deploy(definition)?;
    }
    Ok(engine)
}

async fn open_instance(instance_key: u64) -> Result<(Engine, Journal)> {
    let home = config::home_dir()?;
    let journal = Journal::open(&home, instance_key).await?;

    let records = journal.replay().await?;
    if records.is_empty() {
        anyhow::bail!("Instance {instance_key} not found");
    }

    let mut engine = load_engine()?;
    engine.replay(&records);
    Ok((engine, journal))
}

fn parse_variables(input: Option<&str>) -> Result<Vec<(String, Value)>> {
    let Some(input) = input else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_str(input).context("Variables must be a JSON object")?;
    let Value::Object(map) = value else {
        anyhow::bail!("Variables must be a JSON object");
    };
    Ok(map.into_iter().collect())
}

fn open_incidents(engine: &Engine) -> Vec<&crate::domain::Incident> {
    engine
        .records()
        .iter()
        .filter_map(|r| match &r.body {
            RecordBody::IncidentCreated(i) => engine.state().incident(i.key),
            _ => None,
        })
        .collect()
}

fn print_status(engine: &Engine, root_key: u64) {
    match engine.state().instance(root_key) {
        Some(_) => print_subtree(engine, root_key, 0),
        None => println!(
            "Instance {root_key}: {}",
            outcome(engine.records(), root_key)
        ),
    }

    let open = open_incidents(engine);
    if !open.is_empty() {
        println!("Open incidents:");
        for incident in open {
            println!(
                "  {}  element {}  {}",
                incident.key, incident.element_instance_key, incident.failure.message
            );
        }
    }
}

fn print_subtree(engine: &Engine, key: u64, depth: usize) {
    let Some(instance) = engine.state().instance(key) else {
        return;
    };
    let indent = "  ".repeat(depth);
    println!(
        "{indent}{} [{}] {:?}",
        instance.element_id, instance.key, instance.state
    );

    if let Some(doc) = engine.state().variables.document(key) {
        for (name, value) in doc {
            println!("{indent}  {name} = {value}");
        }
    }

    for child in engine.state().children(key) {
        print_subtree(engine, child.key, depth + 1);
    }
    if instance.called_child_key != 0 {
        print_subtree(engine, instance.called_child_key, depth + 1);
    }
}

fn outcome(records: &[Record], root_key: u64) -> &'static str {
    for record in records.iter().rev() {
        match &record.body {
            RecordBody::ElementCompleted(r) if r.element_instance_key == root_key => {
                return "completed"
            }
            RecordBody::ElementTerminated(r) if r.element_instance_key == root_key => {
                return "terminated"
            }
            _ => {}
        }
    }
    "unknown"
}
