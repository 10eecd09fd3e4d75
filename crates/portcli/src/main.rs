use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use portcore::{
    ActivityEvent, ActivitySpec, ExecutionEvent, ExecutionMode, FlowDefinition, LogLevel, Value,
};
use portnodes::{standard_registry, LineScriptEvaluator};
use portruntime::{describe_flow, Engine, FlowRuntime, RunOutcome, RunReport, RuntimeConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Resume calls before an interactive run is abandoned
const MAX_RESUMES: usize = 10_000;

#[derive(Parser)]
#[command(name = "portflow")]
#[command(about = "Port-based flow engine CLI", long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow definition
    Run {
        /// Path to the flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Flow parameters as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// automatic, manual or step
        #[arg(short, long)]
        mode: Option<ExecutionMode>,

        /// Batch size for interactive work
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Parse a flow definition and print its structure
    Validate {
        /// Path to the flow JSON file
        file: PathBuf,
    },

    /// List available activity types
    Activities,

    /// Write an example flow definition
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            mode,
            max_parallel,
        } => {
            let mut config = RuntimeConfig::from_env()?;
            if let Some(max_parallel) = max_parallel {
                if max_parallel == 0 {
                    bail!("--max-parallel must be at least 1");
                }
                config.max_parallel = max_parallel;
            }
            run_flow(&file, input, mode, config).await?;
        }

        Commands::Validate { file } => {
            validate_flow(&file)?;
        }

        Commands::Activities => {
            list_activities();
        }

        Commands::Init { output } => {
            create_example_flow(&output)?;
        }
    }

    Ok(())
}

fn engine(config: RuntimeConfig) -> Engine {
    Engine::new(Arc::new(standard_registry()), config)
        .with_script_evaluator(Arc::new(LineScriptEvaluator::new()))
}

fn load_definition(file: &Path) -> Result<FlowDefinition> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a flow definition", file.display()))
}

fn parse_input(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(text) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&text)? {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(k, v)| (k, Value::from_json(v)))
            .collect()),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_flow(
    file: &Path,
    input: Option<String>,
    mode: Option<ExecutionMode>,
    config: RuntimeConfig,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());

    let definition = load_definition(file)?;
    let parameters = parse_input(input)?;

    println!("📋 Flow: {}", definition.name);
    println!("   Activities: {}", definition.activities.len());
    println!("   Connections: {}", definition.connections.len());
    println!();

    let runtime = FlowRuntime::with_engine(engine(config));

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let flow_id = runtime.register_flow(&definition).await?;
    let mut report = runtime.start(flow_id, parameters, mode).await?;
    let mut resumes = 0;

    // Manual and step runs pause; the CLI confirms every surfaced activity.
    while let RunOutcome::Paused { surfaced } = &report.outcome {
        resumes += 1;
        if resumes > MAX_RESUMES {
            bail!("flow did not finish after {} resumes", MAX_RESUMES);
        }
        for activity_id in surfaced {
            runtime.select(report.instance_id, activity_id).await?;
        }
        report = runtime.resume(report.instance_id).await?;
    }

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    print_summary(&report);
    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { instance_id, .. } => {
            println!("▶️  Run {} started", instance_id);
        }
        ExecutionEvent::ActivityStarted {
            activity_id,
            activity_type,
            ..
        } => {
            println!("  ⚡ Starting activity: {} ({})", activity_id, activity_type);
        }
        ExecutionEvent::ActivityCompleted {
            activity_id,
            ports,
            duration_ms,
            ..
        } => {
            println!(
                "  ✅ Activity {} completed in {}ms [{}]",
                activity_id,
                duration_ms,
                ports.join(", ")
            );
        }
        ExecutionEvent::ActivityFailed {
            activity_id, error, ..
        } => {
            println!("  ❌ Activity {} failed: {}", activity_id, error);
        }
        ExecutionEvent::ActivityEvent {
            activity_id, event, ..
        } => match event {
            ActivityEvent::Log { level, message } => {
                let marker = match level {
                    LogLevel::Warning => "⚠️ ",
                    LogLevel::Error => "❗",
                    _ => "ℹ️ ",
                };
                println!("     {} [{}] {}", marker, activity_id, message);
            }
            ActivityEvent::Progress { percent, message } => match message {
                Some(msg) => println!("     📊 [{}] {}% - {}", activity_id, percent, msg),
                None => println!("     📊 [{}] {}%", activity_id, percent),
            },
        },
        ExecutionEvent::RunFinished {
            outcome,
            duration_ms,
            ..
        } => {
            println!("🏁 Run {} after {}ms", outcome, duration_ms);
        }
    }
}

fn print_summary(report: &RunReport) {
    let items = report.state.queue_items();
    let finished = items.iter().filter(|item| item.status.is_terminal()).count();

    println!();
    println!("📊 Execution Summary:");
    println!("   Instance ID: {}", report.instance_id);
    println!("   Outcome: {}", report.outcome);
    println!("   Finished: {}/{} queued activities", finished, items.len());

    if let RunOutcome::Waiting { .. } = &report.outcome {
        for item in items.iter().filter(|item| item.reason.is_some()) {
            println!(
                "   ⏳ {}: {}",
                item.activity_id,
                item.reason.as_deref().unwrap_or_default()
            );
        }
    }

    let mut variables: Vec<(String, Value)> = report.state.variables().into_iter().collect();
    if !variables.is_empty() {
        variables.sort_by(|a, b| a.0.cmp(&b.0));
        println!();
        println!("📤 Variables:");
        for (name, value) in variables {
            println!("   {} = {}", name, value.to_json());
        }
    }
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let definition = load_definition(file)?;
    let flow = engine(RuntimeConfig::default()).parse(&definition)?;

    println!("✅ Flow is valid:");
    println!("{}", describe_flow(&flow));

    Ok(())
}

fn list_activities() {
    println!("📦 Available Activity Types:");
    println!();

    let registry = standard_registry();
    for activity_type in registry.list_activity_types() {
        let Some(descriptor) = registry.descriptor(&activity_type) else {
            println!("  • {}", activity_type);
            continue;
        };
        println!("  • {} ({})", activity_type, descriptor.category);
        println!("    {}", descriptor.description);
        for parameter in &descriptor.parameters {
            let default = parameter
                .default
                .as_deref()
                .map(|d| format!(" = {}", d))
                .unwrap_or_default();
            let required = if parameter.required { ", required" } else { "" };
            println!("    - {}: {}{}{}", parameter.name, parameter.kind, required, default);
        }
        let outputs: Vec<&str> = descriptor.outputs().map(|p| p.name.as_str()).collect();
        if !outputs.is_empty() {
            println!("    fires: {}", outputs.join(", "));
        }
    }
}

fn create_example_flow(output: &Path) -> Result<()> {
    let mut definition = FlowDefinition::new("Example Loop");
    definition.description = Some("Counts to three and logs every iteration".to_string());

    let start = definition.add_activity(ActivitySpec::new("start", "flow.start").with_position(100.0, 100.0));
    let repeat = definition.add_activity(
        ActivitySpec::new("repeat", "flow.loop")
            .with_name("Repeat")
            .with_parameter("iterations", "$param(times)")
            .with_parameter("variable", "i")
            .with_position(300.0, 100.0),
    );
    let log = definition.add_activity(
        ActivitySpec::new("log", "debug.log")
            .with_name("Log Iteration")
            .with_parameter("message", "iteration $var(i)")
            .with_position(500.0, 50.0),
    );
    let end = definition.add_activity(ActivitySpec::new("end", "flow.end").with_position(500.0, 200.0));

    definition.connect(start, "Out", repeat.clone(), "In");
    definition.connect(repeat.clone(), "Body", log.clone(), "In");
    definition.connect(log, "Out", repeat.clone(), "BodyComplete");
    definition.connect(repeat, "Done", end, "In");

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  portflow run --file {} --input '{{\"times\": 3}}'", output.display());

    Ok(())
}
