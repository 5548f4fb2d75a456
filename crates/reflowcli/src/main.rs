// crates/reflowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reflowcore::{EventKind, EventSubscription, FlowEvent, NodeInstance, Value, Workflow};
use reflowruntime::{ExecutionResult, FlowRuntime, NodeRegistry, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reflow")]
#[command(about = "Reflow workflow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Node fields as JSON: {"nodeId": {"property": value}}
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the final workflow state here
        #[arg(short, long)]
        save: Option<PathBuf>,

        /// Register a workflow file as a node type: TYPE=FILE
        #[arg(long = "sub", value_name = "TYPE=FILE")]
        subs: Vec<String>,
    },

    /// Re-run one node of a saved workflow and everything downstream of it
    FineTune {
        /// Workflow state previously written by `run --save`
        #[arg(short, long)]
        file: PathBuf,

        /// Node to re-run
        #[arg(short, long)]
        node: String,

        /// Field overrides for the node: PROPERTY=JSON
        #[arg(long = "set", value_name = "PROPERTY=JSON")]
        sets: Vec<String>,

        /// Write the final workflow state here (defaults to --file)
        #[arg(short, long)]
        save: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long = "sub", value_name = "TYPE=FILE")]
        subs: Vec<String>,
    },

    /// Validate a workflow file without running it
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,

        #[arg(long = "sub", value_name = "TYPE=FILE")]
        subs: Vec<String>,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            save,
            subs,
        } => {
            run_workflow(file, input, config, save, subs).await?;
        }

        Commands::FineTune {
            file,
            node,
            sets,
            save,
            config,
            subs,
        } => {
            fine_tune_workflow(file, node, sets, save, config, subs).await?;
        }

        Commands::Validate { file, subs } => {
            validate_workflow(file, subs)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing workflow {}", path.display()))
}

/// Standard nodes plus every `TYPE=FILE` sub-workflow
fn build_registry(subs: &[String], config: &RuntimeConfig) -> Result<NodeRegistry> {
    let mut base = NodeRegistry::new();
    reflownodes::register_all(&mut base);
    if subs.is_empty() {
        return Ok(base);
    }

    // sub-workflows resolve their inner nodes against the standard library
    let inner = Arc::new({
        let mut registry = NodeRegistry::new();
        reflownodes::register_all(&mut registry);
        registry
    });
    for sub in subs {
        let Some((name, file)) = sub.split_once('=') else {
            bail!("--sub expects TYPE=FILE, got {}", sub);
        };
        let workflow = load_workflow(Path::new(file))?;
        let node_type = config.sub_workflow(workflow, Arc::clone(&inner)).node_type(name)?;
        base.register(node_type);
    }
    Ok(base)
}

fn build_runtime(config: Option<PathBuf>, subs: &[String]) -> Result<FlowRuntime> {
    let config = match config {
        Some(path) => RuntimeConfig::from_json_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let registry = build_registry(subs, &config)?;
    Ok(FlowRuntime::with_registry(Arc::new(registry), config))
}

/// Apply `{"nodeId": {"property": value}}` to the workflow's nodes
fn apply_input(workflow: &mut Workflow, input: &str) -> Result<()> {
    let json: serde_json::Value = serde_json::from_str(input)?;
    let serde_json::Value::Object(nodes) = json else {
        bail!("Input must be a JSON object keyed by node id");
    };
    for (node_id, fields) in nodes {
        let serde_json::Value::Object(fields) = fields else {
            bail!("Input for node {} must be an object", node_id);
        };
        let node = workflow
            .find_node_mut(&node_id)
            .with_context(|| format!("input names unknown node {}", node_id))?;
        for (property, value) in fields {
            node.set(&property, Value::from(value));
        }
    }
    Ok(())
}

fn print_events(events: EventSubscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = events;
        while let Some(event) = events.recv().await {
            print_event(&event);
            if event.kind.is_workflow_terminal() {
                break;
            }
        }
    })
}

fn print_event(event: &FlowEvent) {
    let node_id = event.node_id.as_deref().unwrap_or("-");
    match event.kind {
        EventKind::WorkflowStart => println!("▶️  Workflow started"),
        EventKind::NodeStart => println!("  ⚡ Starting node: {}", node_id),
        EventKind::NodeEmit => println!("  📨 Node {} emitted", node_id),
        EventKind::NodeSuccess => println!("  ✅ Node {} completed", node_id),
        EventKind::NodeFail => {
            let message = event
                .payload
                .as_ref()
                .and_then(|p| p["error"]["message"].as_str())
                .unwrap_or("unknown error");
            println!("  ❌ Node {} failed: {}", node_id, message);
        }
        EventKind::NodeUpdated => {
            if let Some(message) = event.payload.as_ref().and_then(|p| p["message"].as_str()) {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
        }
        EventKind::WorkflowComplete | EventKind::WorkflowFail => {
            let duration = event
                .payload
                .as_ref()
                .and_then(|p| p["durationMs"].as_u64())
                .unwrap_or_default();
            if event.kind == EventKind::WorkflowComplete {
                println!("✨ Workflow completed successfully in {}ms", duration);
            } else {
                println!("💥 Workflow failed after {}ms", duration);
            }
        }
        EventKind::EdgeAdded | EventKind::EdgeRemoved => {}
    }
}

fn print_summary(result: &ExecutionResult) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   State: {:?}", result.state());
    println!("   Completed: {}/{} nodes", result.completed_nodes, result.total_nodes);
    let failed = result.failed_nodes();
    if !failed.is_empty() {
        println!("   Failed: {}", failed.join(", "));
    }

    let end_nodes = result.workflow.end_nodes();
    if !end_nodes.is_empty() {
        println!();
        println!("📤 Outputs:");
        for node_id in end_nodes {
            if let Some(node) = result.node(node_id) {
                let outputs = serde_json::Value::from(node.outputs());
                println!("   Node {}: {}", node_id, outputs);
            }
        }
    }
}

fn save_workflow(path: &Path, workflow: &Workflow) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(workflow)?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("💾 Saved workflow state to {}", path.display());
    Ok(())
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    config: Option<PathBuf>,
    save: Option<PathBuf>,
    subs: Vec<String>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let mut workflow = load_workflow(&file)?;
    if let Some(input) = input {
        apply_input(&mut workflow, &input)?;
    }

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let runtime = build_runtime(config, &subs)?;
    let printer = print_events(runtime.subscribe_events());
    let result = runtime.execute(&workflow).await?;
    let _ = printer.await;

    print_summary(&result);
    if let Some(path) = save {
        save_workflow(&path, &result.workflow)?;
    }
    if !result.is_success() {
        bail!("workflow {} failed", workflow.id);
    }
    Ok(())
}

async fn fine_tune_workflow(
    file: PathBuf,
    node_id: String,
    sets: Vec<String>,
    save: Option<PathBuf>,
    config: Option<PathBuf>,
    subs: Vec<String>,
) -> Result<()> {
    let workflow = load_workflow(&file)?;
    let runtime = build_runtime(config, &subs)?;
    let id = runtime.register_workflow(workflow).await;

    if !sets.is_empty() {
        let mut node: NodeInstance = runtime
            .workflow(&id)
            .await
            .and_then(|wf| wf.find_node(&node_id).cloned())
            .with_context(|| format!("unknown node {}", node_id))?;
        for set in &sets {
            let Some((property, raw)) = set.split_once('=') else {
                bail!("--set expects PROPERTY=JSON, got {}", set);
            };
            // bare words are taken as strings
            let value = serde_json::from_str::<serde_json::Value>(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            node.set(property, Value::from(value));
        }
        runtime.update_node(&id, node).await?;
    }

    println!("🔁 Fine-tuning {} from node {}", file.display(), node_id);
    let printer = print_events(runtime.subscribe_events());
    let result = runtime.fine_tune_workflow(&id, &node_id).await?;
    let _ = printer.await;

    print_summary(&result);
    save_workflow(save.as_deref().unwrap_or(file.as_path()), &result.workflow)?;
    if !result.is_success() {
        bail!("workflow {} failed", id);
    }
    Ok(())
}

fn validate_workflow(file: PathBuf, subs: Vec<String>) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(&file)?;
    let runtime = build_runtime(None, &subs)?;
    runtime.scheduler().validate(&workflow)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!(
        "   Entry nodes: {}",
        workflow
            .entry_nodes()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let mut registry = NodeRegistry::new();
    reflownodes::register_all(&mut registry);

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            let inputs: Vec<&str> = metadata.inputs.iter().map(|i| i.property.as_str()).collect();
            let outputs: Vec<&str> = metadata.outputs.iter().map(|o| o.property.as_str()).collect();
            println!("    inputs: [{}]  outputs: [{}]", inputs.join(", "), outputs.join(", "));
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut workflow = Workflow::new("Example Collector Workflow");
    workflow.description =
        Some("Two constants feed a collector whose result is serialized and logged".to_string());

    workflow.add_node(
        NodeInstance::new("first", "util.constant")
            .with_field("value", "01")
            .with_position(100.0, 50.0),
    );
    workflow.add_node(
        NodeInstance::new("second", "util.constant")
            .with_field("value", "02")
            .with_position(100.0, 150.0),
    );
    workflow.add_node(NodeInstance::new("collect", "util.collect").with_position(300.0, 100.0));
    workflow.add_node(
        NodeInstance::new("stringify", "transform.json_stringify").with_position(500.0, 100.0),
    );
    workflow.add_node(NodeInstance::new("log", "debug.log").with_position(700.0, 100.0));

    workflow.connect("first", "output", "collect", "items");
    workflow.connect("second", "output", "collect", "items");
    workflow.connect("collect", "output", "stringify", "value");
    workflow.connect("stringify", "json", "log", "message");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  reflow run --file {} --input '{{\"first\": {{\"value\": \"hello\"}}}}' --save state.json",
        output.display()
    );
    println!("Then re-run from the collector only:");
    println!("  reflow fine-tune --file state.json --node collect");

    Ok(())
}
