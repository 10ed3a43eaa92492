//! Minimal host shell: runs a JavaScript file inside the runtime.
//!
//!     cargo run --example shell -- script.js
//!     RUST_LOG=jsbox=debug cargo run --example shell -- --config jsbox.toml script.js

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jsbox::{Runtime, RuntimeConfig};

#[derive(Parser)]
#[command(name = "shell", about = "Run a JavaScript file inside the jsbox runtime")]
struct Args {
    /// Host-side script to execute.
    script: PathBuf,

    /// TOML runtime configuration (cwd, env, mode).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print captured console entries as JSON instead of plain text.
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RuntimeConfig::from_toml_path(path)?,
        None => RuntimeConfig::default(),
    };
    let runtime = Runtime::builder().config(config).build()?;

    let code = std::fs::read_to_string(&args.script)?;
    let name = args
        .script
        .file_name()
        .map(|n| format!("/{}", n.to_string_lossy()))
        .unwrap_or_else(|| "/script.js".to_owned());

    let outcome = runtime.execute(&code, Some(&name))?;
    for entry in &outcome.console {
        if args.json {
            println!(
                "{}",
                serde_json::json!({ "method": entry.method, "args": entry.args })
            );
        } else {
            let rendered: Vec<String> = entry.args.iter().map(|a| a.to_string()).collect();
            eprintln!("[{}] {}", entry.method, rendered.join(" "));
        }
    }
    println!("{}", outcome.exports.to_json()?);

    runtime.destroy().await;
    Ok(())
}
