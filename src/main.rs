#![allow(clippy::result_large_err)]

use anyhow::{anyhow, Context};
use std::collections::BTreeSet;
use std::path::PathBuf;
use telemetry_manager::app::TelemetryManager;
use telemetry_manager::backpressure::AdmissionGate;
use telemetry_manager::config::manifest::load_dir;
use telemetry_manager::config::ManagerConfig;
use telemetry_manager::pipeline::PipelineKind;
use telemetry_manager::synthesis::synthesize;
use telemetry_manager::telemetry;

enum CliCommand {
    Run {
        config_path: Option<String>,
    },
    Render {
        config_path: Option<String>,
        kind: PipelineKind,
        dir: PathBuf,
    },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_cli_args()? {
        CliCommand::Run { config_path } => {
            telemetry::init_tracing().context("failed to initialise telemetry")?;
            let settings = ManagerConfig::load_from(config_path.as_deref())
                .context("failed to load configuration")?
                .resolve()
                .context("invalid configuration")?;

            let manager = TelemetryManager::standalone(&settings)
                .context("failed to construct telemetry manager")?;

            manager.run().await.context("telemetry manager runtime error")
        }
        CliCommand::Render {
            config_path,
            kind,
            dir,
        } => run_render_command(config_path.as_deref(), kind, dir),
        CliCommand::Help => {
            print_help();
            Ok(())
        }
    }
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("expected path after {arg}"))?;
                config_path = Some(value);
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other if other.starts_with('-') => anyhow::bail!("unrecognised argument `{other}`"),
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    match positional.next().as_deref() {
        None => Ok(CliCommand::Run { config_path }),
        Some("render") => {
            let kind = positional
                .next()
                .ok_or_else(|| anyhow!("render requires a pipeline kind"))?;
            let kind = PipelineKind::parse(&kind)
                .ok_or_else(|| anyhow!("unknown pipeline kind `{kind}` (logs|metrics|traces)"))?;
            let dir = positional
                .next()
                .ok_or_else(|| anyhow!("render requires a manifest directory"))?;
            if let Some(extra) = positional.next() {
                anyhow::bail!("unexpected argument `{extra}`");
            }
            Ok(CliCommand::Render {
                config_path,
                kind,
                dir: PathBuf::from(dir),
            })
        }
        Some(other) => anyhow::bail!("unknown command `{other}`"),
    }
}

fn run_render_command(
    config_path: Option<&str>,
    kind: PipelineKind,
    dir: PathBuf,
) -> anyhow::Result<()> {
    let settings = ManagerConfig::load_from(config_path)
        .context("failed to load configuration")?
        .resolve()
        .context("invalid configuration")?;
    let pipelines = load_dir(&dir)
        .with_context(|| format!("failed to load manifests from {}", dir.display()))?
        .into_iter()
        .filter(|pipeline| pipeline.kind() == kind && !pipeline.is_being_deleted())
        .collect();

    let max_pipelines = settings.kind(kind).and_then(|entry| entry.max_pipelines);
    let decision = AdmissionGate::new(max_pipelines).decide(pipelines, &BTreeSet::new(), None);
    for (pipeline, rejection) in &decision.rejected {
        eprintln!(
            "skipping {} `{}`: {}",
            kind.resource_kind(),
            pipeline.name(),
            rejection.message()
        );
    }

    let synthesized = synthesize(kind, &decision.admitted, &settings.synthesis)
        .context("failed to synthesize collector configuration")?;
    let artifact = synthesized
        .artifact()
        .context("failed to render collector configuration")?;

    print!("{}", artifact.yaml);
    eprintln!("fingerprint {}", artifact.fingerprint);
    Ok(())
}

fn print_help() {
    println!(
        "\
Usage: telemetry-manager [OPTIONS]
       telemetry-manager [OPTIONS] render <KIND> <DIR>

Options:
  -c, --config <PATH>    Path to the manager configuration file
  -h, --help             Print this help message

Render:
  <KIND>                 logs, metrics or traces
  <DIR>                  Directory of pipeline manifests (*.yaml, *.yml)
"
    );
}
