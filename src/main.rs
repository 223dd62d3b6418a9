use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hearth_gateway::speech::{SentenceSegmenter, SequenceAllocator, SpeechRouter};
use hearth_gateway::{Config, Daemon};

/// Hearth - voice gateway for Home Assistant
#[derive(Parser)]
#[command(name = "hearth", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "HEARTH_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// Print the resolved configuration and exit
    CheckConfig,
    /// Split text into sentences the way replies are spoken
    Segment {
        /// Text to split
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,hearth_gateway=info",
        1 => "info,hearth_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let mut config = Config::load()?;
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            Daemon::new(config).run().await?;
        }
        Command::CheckConfig => {
            let config = Config::load()?;
            print_config(&config);
        }
        Command::Segment { text } => {
            let router = SpeechRouter::default();
            let mut segmenter = SentenceSegmenter::new(SequenceAllocator::new());
            let mut segments = segmenter.push(&text);
            segments.extend(segmenter.finish());
            for segment in segments {
                println!(
                    "{:>3} [{}] {}",
                    segment.sequence_number,
                    router.route(&segment),
                    segment.text
                );
            }
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("port: {}", config.server.port);
    println!("data dir: {}", config.data_dir.display());

    println!("stt cascade:");
    for tier in &config.stt {
        println!(
            "  {}. {:<14} threshold {:.2}  timeout {}ms  {}",
            tier.spec.order,
            tier.spec.engine.as_str(),
            tier.spec.confidence_threshold,
            tier.spec.timeout_ms,
            tier.url.as_deref().unwrap_or("-")
        );
    }

    println!("intent cascade:");
    for spec in &config.intent.tiers {
        println!(
            "  {}. {:<14} threshold {:.2}  timeout {}ms",
            spec.order,
            spec.engine.as_str(),
            spec.confidence_threshold, spec.timeout_ms
        );
    }
    println!("  {} pattern rules", config.intent.patterns.len());

    let router = config.speech.router;
    println!(
        "speech: <= {} words -> {} ({}), longer -> {} ({})",
        router.word_threshold,
        router.short_engine,
        config.speech.short_url,
        router.long_engine,
        config.speech.long_url
    );
    println!(
        "session: policy {:?}, wake mode {:?}, idle timeout {}s",
        config.session.policy,
        config.session.wake_mode,
        config.session.idle_timeout.as_secs()
    );
    println!(
        "home assistant: {} (token {})",
        config.home_assistant.url,
        if config.home_assistant.token.is_some() { "set" } else { "missing" }
    );
    println!("llm: {} at {}", config.llm.model, config.llm.url);
}
