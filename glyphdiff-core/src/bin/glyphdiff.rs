use std::path::PathBuf;

use clap::{Parser, Subcommand};
use glyphdiff_core::{BatchConfig, GlyphCatalog, GlyphMatcher, Kernel, MatchConfig, TailPolicy};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "glyphdiff", about = "Match glyph outlines against a reference catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the selected kernel and every kernel this CPU supports
    Kernels,
    /// Find the catalog glyphs closest to an outline
    Match {
        /// Path to the glyph catalog (JSON)
        #[arg(long, env = "GLYPHDIFF_CATALOG")]
        catalog: PathBuf,
        /// Outline as `x,y|x,y|...`
        #[arg(long, allow_hyphen_values = true)]
        glyph: String,
        /// How vector kernels treat trailing points (truncate or remainder)
        #[arg(long, env = "GLYPHDIFF_TAIL", default_value_t = TailPolicy::Remainder)]
        tail: TailPolicy,
        /// Worker threads; defaults to the number of CPUs
        #[arg(long, env = "GLYPHDIFF_THREADS")]
        threads: Option<usize>,
        /// Largest allowed difference of any extent bound
        #[arg(long, default_value_t = 3)]
        extent_tolerance: u32,
        /// Number of matches to print
        #[arg(long, default_value_t = 1)]
        top: usize,
    },
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Kernels => {
            println!("selected: {}", Kernel::select().isa());
            for kernel in Kernel::supported() {
                println!(
                    "supported: {} ({} points per batch)",
                    kernel.isa(),
                    kernel.isa().batch_points()
                );
            }
        }
        Commands::Match {
            catalog,
            glyph,
            tail,
            threads,
            extent_tolerance,
            top,
        } => {
            let catalog = GlyphCatalog::from_path(&catalog)?;
            let mut batch = BatchConfig {
                tail,
                ..Default::default()
            };
            if let Some(threads) = threads {
                batch.max_parallelism = threads;
            }
            let config = MatchConfig {
                extent_tolerance,
                batch,
                ..Default::default()
            };
            let matcher = GlyphMatcher::with_config(catalog, Kernel::select(), config)?;
            info!(kernel = %matcher.kernel().isa(), glyphs = matcher.catalog().len(), "matching glyph");

            let ranked = matcher.rank(&glyph, top.max(1))?;
            if ranked.is_empty() {
                anyhow::bail!("no candidate glyph matched");
            }
            for found in ranked {
                let rendered = char::from_u32(found.codepoint)
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                println!("U+{:04X} {} score={}", found.codepoint, rendered, found.score);
            }
        }
    }
    Ok(())
}

fn init_logging() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,glyphdiff_core=debug".into());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}
