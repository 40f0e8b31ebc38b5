mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_TOOL_ERROR, EXIT_VALIDATION_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "uncork",
    version,
    about = "Package working Wine prefixes into native Linux packages"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WineModeArg {
    System,
    Bundled,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Analyze a Wine prefix and report its contents.
    Analyze {
        /// Path to the Wine prefix.
        prefix: PathBuf,
    },
    /// Capture and normalize a Wine prefix into an intermediate tree.
    Capture {
        /// Path to the source Wine prefix.
        prefix: PathBuf,
        /// Output directory for the intermediate tree.
        #[arg(short, long)]
        output: PathBuf,
        /// Executable entry point: 'Name:path[:id]' (repeatable).
        #[arg(short = 'e', long = "exe")]
        exes: Vec<String>,
        /// Custom icon: 'id:path/to/icon.png' (repeatable).
        #[arg(long = "icon")]
        icons: Vec<String>,
        /// Per-executable description: 'id:text' (repeatable).
        #[arg(long = "exe-desc")]
        exe_descs: Vec<String>,
        /// Per-executable arguments: 'id:args' (repeatable).
        #[arg(long = "exe-args")]
        exe_args: Vec<String>,
        /// Application/package name (default: derived from the first executable).
        #[arg(long)]
        app_name: Option<String>,
        /// Package version.
        #[arg(long, default_value = "1.0.0")]
        app_version: String,
        /// Wine runtime mode.
        #[arg(long, value_enum, default_value_t = WineModeArg::System)]
        wine_mode: WineModeArg,
        /// Path to a Wine installation (required for bundled mode).
        #[arg(long)]
        wine_path: Option<PathBuf>,
        /// Minimum Wine version (for system mode).
        #[arg(long, default_value = "9.0")]
        min_wine_version: String,
        /// Use fuse-overlayfs at runtime instead of copying the prefix.
        #[arg(long, default_value_t = false)]
        overlay: bool,
        /// Extra exclusion glob (repeatable).
        #[arg(long = "exclude")]
        excludes: Vec<String>,
        /// Tokenize plain-text config files matching this glob (repeatable).
        #[arg(long = "text-glob")]
        text_globs: Vec<String>,
    },
    /// Build packages from an intermediate tree.
    Build {
        /// Path to the intermediate tree produced by capture.
        intermediate: PathBuf,
        /// Output directory for built packages.
        #[arg(short, long)]
        output: PathBuf,
        /// Package formats to build: deb, pacman, rpm, dir (repeatable).
        #[arg(short, long = "format")]
        formats: Vec<String>,
    },
    /// Show information about an intermediate tree.
    Info {
        /// Path to the intermediate tree.
        intermediate: PathBuf,
    },
    /// Run diagnostic checks for capture and build tooling.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("UNCORK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Analyze { prefix } => commands::analyze::run(&prefix, json_output),
        Commands::Capture {
            prefix,
            output,
            exes,
            icons,
            exe_descs,
            exe_args,
            app_name,
            app_version,
            wine_mode,
            wine_path,
            min_wine_version,
            overlay,
            excludes,
            text_globs,
        } => commands::capture::run(commands::capture::Options {
            prefix,
            output,
            exes,
            icons,
            exe_descs,
            exe_args,
            app_name,
            app_version,
            bundled: wine_mode == WineModeArg::Bundled,
            wine_path,
            min_wine_version,
            overlay,
            excludes,
            text_globs,
            json: json_output,
        }),
        Commands::Build {
            intermediate,
            output,
            formats,
        } => commands::build::run(&intermediate, &output, &formats, json_output),
        Commands::Info { intermediate } => commands::info::run(&intermediate, json_output),
        Commands::Doctor => commands::doctor::run(json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("validation error:") || msg.starts_with("manifest error:")
            {
                EXIT_VALIDATION_ERROR
            } else if msg.starts_with("tool error:") {
                EXIT_TOOL_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
