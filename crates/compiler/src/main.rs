//! Bismut Compiler CLI
//!
//! Command-line interface for compiling `.mut` programs: `build` makes
//! a binary, `run` builds into a scratch directory and executes,
//! `analyze` runs the front end only and prints JSON diagnostics for
//! IDE tooling.

use bismutc::{CompilerConfig, Diagnostics};
use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "bismut")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bismut compiler - compile .mut programs to executables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct BuildOpts {
    /// Input .mut source file
    input: PathBuf,

    /// Output binary path (defaults to the input filename without .mut)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Optimized build without debug instrumentation
    #[arg(short, long)]
    release: bool,

    /// Disable the debug leak detector even in debug builds
    #[arg(long)]
    no_debug_leaks: bool,

    /// Suppress warnings
    #[arg(short, long)]
    quiet: bool,

    /// C compiler to invoke (default: gcc)
    #[arg(long, value_name = "PATH")]
    cc: Option<String>,

    /// Shorthand for --cc tcc
    #[arg(long)]
    tcc: bool,

    /// Predefine a preprocessor symbol (repeatable)
    #[arg(short = 'D', long = "define", value_name = "SYM")]
    defines: Vec<String>,

    /// Directory holding modules/, externs/ and runtime/
    #[arg(long, value_name = "DIR")]
    compiler_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .mut file to an executable
    Build {
        #[command(flatten)]
        opts: BuildOpts,
    },

    /// Build into a temporary directory and run the result
    Run {
        #[command(flatten)]
        opts: BuildOpts,
    },

    /// Run the front end only and print JSON diagnostics
    Analyze {
        /// Input .mut source file
        input: PathBuf,

        /// Predefine a preprocessor symbol (repeatable)
        #[arg(short = 'D', long = "define", value_name = "SYM")]
        defines: Vec<String>,

        /// Directory holding modules/, externs/ and runtime/
        #[arg(long, value_name = "DIR")]
        compiler_dir: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build { opts } => {
            let code = run_build(&opts);
            process::exit(code);
        }
        Commands::Run { opts } => {
            let code = run_run(&opts);
            process::exit(code);
        }
        Commands::Analyze {
            input,
            defines,
            compiler_dir,
        } => {
            let code = run_analyze(&input, defines, compiler_dir);
            process::exit(code);
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "bismut", &mut io::stdout());
        }
    }
}

fn config_from(opts: &BuildOpts) -> CompilerConfig {
    let mut config = CompilerConfig::new();
    config.defines = opts.defines.clone();
    config.release = opts.release;
    config.debug_leaks = !opts.no_debug_leaks && !opts.release;
    config.quiet = opts.quiet;
    config.compiler_dir = opts.compiler_dir.clone();
    config.cc = if opts.tcc {
        Some("tcc".to_string())
    } else {
        opts.cc.clone()
    };
    config
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    PathBuf::from(stem)
}

fn run_build(opts: &BuildOpts) -> i32 {
    let config = config_from(opts);
    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| default_output(&opts.input));
    let mut diags = Diagnostics::new();
    let result = bismutc::build_file(&opts.input, &output, &config, &mut diags);
    diags.print_human(config.quiet);
    match result {
        Ok(()) if !diags.has_errors() => 0,
        _ => 1,
    }
}

fn run_run(opts: &BuildOpts) -> i32 {
    let config = config_from(opts);
    let mut diags = Diagnostics::new();
    let result = bismutc::run_file(&opts.input, &config, &mut diags);
    diags.print_human(config.quiet);
    match result {
        Ok(code) => code,
        Err(_) => 1,
    }
}

fn run_analyze(input: &Path, defines: Vec<String>, compiler_dir: Option<PathBuf>) -> i32 {
    let mut config = CompilerConfig::new();
    config.defines = defines;
    config.compiler_dir = compiler_dir;
    let mut diags = Diagnostics::new();
    // Analysis collects everything it can; a fatal stage error simply
    // ends the pipeline early with what was gathered.
    let _ = bismutc::check_file(input, &config, &mut diags);
    let report = diags.report(&input.display().to_string());
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("failed to serialize diagnostics: {}", e);
            return 1;
        }
    }
    if diags.has_errors() {
        1
    } else {
        0
    }
}
