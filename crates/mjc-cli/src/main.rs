use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use mjc::elf::SEGMENT_ALIGN;
use mjc::{CompileOptions, ElfExecutable, ErrorReporter, GeneratedCode, Program};

#[derive(Parser)]
#[command(name = "mjc")]
#[command(about = "Compiles resolved miniJava programs to x86-64 Linux executables")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a program tree into an executable
    Compile {
        #[arg(help = "Resolved program tree (JSON)")]
        input: PathBuf,

        #[arg(short, long, help = "Output executable")]
        output: PathBuf,

        #[arg(long, help = "Also print the instruction listing")]
        listing: bool,

        #[command(flatten)]
        options: OptionArgs,
    },
    /// Print the generated instructions without writing an executable
    Listing {
        #[arg(help = "Resolved program tree (JSON)")]
        input: PathBuf,

        #[command(flatten)]
        options: OptionArgs,
    },
}

#[derive(Args)]
struct OptionArgs {
    #[arg(long, value_parser = parse_address, default_value = "0x400000", help = "Virtual load address")]
    load_address: u64,

    #[arg(long, default_value = "main", help = "Name of the entry routine")]
    entry_name: String,

    #[arg(long, help = "Only look for the entry routine in this class")]
    entry_class: Option<String>,
}

impl From<OptionArgs> for CompileOptions {
    fn from(args: OptionArgs) -> Self {
        Self {
            load_address: args.load_address,
            entry_name: args.entry_name,
            entry_class: args.entry_class,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            output,
            listing,
            options,
        } => {
            let program = read_program(&input)?;
            let options = CompileOptions::from(options);

            let generated = generate_checked(&program, &options)?;
            if listing {
                print!("{}", generated.listing(options.load_address));
            }

            let image = ElfExecutable::from_generated(&generated, options.load_address)
                .context("Compilation failed")?;
            image
                .write_to(&output)
                .with_context(|| format!("Failed to write output to {}", output.display()))?;
            println!(
                "Compiled {} -> {} ({} bytes of code, entry {:#x})",
                input.display(),
                output.display(),
                image.code().len(),
                image.entry_address()
            );
        }
        Commands::Listing { input, options } => {
            let program = read_program(&input)?;
            let options = CompileOptions::from(options);
            let generated = generate_checked(&program, &options)?;
            print!("{}", generated.listing(options.load_address));
        }
    }

    Ok(())
}

fn read_program(path: &Path) -> Result<Program> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let program: Program = serde_json::from_str(&contents)
        .with_context(|| format!("{}: invalid program tree", path.display()))?;
    tracing::debug!(
        "loaded {} classes from {}",
        program.classes.len(),
        path.display()
    );
    Ok(program)
}

/// Runs generation once and turns any reported diagnostic into an error.
fn generate_checked(program: &Program, options: &CompileOptions) -> Result<GeneratedCode> {
    let mut reporter = ErrorReporter::new();
    let generated = mjc::generate(program, options, &mut reporter).context("Compilation failed")?;
    if reporter.has_errors() {
        return Err(mjc::Error::CompilationFailed(reporter.drain())).context("Compilation failed");
    }
    Ok(generated)
}

/// Accepts `0x`-prefixed hex or plain decimal, on a page boundary.
fn parse_address(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    let address = parsed.map_err(|e| format!("invalid address '{value}': {e}"))?;
    if address % SEGMENT_ALIGN != 0 {
        return Err(format!(
            "load address '{value}' is not a multiple of {SEGMENT_ALIGN:#x}"
        ));
    }
    Ok(address)
}
