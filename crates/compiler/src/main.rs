//! rcc CLI.
//!
//! Command-line interface for compiling C sources to assembly, object
//! files, or executables.

use clap::{CommandFactory, Parser as ClapParser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use rcc::{
    assemble, compile_file, link, preprocess_identity, AsmSyntax, CompilerConfig, OptFlags,
};
use std::io;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "rcc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A small C compiler emitting x86 assembly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    #[value(name = "x86_64")]
    X86_64,
    #[value(name = "i386")]
    I386,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyntaxArg {
    Att,
    Intel,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a C file to an executable
    Build {
        /// Input source file
        input: PathBuf,

        /// Output executable path (defaults to the input name without
        /// its extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the intermediate assembly file (.s)
        #[arg(long)]
        keep_asm: bool,

        #[command(flatten)]
        codegen: CodegenArgs,
    },

    /// Compile a C file to assembly text
    EmitAsm {
        /// Input source file
        input: PathBuf,

        /// Output assembly path (defaults to the input with a .s
        /// extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        codegen: CodegenArgs,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct CodegenArgs {
    /// Code generation target
    #[arg(long, value_enum, default_value = "x86_64")]
    target: TargetArg,

    /// Assembly dialect
    #[arg(long, value_enum, default_value = "att")]
    syntax: SyntaxArg,

    /// Emit .file/.loc debug directives
    #[arg(short = 'g', long)]
    debug_info: bool,

    /// Disable all optional optimization passes
    #[arg(long)]
    no_opt: bool,

    /// Struct member packing alignment (power of two; 0 = natural)
    #[arg(long, default_value_t = 0)]
    pack: u64,

    /// TOML profile with the same settings; flags override it
    #[arg(long)]
    profile: Option<PathBuf>,
}

impl CodegenArgs {
    fn into_config(self) -> Result<CompilerConfig, String> {
        let mut config = match &self.profile {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
                CompilerConfig::from_toml(&text)?
            }
            None => CompilerConfig::new(),
        };
        config = config
            .with_target(matches!(self.target, TargetArg::X86_64))
            .with_syntax(match self.syntax {
                SyntaxArg::Att => AsmSyntax::Att,
                SyntaxArg::Intel => AsmSyntax::Intel,
            })
            .with_debug_info(self.debug_info);
        if self.pack != 0 {
            if !self.pack.is_power_of_two() {
                return Err(format!("pack alignment {} is not a power of two", self.pack));
            }
            config = config.with_pack(self.pack);
        }
        if self.no_opt {
            config = config.with_opt(OptFlags::none());
        }
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let status = match cli.command {
        Commands::Build {
            input,
            output,
            keep_asm,
            codegen,
        } => cmd_build(input, output, keep_asm, codegen),
        Commands::EmitAsm {
            input,
            output,
            codegen,
        } => cmd_emit_asm(input, output, codegen),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    };

    if let Err(message) = status {
        eprintln!("{}", message);
        process::exit(1);
    }
}

fn cmd_emit_asm(
    input: PathBuf,
    output: Option<PathBuf>,
    codegen: CodegenArgs,
) -> Result<(), String> {
    let config = codegen.into_config()?;
    let output = output.unwrap_or_else(|| input.with_extension("s"));
    compile_file(&input, &output, &config, preprocess_identity).map_err(|e| e.to_string())
}

fn cmd_build(
    input: PathBuf,
    output: Option<PathBuf>,
    keep_asm: bool,
    codegen: CodegenArgs,
) -> Result<(), String> {
    let config = codegen.into_config()?;
    let exe = output.unwrap_or_else(|| input.with_extension(""));
    let asm_path = input.with_extension("s");
    let obj_path = input.with_extension("o");

    compile_file(&input, &asm_path, &config, preprocess_identity).map_err(|e| e.to_string())?;
    let result = assemble(&asm_path, &obj_path, &config)
        .and_then(|_| link(&[obj_path.clone()], &exe, &config))
        .map_err(|e| e.to_string());

    if !keep_asm {
        let _ = std::fs::remove_file(&asm_path);
    }
    let _ = std::fs::remove_file(&obj_path);
    result
}
