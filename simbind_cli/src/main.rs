use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "simbind")]
#[command(about = "Declarative C bindings for simulation objects - layout, symbols, headers and library checks")]
#[command(version)]
struct Cli {
    /// Log compilation and symbol resolution at debug level
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a class spec and summarize members, indices and functions
    Check {
        /// YAML class spec
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the computed C struct layout as JSON
    Layout {
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        file: PathBuf,

        /// Pretty print the JSON output
        #[arg(long = "pretty")]
        pretty: bool,
    },

    /// List every concrete function and the native symbol it binds to
    Symbols {
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        file: PathBuf,
    },

    /// Emit a C header declaring the struct and function prototypes
    Header {
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        file: PathBuf,

        /// Write the header here instead of stdout
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,

        /// Omit the field offset comments
        #[arg(long = "no-offsets")]
        no_offsets: bool,
    },

    /// List members, optionally filtered
    Members {
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        file: PathBuf,

        #[arg(long = "category", value_enum)]
        category: Option<Category>,

        /// Number of array dimensions; 0 selects scalars and counts
        #[arg(long = "ndim")]
        ndim: Option<usize>,

        /// Element type token such as `double` or `int`
        #[arg(long = "ctype")]
        ctype: Option<String>,

        /// Print summaries as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Load the native library and resolve every symbol the class needs
    Bind {
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        file: PathBuf,

        /// Shared library to load instead of the one named in the class file
        #[arg(short = 'l', long = "library", value_name = "PATH")]
        library: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Category {
    Count,
    Scalar,
    Array,
    Object,
}

fn init_tracing(verbose: bool) {
    /* RUST_LOG wins over -v */
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = match cli.command {
        Commands::Check { file } => commands::check(&file)?,
        Commands::Layout { file, pretty } => commands::layout(&file, pretty)?,
        Commands::Symbols { file } => commands::symbols(&file)?,
        Commands::Header {
            file,
            output,
            no_offsets,
        } => {
            let header = commands::header(&file, !no_offsets)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, header)?;
                    format!("Wrote {}", path.display())
                }
                None => header,
            }
        }
        Commands::Members {
            file,
            category,
            ndim,
            ctype,
            json,
        } => {
            let category = category.map(|c| match c {
                Category::Count => simbind_gen::MemberCategory::Count,
                Category::Scalar => simbind_gen::MemberCategory::Scalar,
                Category::Array => simbind_gen::MemberCategory::Array,
                Category::Object => simbind_gen::MemberCategory::Object,
            });
            commands::members(&file, category, ndim, ctype.as_deref(), json)?
        }
        Commands::Bind { file, library } => commands::bind(&file, library.as_deref())?,
    };

    print!("{output}");
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}
