use clap::{ArgAction, Parser, Subcommand};
use nar::archive::{self, ArchiveOptions, HeaderInfo};
use nar::{CompressionType, DriverRegistry, NarResult, Unseekable};
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "nar", version, about = "Create, list and extract NAR archives")]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive, optionally adding files and directories
    Create {
        archive: PathBuf,
        inputs:  Vec<PathBuf>,
        /// Compression: none (default), zstd, lz4, brotli
        #[arg(short, long, default_value = "none", value_parser = parse_compression)]
        compression: CompressionType,
        /// Compression level (zstd 1-19; brotli 0-11; ignored for lz4)
        #[arg(short, long, default_value_t = archive::DEFAULT_COMPRESSION_LEVEL)]
        level: i32,
        /// Copy buffer size in KiB
        #[arg(long, default_value = "64")]
        chunk_size: usize,
    },
    /// Append files and directories, creating the archive when missing
    Append {
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs:  Vec<PathBuf>,
        /// Compression for a new archive; an existing one keeps its own
        #[arg(short, long, default_value = "none", value_parser = parse_compression)]
        compression: CompressionType,
        #[arg(short, long, default_value_t = archive::DEFAULT_COMPRESSION_LEVEL)]
        level: i32,
        #[arg(long, default_value = "64")]
        chunk_size: usize,
    },
    /// List every item (`-` reads standard input)
    List {
        archive: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write one file's content to standard output (`-` reads standard input)
    Extract {
        archive: PathBuf,
        name:    String,
    },
    /// Extract every file below a directory
    Unpack {
        archive: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show the archive header
    Info {
        archive: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("nar: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(command: Commands) -> NarResult<ExitCode> {
    let registry = DriverRegistry::with_builtin();

    match command {

        // ── Create / Append ──────────────────────────────────────────────────
        Commands::Create { archive, inputs, compression, level, chunk_size } => {
            let opts = ArchiveOptions { compression, level, chunk_size: chunk_size * 1024 };
            let added = archive::create(&archive, &inputs, &opts, &registry)?;
            println!("Created: {} ({added} files)", archive.display());
        }

        Commands::Append { archive, inputs, compression, level, chunk_size } => {
            let opts = ArchiveOptions { compression, level, chunk_size: chunk_size * 1024 };
            let added = archive::append(&archive, &inputs, &opts, &registry)?;
            println!("Appended {added} files to {}", archive.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { archive, json } => {
            let items = archive::list(open_input(&archive)?)?;
            if json {
                print_json(&items)?;
            } else {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                writeln!(out, "{:>10}  {:<8} {:<18} {:>12}  {}", "Offset", "Kind", "Flags", "Stored", "Name")?;
                for item in &items {
                    let name = match &item.name {
                        Some(name) => name.clone(),
                        None       => format!("[{}]", item.magic),
                    };
                    let marks = format!(
                        "{}{}",
                        if item.executable { "x" } else { "" },
                        if item.compressed { "c" } else { "" },
                    );
                    writeln!(
                        out,
                        "{:>10}  {:<8} {:#018x} {:>12}  {name} {marks}",
                        item.offset, item.kind, item.flags, item.length_2,
                    )?;
                }
                out.flush()?;
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { archive, name } => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let found = archive::extract(open_input(&archive)?, name.as_bytes(), &mut out, &registry)?;
            out.flush()?;
            if found.is_none() {
                eprintln!("nar: no file named {name:?} in {}", archive.display());
                return Ok(ExitCode::FAILURE);
            }
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { archive, output_dir, json } => {
            let report = archive::unpack(open_input(&archive)?, &output_dir, &registry)?;
            if json {
                print_json(&report)?;
                return Ok(ExitCode::SUCCESS);
            }
            println!(
                "Unpacked {} files ({} bytes) to {}",
                report.files, report.bytes, output_dir.display()
            );
            if report.skipped > 0 {
                println!("Skipped {} items", report.skipped);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { archive: path, json } => {
            let h = HeaderInfo::from(&archive::info(open_input(&path)?)?);
            if json {
                print_json(&h)?;
                return Ok(ExitCode::SUCCESS);
            }
            let compression = h.compression.map(|c| c.name()).unwrap_or("unknown");

            println!("── NAR archive ──────────────────────────────────────────");
            println!("  Path           {}", path.display());
            println!("  Revision       {}", h.revision);
            println!("  Compression    {} ({compression})", h.compression_code);
            println!("  Cipher         {}", h.cipher);
            println!("  Signature at   {}", h.signature_position);
            println!("  Index at       {}", h.index_position);
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ── helpers ──────────────────────────────────────────────────────────────────

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// `-` is standard input, read without seeking.
fn open_input(path: &Path) -> io::Result<Box<dyn ReadSeek>> {
    if path == Path::new("-") {
        return Ok(Box::new(Unseekable(io::stdin().lock())));
    }
    Ok(Box::new(File::open(path)?))
}

fn print_json<T: serde::Serialize>(value: &T) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    out.flush()
}

fn parse_compression(s: &str) -> Result<CompressionType, String> {
    CompressionType::from_name(s).ok_or_else(|| format!("unknown compression '{s}'"))
}
