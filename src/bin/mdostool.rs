//! Command-line front end for the MDOS filesystem toolkit.
//!
//! Grounded on `mdostool.c`'s command set and usage text, reimplemented with
//! `clap`'s derive API in place of hand-rolled `argv` parsing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use mdos_fs::file;
use mdos_fs::rib::FileType;
use mdos_fs::sector::create_image;
use mdos_fs::tools::{self, determine_file_type};
use mdos_fs::Mount;

#[derive(Parser)]
#[command(name = "mdostool")]
#[command(about = "MDOS Filesystem Utility", long_about = None)]
struct Cli {
    /// Path to the MDOS disk image (ignored by `imd2dsk`/`dsk2imd`).
    disk: PathBuf,

    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all but error-level logging.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List directory contents
    Ls,
    /// Display file contents with ASCII conversion
    Cat { filename: String },
    /// Display raw file contents without conversion
    Rawcat { filename: String },
    /// Export a file from MDOS to the local filesystem
    Get { filename: String, out: Option<PathBuf> },
    /// Import a local file into the MDOS filesystem
    Put { local: PathBuf, mdos_name: Option<String> },
    /// Create a new MDOS filesystem (1 = single-sided, 2 = double-sided)
    Mkfs { sides: u8 },
    /// Exercise seek operations on a file
    Seek { filename: String },
    /// Show detailed file information
    Info { filename: String },
    /// Show free space information
    Free,
    /// Delete a file
    Rm { filename: String },
    /// Convert an IMD archive into a flat DSK image
    Imd2dsk { input: PathBuf, output: PathBuf },
    /// Convert a flat DSK image into an IMD archive
    Dsk2imd { input: PathBuf, output: PathBuf },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    };
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match &cli.command {
        Commands::Mkfs { sides } => {
            println!(
                "Creating MDOS filesystem on {} ({} sided)...",
                cli.disk.display(),
                if *sides == 1 { "single" } else { "double" }
            );
            create_image(&cli.disk, *sides).with_context(|| "mkfs failed")?;
            println!("Filesystem created successfully!");
            return Ok(());
        }
        Commands::Imd2dsk { input, output } => {
            println!("Converting IMD to DSK format...");
            println!("Input:  {}", input.display());
            println!("Output: {}", output.display());
            mdos_fs::imd::imd_to_dsk(input, output).with_context(|| "imd2dsk failed")?;
            println!("IMD to DSK conversion completed successfully!");
            return Ok(());
        }
        Commands::Dsk2imd { input, output } => {
            println!("Converting DSK to IMD format...");
            println!("Input:  {}", input.display());
            println!("Output: {}", output.display());
            mdos_fs::imd::dsk_to_imd(input, output).with_context(|| "dsk2imd failed")?;
            println!("DSK to IMD conversion completed successfully!");
            return Ok(());
        }
        _ => {}
    }

    let need_write = matches!(cli.command, Commands::Put { .. } | Commands::Rm { .. });
    println!(
        "Mounting MDOS disk: {} ({} mode)",
        cli.disk.display(),
        if need_write { "read-write" } else { "read-only" }
    );
    let mut mount = if need_write {
        Mount::mount(&cli.disk).with_context(|| "failed to mount disk image")?
    } else {
        Mount::mount_read_only(&cli.disk).with_context(|| "failed to mount disk image")?
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Commands::Ls => {
            println!("Directory listing:");
            println!("==================");
            tools::list_files(&mut mount, &mut out).with_context(|| "ls failed")?;
        }
        Commands::Cat { filename } => {
            println!("Formatted contents of '{filename}':");
            println!("========================================");
            tools::cat_file(&mut mount, filename, &mut out, false).with_context(|| "cat failed")?;
            println!("\n========================================");
        }
        Commands::Rawcat { filename } => {
            println!("Raw contents of '{filename}':");
            println!("========================================");
            tools::cat_file(&mut mount, filename, &mut out, true).with_context(|| "rawcat failed")?;
            println!("\n========================================");
        }
        Commands::Get { filename, out: local_out } => {
            let dest = local_out.clone().unwrap_or_else(|| PathBuf::from(filename));
            println!("Exporting '{filename}' to '{}'...", dest.display());
            let bytes = tools::export_file(&mut mount, filename, dest.to_string_lossy().as_ref())
                .with_context(|| "get failed")?;
            println!("Successfully exported {bytes} bytes");
        }
        Commands::Put { local, mdos_name } => {
            let name = match mdos_name {
                Some(n) => n.clone(),
                None => local
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("local path has no filename")?,
            };
            println!("Importing '{}' as '{name}'...", local.display());
            let data = std::fs::read(local).with_context(|| "failed to read local file")?;
            let file_type = determine_file_type(&name, None);
            let payload = if file_type == FileType::Ascii {
                file::ascii_encode_for_import(&data)
            } else {
                data
            };
            if tools::stat(&mut mount, &name).is_ok() {
                file::unlink(&mut mount, &name).with_context(|| "failed to replace existing file")?;
            }
            file::create_file(&mut mount, &name, file_type, &payload).with_context(|| "put failed")?;
            println!("Successfully imported {} bytes", payload.len());
        }
        Commands::Info { filename } => {
            println!("File Information:");
            println!("=================");
            tools::file_info(&mut mount, filename, &mut out).with_context(|| "info failed")?;
        }
        Commands::Seek { filename } => {
            println!("Seek Test Results:");
            println!("==================");
            tools::test_seek(&mut mount, filename, &mut out).with_context(|| "seek failed")?;
        }
        Commands::Free => {
            let free_bytes = mdos_fs::cat::free_space(&mut mount).with_context(|| "free failed")?;
            println!("Free Space Information:");
            println!("=======================");
            println!("Free space: {free_bytes} bytes");
            println!("Free space: {} KB", free_bytes / 1024);
            println!("Free clusters: {}", free_bytes / (4 * 128));
            println!("Free sectors: {}", free_bytes / 128);
        }
        Commands::Rm { filename } => {
            let info = tools::stat(&mut mount, filename).with_context(|| "stat failed")?;
            println!("Deleting '{filename}'...");
            println!("File found: {} bytes, type {}", info.size, info.file_type.code());
            file::unlink(&mut mount, filename).with_context(|| "rm failed")?;
            println!("File '{filename}' deleted successfully");
        }
        Commands::Mkfs { .. } | Commands::Imd2dsk { .. } | Commands::Dsk2imd { .. } => unreachable!(),
    }

    Ok(())
}
