mod fsops;
mod image;
mod oplog;
mod shell;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use embassy_futures::block_on;
use sdfat::SECTOR_SIZE;

use fsops::{build_filter, fat_err, mount, resolve_dir, resolve_parent};
use image::{hexdump_sector, ImageDisk, StdoutConsole};
use oplog::{Op, OpLog};

#[derive(Debug, Parser)]
#[command(name = "cardctl")]
#[command(about = "FAT32 disk image inspection CLI")]
struct Cli {
    /// Append one JSON record per operation to this file (or set
    /// CARDCTL_LOG_JSON_PATH).
    #[arg(long, global = true)]
    log_json: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the mounted volume's geometry.
    Info(InfoArgs),
    /// List a directory.
    Ls(LsArgs),
    /// Stream a file to stdout.
    Cat(CatArgs),
    /// Hexdump one 512-byte sector.
    ReadBlock(ReadBlockArgs),
    /// Interactive cd/ls/cat loop.
    Shell(ShellArgs),
}

#[derive(Debug, Args)]
struct InfoArgs {
    image: PathBuf,
}

#[derive(Debug, Args)]
struct LsArgs {
    image: PathBuf,
    /// Directory path, root when omitted.
    path: Option<String>,
    /// Include hidden entries.
    #[arg(long)]
    all: bool,
    /// Add the creation date/time column.
    #[arg(long)]
    created: bool,
    /// Add the last-access date column.
    #[arg(long)]
    accessed: bool,
    /// Add the last-modified date/time column.
    #[arg(long)]
    modified: bool,
    /// Show only the 8.3 names.
    #[arg(long)]
    short: bool,
}

#[derive(Debug, Args)]
struct CatArgs {
    image: PathBuf,
    path: String,
}

#[derive(Debug, Args)]
struct ReadBlockArgs {
    image: PathBuf,
    lba: u32,
}

#[derive(Debug, Args)]
struct ShellArgs {
    image: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut oplog = OpLog::open(cli.log_json.clone())?;

    let result = match &cli.command {
        Commands::Info(args) => run_info(args, &mut oplog),
        Commands::Ls(args) => run_ls(args, &mut oplog),
        Commands::Cat(args) => run_cat(args, &mut oplog),
        Commands::ReadBlock(args) => run_read_block(args, &mut oplog),
        Commands::Shell(args) => shell::run(&args.image, &mut oplog),
    };
    if let Err(err) = &result {
        eprintln!("cardctl: {err:#}");
        oplog.record(Op::Failed {
            error: &format!("{err:#}"),
        });
        std::process::exit(1);
    }
    Ok(())
}

fn run_info(args: &InfoArgs, oplog: &mut OpLog) -> Result<()> {
    let mut disk = ImageDisk::open(&args.image)?;
    let vol = mount(&mut disk)?;
    println!("image sectors      : {}", disk.sector_count);
    println!("boot sector lba    : {}", vol.boot_sector_lba);
    println!("bytes per sector   : {}", vol.bytes_per_sector);
    println!("sectors per cluster: {}", vol.sectors_per_cluster);
    println!("reserved sectors   : {}", vol.reserved_sectors);
    println!("fat count          : {}", vol.fat_count);
    println!("fat size (sectors) : {}", vol.fat_size);
    println!("root cluster       : {}", vol.root_cluster);
    println!("fat start lba      : {}", vol.fat_start_lba);
    println!("data start lba     : {}", vol.data_start_lba);
    oplog.record(Op::Info { image: &args.image });
    Ok(())
}

fn run_ls(args: &LsArgs, oplog: &mut OpLog) -> Result<()> {
    let mut disk = ImageDisk::open(&args.image)?;
    let vol = mount(&mut disk)?;
    let path = args.path.as_deref().unwrap_or("");
    let cursor = resolve_dir(&mut disk, &vol, path)?;
    let filter = build_filter(args.all, args.created, args.accessed, args.modified, args.short);

    let mut console = StdoutConsole;
    block_on(sdfat::fat::list_dir(&mut disk, &vol, &cursor, filter, &mut console))
        .map_err(fat_err)?;
    oplog.record(Op::List {
        image: &args.image,
        path,
    });
    Ok(())
}

fn run_cat(args: &CatArgs, oplog: &mut OpLog) -> Result<()> {
    let mut disk = ImageDisk::open(&args.image)?;
    let vol = mount(&mut disk)?;
    let (cursor, name) = resolve_parent(&mut disk, &vol, &args.path)?;

    let mut console = StdoutConsole;
    block_on(sdfat::fat::print_file(&mut disk, &vol, &cursor, name, &mut console))
        .map_err(fat_err)?;
    oplog.record(Op::Cat {
        image: &args.image,
        path: &args.path,
    });
    Ok(())
}

fn run_read_block(args: &ReadBlockArgs, oplog: &mut OpLog) -> Result<()> {
    let mut disk = ImageDisk::open(&args.image)?;
    let mut sector = [0u8; SECTOR_SIZE];
    block_on(sdfat::BlockDevice::read_sector(&mut disk, args.lba, &mut sector))?;
    hexdump_sector(&sector);
    oplog.record(Op::ReadBlock {
        image: &args.image,
        lba: args.lba,
    });
    Ok(())
}
