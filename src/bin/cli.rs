use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use vhd_chain_areas::{merge_backup_chain, DiskParser, VhdParser, VhdxParser};

#[derive(Parser)]
#[command(name = "vhd-chain-areas", about = "Inspect allocated areas of VHD/VHDX backup chains")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the allocated areas of a single image.
    Areas {
        image: PathBuf,
    },
    /// Merge the allocated areas across a backup chain, oldest image first.
    Merge {
        images: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Areas { image } => areas(&image),
        Command::Merge { images } => merge(&images),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn areas(image: &PathBuf) -> vhd_chain_areas::Result<()> {
    let is_vhdx = {
        use std::io::Read;
        let mut file = std::fs::File::open(image)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic).is_ok() && &magic == b"vhdxfile"
    };

    let areas = if is_vhdx {
        let parser = VhdxParser::open(image)?;
        let areas = parser.enumerate_areas()?;
        parser.close()?;
        areas
    } else {
        let parser = VhdParser::open(image)?;
        let areas = parser.enumerate_areas()?;
        parser.close()?;
        areas
    };

    print_areas(&areas);
    Ok(())
}

fn merge(images: &[PathBuf]) -> vhd_chain_areas::Result<()> {
    let areas = merge_backup_chain(images)?;
    print_areas(&areas);
    Ok(())
}

fn print_areas(areas: &[vhd_chain_areas::DataArea]) {
    println!("{:<10} {:<10}", "offset", "length");
    for area in areas {
        println!("{:<10} {:<10}", area.offset, area.length);
    }
}
