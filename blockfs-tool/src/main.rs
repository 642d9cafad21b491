//! Command-line front end for driving a `blockfs` image from the shell:
//! format a fresh image, build up a directory tree, and move file
//! contents in and out of it.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use blockfs::{Error, FS};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blockfs-tool", about = "Inspect and populate a blockfs image")]
struct Cli {
    /// Path to the backing image file.
    #[arg(short, long)]
    image: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a brand new, empty image, overwriting any existing file.
    Format,
    /// Create a directory.
    Mkdir { path: String },
    /// Create an empty file.
    Touch { path: String },
    /// Copy a local file's contents into the image.
    Put { path: String, local: PathBuf },
    /// Print a file's contents to stdout.
    Cat { path: String },
    /// List a directory's entries.
    Ls { path: String },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if matches!(cli.command, Command::Format) {
        let fs = FS::format();
        fs.unmount(&cli.image).context("writing new image")?;
        println!("formatted {}", cli.image.display());
        return Ok(());
    }

    let mut fs = FS::mount(&cli.image).context("mounting image")?;
    match cli.command {
        Command::Format => unreachable!("handled above"),
        Command::Mkdir { path } => {
            fs.mkdir(&path)?;
        }
        Command::Touch { path } => {
            fs.touch(&path)?;
        }
        Command::Put { path, local } => {
            if let Err(e) = fs.touch(&path) {
                if !matches!(e, Error::Exists(_)) {
                    return Err(e.into());
                }
            }
            let mut data = Vec::new();
            std::fs::File::open(&local)
                .with_context(|| format!("opening {}", local.display()))?
                .read_to_end(&mut data)?;
            let fd = fs.open(&path)?;
            fs.write(fd, &data)?;
            fs.close(fd)?;
        }
        Command::Cat { path } => {
            let fd = fs.open(&path)?;
            let mut out = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = fs.read(fd, &mut chunk)?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&chunk[..n]);
            }
            fs.close(fd)?;
            std::io::stdout().write_all(&out)?;
        }
        Command::Ls { path } => {
            for entry in fs.get_dir(&path)? {
                println!("{}\t{}", entry.inum, entry.name);
            }
        }
    }

    fs.unmount(&cli.image).context("writing image back to disk")?;
    Ok(())
}
