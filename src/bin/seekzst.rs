use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use seekzst::config::DEFAULT_ZSTD_LEVEL;
use seekzst::{EngineConfig, WriterConfig, ZstdEngine};

#[derive(Parser)]
#[command(name = "seekzst")]
#[command(about = "Create and read seekable zstd streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress a file into a seekable stream
    Compress {
        input: PathBuf,
        output: PathBuf,

        /// Uncompressed bytes between seek points (0 disables them)
        #[arg(long, default_value_t = 1_048_576)]
        seek_interval: u64,

        #[arg(long, default_value_t = DEFAULT_ZSTD_LEVEL)]
        level: i32,

        /// zstd window log (0 keeps the level's default)
        #[arg(long, default_value_t = 0)]
        window_log: u32,
    },
    /// Write a logical byte range to stdout
    Cat {
        file: PathBuf,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Bytes to print (default: to the end)
        #[arg(long)]
        length: Option<u64>,
    },
    /// Print the header and seek table
    Info { file: PathBuf },
}

const COPY_CHUNK: usize = 256 * 1024;

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let engine = ZstdEngine::new(EngineConfig::default())?;

    match cli.command {
        Command::Compress {
            input,
            output,
            seek_interval,
            level,
            window_log,
        } => {
            let mut source = File::open(&input)
                .with_context(|| format!("open input {}", input.display()))?;
            let target = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&output)
                .with_context(|| format!("create {}", output.display()))?;
            let config = WriterConfig {
                auto_seek_interval: seek_interval,
                level,
                window_log,
            };
            let mut writer = engine.create(target, config)?;
            let mut buf = vec![0u8; COPY_CHUNK];
            loop {
                let n = source.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                let written = writer.write(&buf[..n])?;
                if written != n {
                    bail!("short write to {}: {} of {} bytes", output.display(), written, n);
                }
            }
            let summary = writer.finish()?;
            println!(
                "{} -> {} bytes, {} seek points",
                summary.uncompressed_size, summary.compressed_size, summary.seek_points
            );
        }
        Command::Cat {
            file,
            offset,
            length,
        } => {
            let raw = File::open(&file).with_context(|| format!("open {}", file.display()))?;
            let mut reader = engine.open(raw)?;
            let end = match length {
                Some(len) => offset.saturating_add(len).min(reader.len()),
                None => reader.len(),
            };
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let mut buf = vec![0u8; COPY_CHUNK];
            let mut pos = offset;
            while pos < end {
                let want = buf.len().min((end - pos) as usize);
                let n = reader.read_at(pos, &mut buf[..want])?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                pos += n as u64;
            }
            out.flush()?;
        }
        Command::Info { file } => {
            let raw = File::open(&file).with_context(|| format!("open {}", file.display()))?;
            let reader = engine.open(raw)?;
            let header = reader.header();
            println!("compressor:        {:?}", header.kind);
            println!("level:             {}", header.level);
            println!("window log:        {}", header.window_log);
            println!("uncompressed size: {}", header.uncompressed_size);
            println!("seek points:       {}", header.seek_point_count);
            for (i, point) in reader.seek_points().iter().enumerate() {
                println!(
                    "  [{i:>4}] logical {:>12}  physical {:>12}",
                    point.logical_offset, point.physical_offset
                );
            }
        }
    }
    Ok(())
}
