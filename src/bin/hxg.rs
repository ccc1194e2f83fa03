//! hxg - Hex grid CLI
//!
//! Drives the hex grid engine against a file for inspection and patching.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use hxg::engine::{Engine, Event, Metrics, Options};
use hxg::store::{BackingStore, FileStore, MmapStore};

/// Hex grid engine driver
#[derive(Parser, Debug)]
#[command(name = "hxg")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show file info (size, address width, line count)
    Info {
        /// Input file
        file: String,

        /// Base address (hex with 0x prefix, or decimal)
        #[arg(short, long, default_value = "0")]
        base: String,
    },

    /// Hex dump a byte range through the engine window
    Dump {
        /// Input file
        file: String,

        /// Range in format "start:end" (hex with 0x prefix, or decimal)
        /// Examples: "0:100", "0x100:0x200", "100:"
        #[arg(short, long, default_value = ":")]
        range: String,

        /// Bytes per line
        #[arg(short, long, default_value = "16")]
        width: u32,

        /// Base address (hex with 0x prefix, or decimal)
        #[arg(short, long, default_value = "0")]
        base: String,
    },

    /// Patch bytes via the edit protocol (offset=hexvalue)
    Patch {
        /// Input file (modified in place)
        file: String,

        /// Patches in format "offset=hexvalue" (e.g., "0x100=FF" "0x200=DEAD")
        patches: Vec<String>,

        /// Backup file created before the first write
        #[arg(short, long)]
        backup: Option<String>,

        /// Use a memory-mapped store instead of seek+write
        #[arg(short, long)]
        mmap: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Info { file, base } => cmd_info(&file, &base),
        Command::Dump { file, range, width, base } => cmd_dump(&file, &range, width, &base),
        Command::Patch { file, patches, backup, mmap } => {
            cmd_patch(&file, &patches, backup.as_deref(), mmap)
        }
    }
}

/// Parse offset (hex with 0x prefix or decimal)
fn parse_offset(s: &str) -> Result<u64> {
    if s.starts_with("0x") || s.starts_with("0X") {
        u64::from_str_radix(&s[2..], 16).map_err(|e| anyhow::anyhow!("Invalid hex offset: {}", e))
    } else {
        s.parse().map_err(|e| anyhow::anyhow!("Invalid offset: {}", e))
    }
}

/// Parse hex string to bytes
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();

    if cleaned.is_empty() || cleaned.len() % 2 != 0 {
        bail!("Hex string must have even, non-zero length");
    }

    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|e| anyhow::anyhow!("Invalid hex: {}", e))
        })
        .collect()
}

/// Parse range string "start:end"
fn parse_range(s: &str, max_len: u64) -> Result<(u64, u64)> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        bail!("Range must be in format 'start:end'");
    }

    let start = if parts[0].is_empty() { 0 } else { parse_offset(parts[0])? };
    let end = if parts[1].is_empty() { max_len } else { parse_offset(parts[1])? };

    Ok((start, end.min(max_len)))
}

fn attach(file: &str, base: u64) -> Result<Engine> {
    let store = FileStore::open(file)?;
    let mut engine = Engine::new();
    engine.set_metrics(Metrics::default());
    // 32-line window per refill
    engine.set_view_height(32 * 21);
    engine.set_data(
        Box::new(store),
        Options { base_address: Some(base), ..Options::default() },
    );
    Ok(engine)
}

// === Commands ===

fn cmd_info(file: &str, base: &str) -> Result<()> {
    let base = parse_offset(base)?;
    let engine = attach(file, base)?;
    let layout = engine.layout();

    println!("Size: {} bytes (0x{:X})", engine.total_size(), engine.total_size());
    println!("Base address: 0x{:X}", engine.base_address());
    println!("Address width: {} digits", layout.addr_digits);
    println!("Lines: {} ({} bytes per line)", layout.total_lines, engine.bytes_per_line());

    Ok(())
}

fn cmd_dump(file: &str, range: &str, width: u32, base: &str) -> Result<()> {
    let base = parse_offset(base)?;
    let mut engine = attach(file, base)?;
    if width == 0 {
        bail!("Width must be > 0");
    }
    engine.set_bytes_per_line(width);

    let (start, end) = parse_range(range, engine.total_size())?;
    if start >= end {
        bail!("Empty range");
    }

    let digits = engine.layout().addr_digits as usize;
    let mut pos = start;
    while pos < end {
        engine.scroll_to_offset(pos);
        let window: Vec<u8> = engine.window().to_vec();
        if window.is_empty() {
            bail!("Read failed at offset 0x{:X}", pos);
        }

        for chunk in window.chunks(width as usize) {
            if pos >= end {
                break;
            }
            let take = chunk.len().min((end - pos) as usize);
            let address = engine.map().offset_to_address(pos).unwrap_or(pos);
            print!("{:0digits$X}  ", address);
            for (i, byte) in chunk[..take].iter().enumerate() {
                print!("{:02X} ", byte);
                if i == 7 {
                    print!(" ");
                }
            }
            // Pad a short tail line so the char column lines up
            for i in take..width as usize {
                print!("   ");
                if i == 7 {
                    print!(" ");
                }
            }
            print!(" ");
            for byte in &chunk[..take] {
                print!("{}", engine.glyph(*byte));
            }
            println!();
            pos += take as u64;
        }
    }

    Ok(())
}

fn cmd_patch(file: &str, patches: &[String], backup: Option<&str>, mmap: bool) -> Result<()> {
    let store: Box<dyn BackingStore> = if mmap {
        Box::new(MmapStore::open_rw(file)?)
    } else {
        Box::new(FileStore::open_rw(file)?)
    };

    let mut engine = Engine::new();
    engine.set_view_height(32 * 21);
    engine.set_data(
        store,
        Options { backup_path: backup.map(Into::into), ..Options::default() },
    );
    if !engine.set_readonly(false) {
        bail!("File is not writable: {}", file);
    }

    for patch in patches {
        let parts: Vec<&str> = patch.split('=').collect();
        if parts.len() != 2 {
            bail!("Patch must be in format 'offset=hexvalue': {}", patch);
        }

        let offset = parse_offset(parts[0])?;
        let value = parse_hex(parts[1])?;

        if offset + value.len() as u64 > engine.total_size() {
            bail!(
                "Patch at 0x{:X} with {} bytes exceeds file size {}",
                offset,
                value.len(),
                engine.total_size()
            );
        }

        // Type the bytes through the nibble cursor; it advances by itself
        engine.goto_offset(offset);
        for byte in &value {
            for digit in format!("{:02X}", byte).chars() {
                engine.type_char(digit);
            }
        }

        while let Some(event) = engine.poll_event() {
            if let Event::Error(message) = event {
                bail!("{}", message);
            }
        }
    }

    if engine.is_edited() {
        if let Some(backup) = backup {
            println!("Backup: {}", backup);
        }
    }

    Ok(())
}
