use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glob::Pattern;
use tools::{check_descriptors, format_report, inspect_packet, parse_descriptor};

#[derive(Parser)]
#[command(
    name = "ghostline-tools",
    version,
    about = "ghostline packet inspection and schema tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect packet structure and sizes.
    Inspect {
        /// Path to the packet bytes, or a directory of captures.
        packet_path: PathBuf,
        /// Optional glob filter when inspecting a directory.
        #[arg(long)]
        glob: Option<String>,
        /// Sort inspected packets.
        #[arg(long, value_enum)]
        sort: Option<InspectSort>,
        /// Limit the number of inspected packets (after sorting).
        #[arg(long)]
        limit: Option<usize>,
        /// Output format.
        #[arg(long, value_enum, default_value_t = Format::Pretty)]
        format: Format,
    },
    /// Compare two schema descriptors dumped as JSON.
    CheckDescriptor {
        /// Descriptor of the build being checked.
        found: PathBuf,
        /// Descriptor it must match.
        expected: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InspectSort {
    Size,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Pretty,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Inspect {
            packet_path,
            glob,
            sort,
            limit,
            format,
        } => {
            if packet_path.is_dir() {
                let mut entries = collect_packet_entries(&packet_path, glob.as_deref())?;
                if matches!(sort, Some(InspectSort::Size)) {
                    entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
                } else {
                    entries.sort_by(|a, b| a.path.cmp(&b.path));
                }
                let limit = limit.or(sort.map(|InspectSort::Size| 10));
                if let Some(limit) = limit {
                    entries.truncate(limit);
                }
                for entry in entries {
                    if matches!(format, Format::Pretty) {
                        println!("== {} ({} bytes) ==", entry.path.display(), entry.size);
                    }
                    inspect_file(&entry.path, format)?;
                }
            } else {
                inspect_file(&packet_path, format)?;
            }
        }
        Command::CheckDescriptor { found, expected } => {
            let found_desc = parse_descriptor(&read_text(&found)?)?;
            let expected_desc = parse_descriptor(&read_text(&expected)?)?;
            check_descriptors(&found_desc, &expected_desc)?;
            println!(
                "descriptors match ({} entries)",
                found_desc.entries.len()
            );
        }
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn inspect_file(path: &Path, format: Format) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("read packet {}", path.display()))?;
    let report = inspect_packet(&bytes, &wire::Limits::default())
        .with_context(|| format!("inspect {}", path.display()))?;
    match format {
        Format::Json => {
            let json = serde_json::to_string_pretty(&report).context("serialize json")?;
            println!("{json}");
        }
        Format::Pretty => print!("{}", format_report(&report)),
    }
    Ok(())
}

struct PacketEntry {
    path: PathBuf,
    size: u64,
}

fn collect_packet_entries(dir: &Path, glob: Option<&str>) -> Result<Vec<PacketEntry>> {
    let mut entries = Vec::new();
    let pattern = glob
        .map(Pattern::new)
        .transpose()
        .context("invalid glob pattern")?;

    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(pattern) = &pattern {
            let matches_path = pattern.matches_path(&path);
            let matches_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| pattern.matches(name));
            if !matches_path && !matches_name {
                continue;
            }
        }
        let size = entry.metadata()?.len();
        entries.push(PacketEntry { path, size });
    }
    Ok(entries)
}
