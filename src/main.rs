use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Local, Utc};
use clap::Parser;
use flate2::Compression;

use dictzip::{DictzipReader, DictzipWriter, OperatingSystem, DEFAULT_CHUNK_SIZE};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Compress or expand files, keeping random access to the compressed data.
#[derive(Parser, Debug)]
#[command(name = "dictzip")]
#[command(version)]
struct Cli {
    /// Decompress FILE.dz to FILE.
    #[arg(short, long)]
    decompress: bool,

    /// Write to standard output and keep the input file.
    #[arg(short = 'c', long = "stdout")]
    stdout: bool,

    /// Overwrite existing output files.
    #[arg(short, long)]
    force: bool,

    /// Keep the input file.
    #[arg(short, long)]
    keep: bool,

    /// List the compressed file contents.
    #[arg(short, long)]
    list: bool,

    /// Do not store the original file name and timestamp.
    #[arg(short = 'n', long = "no-name")]
    no_name: bool,

    /// Check the integrity of compressed files.
    #[arg(short, long)]
    test: bool,

    /// Print per-chunk statistics.
    #[arg(short, long)]
    verbose: bool,

    /// Uncompressed offset to start decompressing at. Implies --stdout.
    #[arg(short, long, value_name = "OFFSET")]
    start: Option<u64>,

    /// Number of uncompressed bytes to decompress. Implies --stdout.
    #[arg(short = 'e', long, value_name = "SIZE")]
    size: Option<u64>,

    /// Compression level.
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// Uncompressed bytes per chunk.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = clap::value_parser!(u16).range(1..))]
    chunk_size: u16,

    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut failed = false;
    for path in &cli.files {
        if let Err(e) = run(&cli, path) {
            eprintln!("dictzip: {}: {}", path.display(), e);
            failed = true;
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: &Cli, path: &Path) -> CliResult<()> {
    if cli.list {
        list(path)
    } else if cli.test {
        test(path, cli.verbose)
    } else if cli.decompress || cli.start.is_some() || cli.size.is_some() {
        decompress(cli, path)
    } else {
        compress(cli, path)
    }
}

/// Open `path` for writing, refusing to replace an existing file unless
/// `force` is set.
fn create_output(path: &Path, force: bool) -> CliResult<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path).map_err(|e| -> Box<dyn Error> {
        if e.kind() == io::ErrorKind::AlreadyExists {
            format!("{} already exists; use --force to overwrite", path.display()).into()
        } else {
            format!("creating {}: {}", path.display(), e).into()
        }
    })
}

fn compress(cli: &Cli, path: &Path) -> CliResult<()> {
    if cli.stdout {
        let stdout = io::stdout().lock();
        return compress_into(cli, path, Box::new(stdout));
    }

    let mut dest_path = path.as_os_str().to_owned();
    dest_path.push(".dz");
    let dest_path = PathBuf::from(dest_path);
    let dest = BufWriter::new(create_output(&dest_path, cli.force)?);
    if let Err(e) = compress_into(cli, path, Box::new(dest)) {
        let _ = fs::remove_file(&dest_path);
        return Err(e);
    }
    if !cli.keep {
        fs::remove_file(path).map_err(|e| format!("removing input: {e}"))?;
    }
    Ok(())
}

fn compress_into(cli: &Cli, path: &Path, dest: Box<dyn Write>) -> CliResult<()> {
    let mut input = File::open(path).map_err(|e| format!("opening file: {e}"))?;
    let mut writer = DictzipWriter::with_level(dest, Compression::new(cli.level), cli.chunk_size)?;
    writer.metadata.os = if cfg!(unix) {
        OperatingSystem::Unix
    } else if cfg!(windows) {
        OperatingSystem::Ntfs
    } else {
        OperatingSystem::Unknown
    };

    if !cli.no_name {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        match name {
            Some(name) if name.chars().all(|c| matches!(u32::from(c), 1..=0xFF)) => {
                writer.metadata.name = Some(name);
            }
            Some(name) => eprintln!("dictzip: {name}: name is not Latin-1, not storing it"),
            None => {}
        }
        writer.metadata.mod_time = input.metadata()?.modified().ok().map(DateTime::<Utc>::from);
    }

    let total = io::copy(&mut input, &mut writer)?;
    writer.close()?;
    if cli.verbose {
        print_chunk_stats(total, writer.chunk_size(), writer.sizes());
    }
    writer.finish()?;
    Ok(())
}

fn print_chunk_stats(total: u64, chunk_size: u16, sizes: &[u16]) {
    let mut remaining = total;
    for (i, &size) in sizes.iter().enumerate() {
        let len = remaining.min(u64::from(chunk_size));
        remaining -= len;
        eprintln!(
            "chunk {}: {} -> {} ({:.2}%) of {} total",
            i + 1,
            len,
            size,
            (1.0 - f64::from(size) / len as f64) * 100.0,
            total
        );
    }
}

fn decompress(cli: &Cli, path: &Path) -> CliResult<()> {
    let mut reader = DictzipReader::open(path)?;

    let ranged = cli.start.is_some() || cli.size.is_some();
    if cli.stdout || ranged {
        let mut out = BufWriter::new(io::stdout().lock());
        if ranged {
            copy_range(&mut reader, &mut out, cli.start.unwrap_or(0), cli.size)?;
        } else {
            io::copy(&mut reader, &mut out)?;
        }
        out.flush()?;
        return Ok(());
    }

    let dest_path = strip_suffix(path)?;
    let mut out = BufWriter::new(create_output(&dest_path, cli.force)?);
    if let Err(e) = io::copy(&mut reader, &mut out).and_then(|_| out.flush()) {
        drop(out);
        let _ = fs::remove_file(&dest_path);
        return Err(e.into());
    }
    reader.close();
    if !cli.keep {
        fs::remove_file(path).map_err(|e| format!("removing input: {e}"))?;
    }
    Ok(())
}

/// `FILE.dz` -> `FILE`.
fn strip_suffix(path: &Path) -> CliResult<PathBuf> {
    match path.extension() {
        Some(ext) if ext == "dz" => Ok(path.with_extension("")),
        _ => Err("unknown suffix, expected .dz".into()),
    }
}

/// Copy `size` uncompressed bytes starting at `start`, or everything after
/// `start` when no size is given.
fn copy_range<R: Read + Seek>(
    reader: &mut DictzipReader<R>,
    out: &mut impl Write,
    start: u64,
    size: Option<u64>,
) -> CliResult<()> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut pos = start;
    let mut remaining = size.unwrap_or(u64::MAX);
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = reader.read_at(&mut buf[..want], pos)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        pos += n as u64;
        remaining -= n as u64;
    }
    Ok(())
}

fn list(path: &Path) -> CliResult<()> {
    let mut reader = DictzipReader::open(path)?;
    let compressed = fs::metadata(path)?.len();
    let uncompressed = io::copy(&mut reader, &mut io::sink())?;

    let (date, time) = match reader.mod_time() {
        Some(mtime) => {
            let local = mtime.with_timezone(&Local);
            (local.format("%Y-%m-%d").to_string(), local.format("%H:%M:%S").to_string())
        }
        None => ("-".to_string(), "-".to_string()),
    };
    let ratio = if uncompressed == 0 {
        0.0
    } else {
        (1.0 - compressed as f64 / uncompressed as f64) * 100.0
    };

    println!(
        "{:<5} {:<10} {:<8} {:>6} {:>6} {:>12} {:>12} {:>6}  {}",
        "type", "date", "time", "chunks", "size", "compressed", "uncompressed", "ratio", "name"
    );
    println!(
        "{:<5} {:<10} {:<8} {:>6} {:>6} {:>12} {:>12} {:>6}  {}",
        "dzip",
        date,
        time,
        reader.chunk_count(),
        reader.chunk_size(),
        compressed,
        uncompressed,
        format!("{ratio:.1}%"),
        reader.name().unwrap_or("")
    );
    Ok(())
}

fn test(path: &Path, verbose: bool) -> CliResult<()> {
    let mut reader = DictzipReader::open(path)?;
    reader.verify_trailer()?;
    if verbose {
        println!("{}: OK", path.display());
    }
    Ok(())
}
