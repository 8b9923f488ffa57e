use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use time::Duration;
use track_locate_lib::{
    Error, FileDataAccessor, Gpx, GpxIndex, GpxParser, GpxVisitor, Result, Track, TrackPoint,
    TrackSegment, parse_instant, summarize_file,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
/// Track Locate - Find where a tracked object was at a point in time using GPX track files
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream-decode a GPX file and print every structural element
    Dump {
        /// GPX file to decode
        #[clap(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the time interval covered by a GPX file and its point count
    Summary {
        /// GPX file to summarize
        #[clap(value_name = "FILE")]
        file: PathBuf,
    },

    /// Search one or more GPX files for points near an instant
    Locate {
        /// Query instant (RFC 3339, e.g. 2016-12-22T14:32:59Z)
        #[clap(short, long, value_name = "INSTANT")]
        time: String,

        /// Match window around the query, in minutes
        #[clap(long, default_value = "5")]
        tolerance_minutes: i64,

        /// Maximum files kept loaded at once (0 = unlimited)
        #[clap(long, default_value = "0")]
        max_loaded: usize,

        /// GPX files to index
        #[clap(value_name = "FILES", required = true)]
        files: Vec<String>,
    },
}

/// Prints each structural element of the stream as it is decoded.
struct DumpVisitor;

impl GpxVisitor for DumpVisitor {
    fn gpx_open(&mut self, gpx: &Gpx) -> Result<()> {
        println!("GPX: {gpx}");
        Ok(())
    }

    fn track_open(&mut self, track: &Track) -> Result<()> {
        println!("Track: {track}");
        Ok(())
    }

    fn track_segment_open(&mut self, segment: &TrackSegment) -> Result<()> {
        println!("Track segment: {segment}");
        Ok(())
    }

    fn track_point_close(&mut self, point: &TrackPoint) -> Result<()> {
        println!("Point: {point}");
        Ok(())
    }
}

fn dump(file: &Path) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let mut parser = GpxParser::new(reader, DumpVisitor);
    parser.parse()
}

fn summary(file: &Path) -> Result<()> {
    let summary = summarize_file(file)?;
    println!("{summary}");
    Ok(())
}

fn locate(time: &str, tolerance_minutes: i64, max_loaded: usize, files: &[String]) -> Result<()> {
    let query = parse_instant(time)?;
    let tolerance = Duration::minutes(tolerance_minutes);
    let mut index = GpxIndex::new(FileDataAccessor, tolerance, max_loaded);

    for label in files {
        match index.add(label) {
            Ok(interval) => {
                tracing::debug!("indexed [{}] covering {}", label, interval);
            }
            Err(err @ (Error::EmptyFile | Error::NoTimestamps)) => {
                tracing::warn!("skipping [{}]: {}", label, err);
            }
            Err(err) => return Err(err),
        }
    }

    for hit in index.search(query)? {
        println!("{hit}");
    }

    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Dump { file } => dump(&file),
        Command::Summary { file } => summary(&file),
        Command::Locate {
            time,
            tolerance_minutes,
            max_loaded,
            files,
        } => locate(&time, tolerance_minutes, max_loaded, &files),
    }
}

fn main() {
    // Setup logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
