//! cli — команды бинаря memsnap.
//!
//!   memsnap rebuild --input PIPE --output IMG [--container auto|required|none] [--strict]
//!                   [--keep-header] [--queue N] [--read-chunk B] [--json]
//!   memsnap check   --input PIPE [--container ...] [--strict] [--queue N] [--json]
//!   memsnap header  --input FILE [--json]
//!
//! run() возвращает Ok(true) при PASS, Ok(false) при FAIL; ошибки — через anyhow.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde::Serialize;

use crate::config::{ContainerMode, SessionBuilder, SnapConfig};
use crate::consts::{CONTAINER_ALIGNED_LEN, MAGIC_LEN};
use crate::container::{read_size_header, ContainerHeader, DeclaredSize, SaveState};
use crate::image::{FileImage, NullImage, PageSink};
use crate::metrics::{metrics_snapshot, MetricsSnapshot};
use crate::session::{Session, SessionOutcome};
use crate::stream::{spawn_producer, wait_for_source};
use crate::validate::ValidationReport;

#[derive(Parser, Debug)]
#[command(
    name = "memsnap",
    version,
    about = "Rebuild a flat memory image from a live-migration snapshot stream",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StreamArgs {
    /// Input stream (named pipe or file).
    #[arg(long)]
    input: PathBuf,
    /// Container header handling: auto | required | none (default from MEMSNAP_CONTAINER).
    #[arg(long, value_parser = parse_container_mode)]
    container: Option<ContainerMode>,
    /// Any duplicate page fails the verdict.
    #[arg(long)]
    strict: bool,
    /// Deliveries in flight between reader and decoder; 0 = unbounded.
    #[arg(long)]
    queue: Option<usize>,
    /// Bytes per read on the input.
    #[arg(long)]
    read_chunk: Option<usize>,
    /// Print one JSON object instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Decode the stream and write the reconstructed image.
    Rebuild {
        #[command(flatten)]
        stream: StreamArgs,
        /// Output image path (created or truncated, locked while writing).
        #[arg(long)]
        output: PathBuf,
        /// Keep the container header (padded to 8 KiB) at the start of the image.
        #[arg(long)]
        keep_header: bool,
    },
    /// Decode and validate only; no image is written.
    Check {
        #[command(flatten)]
        stream: StreamArgs,
    },
    /// Print the container header and the declared size of a saved stream.
    Header {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn parse_container_mode(s: &str) -> std::result::Result<ContainerMode, String> {
    s.parse()
}

pub fn run() -> Result<bool> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Rebuild {
            stream,
            output,
            keep_header,
        } => {
            let cfg = session_config(&stream, keep_header);
            let mut image = FileImage::create(&output)
                .with_context(|| format!("open output image {}", output.display()))?;
            let outcome = decode(&stream.input, cfg, &mut image)?;
            info!("image written to {}", output.display());
            print_outcome(&outcome, Some(&output), stream.json)?;
            Ok(outcome.report.passed())
        }
        Cmd::Check { stream } => {
            let cfg = session_config(&stream, false);
            let mut sink = NullImage;
            let outcome = decode(&stream.input, cfg, &mut sink)?;
            print_outcome(&outcome, None, stream.json)?;
            Ok(outcome.report.passed())
        }
        Cmd::Header { input, json } => {
            let (header, declared) = read_prefix(&input)?;
            print_prefix(header.as_ref(), declared, json)?;
            Ok(true)
        }
    }
}

fn session_config(args: &StreamArgs, keep_header: bool) -> SnapConfig {
    let mut b = SessionBuilder::new();
    if let Some(mode) = args.container {
        b = b.container(mode);
    }
    if args.strict {
        b = b.strict_duplicates(true);
    }
    if keep_header {
        b = b.keep_header(true);
    }
    if let Some(n) = args.read_chunk {
        b = b.read_chunk(n);
    }
    if let Some(q) = args.queue {
        b = b.queue_capacity(if q == 0 { None } else { Some(q) });
    }
    let cfg = b.build();
    debug!("{}", cfg);
    cfg
}

/// Wait for the input, start the producer thread, drive one session to completion.
fn decode<S: PageSink + ?Sized>(input: &Path, cfg: SnapConfig, sink: &mut S) -> Result<SessionOutcome> {
    wait_for_source(input, cfg.wait_attempts, cfg.wait_interval())
        .with_context(|| format!("wait for input {}", input.display()))?;
    let file = File::open(input).with_context(|| format!("open input {}", input.display()))?;
    decode_from(file, input, cfg, sink)
}

fn decode_from<R, S>(reader: R, label: &Path, cfg: SnapConfig, sink: &mut S) -> Result<SessionOutcome>
where
    R: Read + Send + 'static,
    S: PageSink + ?Sized,
{
    let (mut source, producer) = spawn_producer(reader, cfg.read_chunk, cfg.queue_capacity);
    let mut session = Session::new(cfg);
    let res = session.run(&mut source, sink);
    drop(source);

    let outcome = match res {
        Ok(o) => o,
        Err(e) => {
            // Производитель может висеть в read() на pipe с живым, но молчащим писателем.
            // Не ждём его: поток отсоединяется и умрёт вместе с процессом.
            drop(producer);
            let ctx = match session.failed_in() {
                Some(state) => format!("decode {} (failed in {:?})", label.display(), state),
                None => format!("decode {}", label.display()),
            };
            return Err(anyhow::Error::new(e).context(ctx));
        }
    };

    // Сессия дошла до EOS: производитель уже отправил End и завершается.
    let read_total = producer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))?;
    let m = metrics_snapshot();
    debug!(
        "producer read {} byte(s) in {} deliveries (avg {:.1} B); metrics: {:?}",
        read_total,
        m.deliveries_total,
        m.avg_delivery_bytes(),
        m
    );
    Ok(outcome)
}

#[derive(Serialize)]
struct HeaderInfo {
    magic: String,
    state: SaveState,
    version: u32,
    descriptor_len: u32,
    was_running: bool,
    compression: String,
    payload_offset: u64,
    aligned: bool,
    descriptor: String,
}

impl From<&ContainerHeader> for HeaderInfo {
    fn from(h: &ContainerHeader) -> Self {
        Self {
            magic: String::from_utf8_lossy(&h.magic).into_owned(),
            state: h.state,
            version: h.version,
            descriptor_len: h.descriptor_len(),
            was_running: h.was_running,
            compression: h.compression.name(),
            payload_offset: h.payload_offset(),
            aligned: h.is_aligned(),
            descriptor: h.descriptor(),
        }
    }
}

#[derive(Serialize)]
struct OutcomeJson<'a> {
    container: Option<HeaderInfo>,
    declared_size: DeclaredSize,
    base_offset: u64,
    bytes_in: u64,
    output: Option<String>,
    report: &'a ValidationReport,
    metrics: MetricsSnapshot,
}

fn print_outcome(o: &SessionOutcome, output: Option<&Path>, json: bool) -> Result<()> {
    if json {
        let doc = OutcomeJson {
            container: o.header.as_ref().map(HeaderInfo::from),
            declared_size: o.declared_size,
            base_offset: o.base_offset,
            bytes_in: o.bytes_in,
            output: output.map(|p| p.display().to_string()),
            report: &o.report,
            metrics: metrics_snapshot(),
        };
        println!("{}", serde_json::to_string(&doc).context("serialize report")?);
        return Ok(());
    }

    if let Some(h) = &o.header {
        println!(
            "container: {:?}, descriptor {} bytes, compression {}",
            h.state,
            h.descriptor_len(),
            h.compression.name()
        );
    }
    println!(
        "declared: {} bytes ({} pages)",
        o.declared_size.bytes(),
        o.declared_size.page_count()
    );
    for a in &o.report.anomalies {
        println!(
            "anomaly: page {} iter {} (previous {}) {:?}",
            a.page_index, a.iteration_seq, a.previous_seq, a.kind
        );
    }
    println!("{}", o.report);
    Ok(())
}

// -------------------- header --------------------

/// Container header (if any) and declared size from the start of a saved stream.
fn read_prefix(input: &Path) -> Result<(Option<ContainerHeader>, DeclaredSize)> {
    let mut f = File::open(input).with_context(|| format!("open {}", input.display()))?;
    let mut magic = Vec::with_capacity(MAGIC_LEN);
    (&mut f)
        .take(MAGIC_LEN as u64)
        .read_to_end(&mut magic)
        .with_context(|| format!("read {}", input.display()))?;

    let parser = SnapConfig::from_env().header_parser();
    let mut r = Cursor::new(magic.clone()).chain(f);
    let header = if magic.len() == MAGIC_LEN && parser.recognizes(&magic) {
        Some(parser.read_from(&mut r).context("parse container header")?)
    } else {
        None
    };
    let declared = read_size_header(&mut r).context("parse size header")?;
    Ok((header, declared))
}

fn print_prefix(header: Option<&ContainerHeader>, declared: DeclaredSize, json: bool) -> Result<()> {
    if json {
        #[derive(Serialize)]
        struct PrefixJson {
            container: Option<HeaderInfo>,
            declared_size: DeclaredSize,
            pages: u64,
        }
        let doc = PrefixJson {
            container: header.map(HeaderInfo::from),
            declared_size: declared,
            pages: declared.page_count(),
        };
        println!("{}", serde_json::to_string(&doc).context("serialize header")?);
        return Ok(());
    }

    match header {
        Some(h) => {
            println!("magic:          {}", String::from_utf8_lossy(&h.magic));
            println!("state:          {:?}", h.state);
            println!("version:        {}", h.version);
            println!("descriptor_len: {}", h.descriptor_len());
            println!("was_running:    {}", h.was_running);
            println!("compression:    {}", h.compression.name());
            println!(
                "payload_offset: {}{}",
                h.payload_offset(),
                if h.is_aligned() {
                    String::new()
                } else {
                    format!(" (expected {})", CONTAINER_ALIGNED_LEN)
                }
            );
            println!("descriptor:\n{}", h.descriptor());
        }
        None => println!("container: none"),
    }
    println!(
        "declared_size:  {} bytes ({} pages)",
        declared.bytes(),
        declared.page_count()
    );
    Ok(())
}
