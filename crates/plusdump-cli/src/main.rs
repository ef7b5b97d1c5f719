//! plusdump - Detect and dissect PLUS headers in captured UDP payloads
//!
//! Each input is one UDP payload. It is first offered to the heuristic
//! detector registry; payloads recognised as PLUS are decoded and printed.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use plusdump_core::{DecoderConfig, DetectorRegistry, Error, LayerType, PlusHeader};
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Detect and dissect PLUS headers in captured UDP payloads
#[derive(Parser, Debug)]
#[command(name = "plusdump")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Transport protocol the payloads were carried by
    #[arg(long, default_value = "udp")]
    proto: String,

    /// Transport source port
    #[arg(long, default_value = "0")]
    src_port: u16,

    /// Transport destination port
    #[arg(long, default_value = "0")]
    dst_port: u16,

    /// Decode every input as PLUS instead of detecting it first
    #[arg(long)]
    no_heuristics: bool,

    /// Reject headers whose magic is not the PLUS pattern
    #[arg(long)]
    strict_magic: bool,

    /// Re-encode each decoded header and check it reproduces the input
    #[arg(long)]
    verify: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a file holding one raw payload
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of raw payload files
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Payload given as a hex string
    #[arg(long)]
    hex: Option<String>,
}

/// Output format for dissected headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Multi-line field listing
    Text,
    /// One line per payload
    Summary,
}

/// Per-payload dissection settings derived from the command line
#[derive(Debug, Clone)]
struct DissectOptions {
    proto: String,
    src_port: u16,
    dst_port: u16,
    verify: bool,
    decoder: DecoderConfig,
}

impl From<&Cli> for DissectOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            proto: cli.proto.clone(),
            src_port: cli.src_port,
            dst_port: cli.dst_port,
            verify: cli.verify,
            decoder: DecoderConfig::new().verify_magic(cli.strict_magic),
        }
    }
}

/// What became of one payload
#[derive(Debug)]
enum Outcome<'a> {
    /// Recognised and decoded as PLUS
    Plus(PlusHeader<'a>),
    /// Claimed by a detector for another layer
    Other(LayerType),
    /// No detector recognised the payload
    Unrecognised,
}

#[derive(Default, Debug)]
struct DumpStats {
    inputs: usize,
    plus: usize,
    other: usize,
    unrecognised: usize,
    failed: usize,
}

impl DumpStats {
    fn record(&mut self, outcome: &Result<Outcome<'_>>) {
        self.inputs += 1;
        match outcome {
            Ok(Outcome::Plus(_)) => self.plus += 1,
            Ok(Outcome::Other(_)) => self.other += 1,
            Ok(Outcome::Unrecognised) => self.unrecognised += 1,
            Err(_) => self.failed += 1,
        }
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} inputs, {} PLUS, {} other layers, {} unrecognised, {} failed",
            self.inputs, self.plus, self.other, self.unrecognised, self.failed
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let mut registry = DetectorRegistry::with_builtin();
    if !cli.no_heuristics {
        registry.enable_detection();
    }

    let options = DissectOptions::from(&cli);
    let mut stats = DumpStats::default();

    // Dispatch based on input mode
    if let Some(ref file) = cli.input.file {
        process_single_file(&cli, &registry, &options, file, &mut stats)?;
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, &registry, &options, directory, &mut stats)?;
    } else if let Some(ref hex_input) = cli.input.hex {
        let data = parse_hex(hex_input)?;
        process_payload(&cli, &registry, &options, "<hex>", &data, &mut stats)?;
    } else {
        bail!("One of --file, --directory or --hex must be specified")
    }

    stats.print_summary();
    Ok(())
}

/// Parse a hex string, ignoring whitespace and an optional `0x` prefix
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    hex::decode(digits).with_context(|| format!("Invalid hex payload: {}", input))
}

/// Process a single payload file
fn process_single_file(
    cli: &Cli,
    registry: &DetectorRegistry,
    options: &DissectOptions,
    file: &Path,
    stats: &mut DumpStats,
) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    let data = fs::read(file)
        .with_context(|| format!("Failed to read input file: {}", file.display()))?;
    process_payload(cli, registry, options, &file.display().to_string(), &data, stats)
}

/// Process a directory of payload files recursively
fn process_directory(
    cli: &Cli,
    registry: &DetectorRegistry,
    options: &DissectOptions,
    directory: &Path,
    stats: &mut DumpStats,
) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut paths: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && !is_hidden(p))
        .collect();
    paths.sort();

    for path in paths {
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                // Log error but continue with other files
                warn!("Error reading {}: {}", path.display(), e);
                continue;
            }
        };

        if let Err(e) = process_payload(
            cli,
            registry,
            options,
            &path.display().to_string(),
            &data,
            stats,
        ) {
            warn!("Error processing {}: {:#}", path.display(), e);
        }
    }

    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Dissect one payload, print it, and update the statistics
fn process_payload(
    cli: &Cli,
    registry: &DetectorRegistry,
    options: &DissectOptions,
    name: &str,
    data: &[u8],
    stats: &mut DumpStats,
) -> Result<()> {
    trace!("Dissecting {} ({} bytes)", name, data.len());

    let outcome = dissect(registry, options, data);
    stats.record(&outcome);

    match outcome? {
        Outcome::Plus(header) => match cli.format {
            OutputFormat::Text => print!("{}", render_text(name, &header)?),
            OutputFormat::Summary => println!("{}", render_summary(name, &header)),
        },
        Outcome::Other(layer_type) => {
            println!("{}: detected {}, not PLUS", name, layer_type);
        }
        Outcome::Unrecognised => {
            debug!("{}: no layer detected", name);
            if cli.format == OutputFormat::Text {
                println!("{}: not PLUS", name);
            }
        }
    }

    Ok(())
}

/// Run detection and, for PLUS payloads, decoding
fn dissect<'a>(
    registry: &DetectorRegistry,
    options: &DissectOptions,
    data: &'a [u8],
) -> Result<Outcome<'a>> {
    let detected = registry.detect(data, &options.proto, options.src_port, options.dst_port);

    match detected {
        Ok(LayerType::PLUS) | Err(Error::HeuristicsDisabled) => {}
        Ok(layer_type) => return Ok(Outcome::Other(layer_type)),
        Err(Error::NoMatch) => return Ok(Outcome::Unrecognised),
        Err(e) => return Err(e.into()),
    }

    let header = PlusHeader::decode_with_config(data, &options.decoder)
        .context("Failed to decode PLUS header")?;

    if options.verify {
        let encoded = header.encode().context("Failed to re-encode PLUS header")?;
        if encoded != data {
            bail!(
                "Re-encoded header differs from input ({} bytes vs {} bytes)",
                encoded.len(),
                data.len()
            );
        }
    }

    Ok(Outcome::Plus(header))
}

fn flag_string(header: &PlusHeader<'_>) -> String {
    [
        (header.l_flag, 'L'),
        (header.r_flag, 'R'),
        (header.s_flag, 'S'),
        (header.x_flag, 'X'),
    ]
    .iter()
    .map(|&(set, c)| if set { c } else { '-' })
    .collect()
}

/// Multi-line rendering of a decoded header
fn render_text(name: &str, header: &PlusHeader<'_>) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(out, "{}: PLUS ({} header bytes)", name, header.header_len())?;
    writeln!(out, "  magic:   {:#09x}", header.magic)?;
    writeln!(out, "  flags:   {}", flag_string(header))?;
    writeln!(out, "  cat:     {:#018x}", header.cat)?;
    writeln!(out, "  psn:     {}", header.psn)?;
    writeln!(out, "  pse:     {}", header.pse)?;

    if header.x_flag {
        match (header.pcf_type, header.pcf_len, header.pcf_integrity) {
            (Some(pcf_type), Some(len), Some(integrity)) => {
                writeln!(
                    out,
                    "  pcf:     type={:#x} len={} integrity={}",
                    pcf_type, len, integrity
                )?;
                writeln!(
                    out,
                    "  value:   {}",
                    hex::encode(header.pcf_value.unwrap_or_default())
                )?;
            }
            _ => writeln!(out, "  pcf:     escaped")?,
        }
    }

    writeln!(
        out,
        "  payload: {} bytes {}",
        header.payload.len(),
        hex::encode(header.payload)
    )?;
    Ok(out)
}

/// Single-line rendering of a decoded header
fn render_summary(name: &str, header: &PlusHeader<'_>) -> String {
    let pcf = match (header.x_flag, header.pcf_type, header.pcf_len) {
        (false, _, _) => "-".to_string(),
        (true, Some(pcf_type), Some(len)) => format!("{:#x}/{}", pcf_type, len),
        (true, _, _) => "escape".to_string(),
    };

    format!(
        "{} cat={:#018x} psn={} pse={} flags={} pcf={} payload={}",
        name,
        header.cat,
        header.psn,
        header.pse,
        flag_string(header),
        pcf,
        header.payload.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const PACKET_HEX: &str = "D8007FFF 1234567812345678 13111111 23222222 011B 010203040506 99989796";

    fn options() -> DissectOptions {
        DissectOptions {
            proto: "udp".to_string(),
            src_port: 1234,
            dst_port: 5678,
            verify: true,
            decoder: DecoderConfig::default(),
        }
    }

    fn enabled_registry() -> DetectorRegistry {
        let mut registry = DetectorRegistry::with_builtin();
        registry.enable_detection();
        registry
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0xD8 00 7f").unwrap(), vec![0xD8, 0x00, 0x7F]);
        assert_eq!(parse_hex(PACKET_HEX).unwrap().len(), 32);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_dissect_plus() {
        let data = parse_hex(PACKET_HEX).unwrap();
        let outcome = dissect(&enabled_registry(), &options(), &data).unwrap();

        let Outcome::Plus(header) = outcome else {
            panic!("expected a PLUS header, got {:?}", outcome);
        };
        assert_eq!(header.cat, 0x1234_5678_1234_5678);
        assert_eq!(header.pcf_type, Some(1));
        assert_eq!(flag_string(&header), "LRSX");
    }

    #[test]
    fn test_dissect_unrecognised_and_disabled() {
        let data = b"GET / HTTP/1.1\r\n\r\nHost: example";
        let outcome = dissect(&enabled_registry(), &options(), data).unwrap();
        assert!(matches!(outcome, Outcome::Unrecognised));

        // Without heuristics every payload is decoded as PLUS.
        let registry = DetectorRegistry::with_builtin();
        let mut opts = options();
        opts.verify = false;
        let outcome = dissect(&registry, &opts, data).unwrap();
        assert!(matches!(outcome, Outcome::Plus(_)));

        opts.decoder = DecoderConfig::new().verify_magic(true);
        assert!(dissect(&registry, &opts, data).is_err());
    }

    #[test]
    fn test_dissect_verify_catches_foreign_magic() {
        let mut data = parse_hex(PACKET_HEX).unwrap();
        data[0] = 0x00;

        let registry = DetectorRegistry::with_builtin();
        assert!(dissect(&registry, &options(), &data).is_err());
    }

    #[test]
    fn test_render() {
        let data = parse_hex(PACKET_HEX).unwrap();
        let header = PlusHeader::decode(&data).unwrap();

        let text = render_text("pkt", &header).unwrap();
        assert!(text.starts_with("pkt: PLUS (28 header bytes)"));
        assert!(text.contains("type=0x1 len=6 integrity=3"));
        assert!(text.contains("value:   010203040506"));
        assert!(text.contains("payload: 4 bytes 99989796"));

        assert_eq!(
            render_summary("pkt", &header),
            "pkt cat=0x1234567812345678 psn=319885585 pse=589439522 flags=LRSX pcf=0x1/6 payload=4"
        );

        let escaped = PlusHeader::new(1, 2, 3).with_escape();
        assert!(render_summary("e", &escaped).contains("pcf=escape"));
        assert!(render_text("e", &escaped)
            .unwrap()
            .contains("pcf:     escaped"));
    }

    #[test]
    fn test_process_files() {
        let temp_dir = TempDir::new().unwrap();
        let plus_path = temp_dir.path().join("plus.bin");
        let other_path = temp_dir.path().join("other.bin");

        let mut file = fs::File::create(&plus_path).unwrap();
        file.write_all(&parse_hex(PACKET_HEX).unwrap()).unwrap();
        fs::write(&other_path, b"GET / HTTP/1.1\r\n").unwrap();
        fs::write(temp_dir.path().join(".hidden"), b"ignored").unwrap();

        let cli = Cli::parse_from([
            "plusdump",
            "--directory",
            temp_dir.path().to_str().unwrap(),
            "--format",
            "summary",
        ]);
        let registry = enabled_registry();
        let options = DissectOptions::from(&cli);
        let mut stats = DumpStats::default();

        process_directory(&cli, &registry, &options, temp_dir.path(), &mut stats).unwrap();
        assert_eq!(stats.inputs, 2);
        assert_eq!(stats.plus, 1);
        assert_eq!(stats.unrecognised, 1);

        let missing = temp_dir.path().join("missing.bin");
        assert!(process_single_file(&cli, &registry, &options, &missing, &mut stats).is_err());
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(Path::new("/tmp/.payload")));
        assert!(!is_hidden(Path::new("/tmp/payload.bin")));
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
