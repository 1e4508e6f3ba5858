//! pbdyn - Convert protobuf payloads to JSON with a runtime-loaded schema
//!
//! The payload is read either from a CloudEvent JSON envelope (`data_base64`
//! plus a `dataschema` reference) or, with `--raw`, from a file of raw
//! protobuf bytes. The schema is a serialized `FileDescriptorSet` read from
//! a `file://` URI or a path.

mod envelope;
mod schema;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser};
use envelope::CloudEvent;
use pbdyn_core::decode::DEFAULT_MAX_DEPTH;
use pbdyn_core::{
    Converter, DecoderConfig, DuplicatePolicy, FieldNaming, JsonObject, ProjectorConfig,
    RegistryConfig, StatsObserver,
};
use schema::{RegistryCache, SchemaRef};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Convert protobuf payloads to JSON using a runtime-fetched descriptor set
#[derive(Parser, Debug)]
#[command(name = "pbdyn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Output file (output directory with --directory); console when omitted
    #[arg(short, long)]
    target_path: Option<PathBuf>,

    /// Treat the source as raw protobuf bytes instead of a CloudEvent
    #[arg(short, long, requires = "schema_uri")]
    raw: bool,

    /// Schema reference `<uri>#<Type>`; overrides the event's dataschema
    #[arg(short = 'u', long)]
    schema_uri: Option<String>,

    /// Message type to decode; overrides the schema reference fragment
    #[arg(short, long)]
    message_type: Option<String>,

    /// Package prefix for message types given without one
    #[arg(long)]
    package: Option<String>,

    /// Write fields under their JSON names (lowerCamelCase) instead of proto names
    #[arg(long)]
    json_names: bool,

    /// Maximum message nesting depth (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Fail on duplicate type names in the schema instead of keeping the first
    #[arg(long)]
    strict_schema: bool,

    /// Indent the JSON output
    #[arg(long)]
    pretty: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single event (or raw payload with --raw)
    #[arg(short, long)]
    source_path: Option<PathBuf>,

    /// Path to a directory of events to convert
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

impl Cli {
    fn registry_config(&self) -> RegistryConfig {
        let policy = if self.strict_schema {
            DuplicatePolicy::Error
        } else {
            DuplicatePolicy::FirstWins
        };
        RegistryConfig::new().duplicate_names(policy)
    }

    fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig::new().max_depth((self.max_depth > 0).then_some(self.max_depth))
    }

    fn projector_config(&self) -> ProjectorConfig {
        let naming = if self.json_names {
            FieldNaming::JsonName
        } else {
            FieldNaming::ProtoName
        };
        ProjectorConfig::new().field_names(naming)
    }
}

#[derive(Default)]
struct BatchStats {
    converted: usize,
    failed: usize,
}

/// Exit status for invalid command-line arguments
const EXIT_USAGE: u8 = 1;
/// Exit status for a failed conversion
const EXIT_FAILURE: u8 = 2;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // printing can only fail on a closed stream
            let _ = err.print();
            return ExitCode::from(usage_exit_code(&err));
        }
    };

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
        .with_writer(std::io::stderr)
        .init();

    let result = run(&cli);
    if let Err(ref err) = result {
        eprintln!("Error: {:?}", err);
    }
    ExitCode::from(exit_code(&result))
}

/// `--help` and `--version` exit cleanly; anything else clap rejects is a usage error
fn usage_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        EXIT_USAGE
    } else {
        0
    }
}

fn exit_code(result: &Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(_) => EXIT_FAILURE,
    }
}

/// Dispatch based on input mode
fn run(cli: &Cli) -> Result<()> {
    if let Some(ref file) = cli.input.source_path {
        process_single_file(cli, file)
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(cli, directory)
    } else {
        bail!("Either --source-path or --directory must be specified")
    }
}

/// Convert one source file
fn process_single_file(cli: &Cli, file: &Path) -> Result<()> {
    if !file.is_file() {
        bail!("Input file does not exist: {}", file.display());
    }

    let mut cache = RegistryCache::new(cli.registry_config());
    let output = convert_file(cli, file, &mut cache)?;

    match &cli.target_path {
        Some(target) => write_output(target, &output),
        None => {
            println!("{}", output);
            Ok(())
        }
    }
}

/// Convert every regular, non-hidden file under a directory
fn process_directory(cli: &Cli, directory: &Path) -> Result<()> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Converting directory: {}", directory.display());

    let mut cache = RegistryCache::new(cli.registry_config());
    let mut stats = BatchStats::default();

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || is_hidden(path) {
            continue;
        }

        debug!("Converting {}", path.display());
        let result = convert_file(cli, path, &mut cache).and_then(|output| {
            match &cli.target_path {
                Some(target) => {
                    let relative = path.strip_prefix(directory).unwrap_or(path);
                    write_output(&target.join(relative).with_extension("json"), &output)
                }
                None => {
                    println!("{}", output);
                    Ok(())
                }
            }
        });

        match result {
            Ok(()) => stats.converted += 1,
            Err(e) => {
                // Log error but continue with other files
                warn!("Error converting {}: {:#}", path.display(), e);
                stats.failed += 1;
            }
        }
    }

    info!(
        "Summary: {} converted, {} failed, {} schema(s) loaded",
        stats.converted,
        stats.failed,
        cache.len()
    );
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Convert one file and render the output document
fn convert_file(cli: &Cli, path: &Path, cache: &mut RegistryCache) -> Result<String> {
    trace!("Reading {}", path.display());
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;

    let document = if cli.raw {
        let reference = cli
            .schema_uri
            .as_deref()
            .context("--raw requires --schema-uri")?;
        let json = convert_payload(cli, cache, &SchemaRef::parse(reference)?, &bytes)?;
        Value::Object(json)
    } else {
        let event = CloudEvent::from_slice(&bytes)
            .with_context(|| format!("Failed to parse event: {}", path.display()))?;
        let reference = match (&cli.schema_uri, &event.dataschema) {
            (Some(uri), _) => uri.clone(),
            (None, Some(dataschema)) => dataschema.clone(),
            (None, None) => bail!(
                "Event has no 'dataschema' attribute and no --schema-uri was given: {}",
                path.display()
            ),
        };
        let payload = event.payload()?;
        let json = convert_payload(cli, cache, &SchemaRef::parse(&reference)?, &payload)?;
        serde_json::to_value(event.into_json_event(json))?
    };

    render(&document, cli.pretty)
}

fn convert_payload(
    cli: &Cli,
    cache: &mut RegistryCache,
    reference: &SchemaRef,
    payload: &[u8],
) -> Result<JsonObject> {
    let registry = cache.get(&reference.location)?;
    let root_type = reference.root_type(cli.message_type.as_deref(), cli.package.as_deref())?;

    let converter = Converter::new(registry)
        .decoder_config(cli.decoder_config())
        .projector_config(cli.projector_config());

    let mut stats = StatsObserver::default();
    let json = converter
        .convert_with_observer(&root_type, payload, &mut stats)
        .with_context(|| format!("Failed to convert payload as '{}'", root_type))?;

    debug!(
        "{}: {} message(s), {} field(s), {} unknown field(s) dropped, depth {}",
        root_type,
        stats.message_count,
        stats.field_count,
        stats.unknown_dropped_count,
        stats.max_depth
    );
    Ok(json)
}

fn render(document: &Value, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(document)?
    } else {
        serde_json::to_string(document)?
    };
    Ok(text)
}

/// Write (truncating) an output file, creating parent directories
fn write_output(output_path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    info!("Wrote {}", output_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use pretty_assertions::assert_eq;
    use prost::Message;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
    use serde_json::json;
    use tempfile::TempDir;

    fn field(name: &str, number: i32, typ: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(typ.into()),
            label: Some(Label::Optional.into()),
            ..Default::default()
        }
    }

    /// Writes a descriptor set with `demo.Ping { uint32 seq = 1; string note_text = 2; }`
    fn write_schema(dir: &Path) -> PathBuf {
        let fds = FileDescriptorSet {
            file: vec![FileDescriptorProto {
                name: Some("ping.proto".to_string()),
                package: Some("demo".to_string()),
                message_type: vec![DescriptorProto {
                    name: Some("Ping".to_string()),
                    field: vec![
                        field("seq", 1, Type::Uint32),
                        field("note_text", 2, Type::String),
                    ],
                    ..Default::default()
                }],
                syntax: Some("proto3".to_string()),
                ..Default::default()
            }],
        };
        let path = dir.join("root.pb");
        fs::write(&path, fds.encode_to_vec()).unwrap();
        path
    }

    // seq: 5, note_text: "hi"
    const PING: [u8; 6] = [0x08, 0x05, 0x12, 0x02, b'h', b'i'];

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("pbdyn").chain(args.iter().copied()))
    }

    #[test]
    fn test_raw_mode() {
        let temp_dir = TempDir::new().unwrap();
        let schema = write_schema(temp_dir.path());
        let source = temp_dir.path().join("ping.bin");
        fs::write(&source, PING).unwrap();

        let uri = format!("{}#Ping", schema.display());
        let cli = cli(&[
            "-s",
            source.to_str().unwrap(),
            "--raw",
            "-u",
            &uri,
            "--package",
            "demo",
            "--json-names",
        ]);
        let mut cache = RegistryCache::new(cli.registry_config());
        let output = convert_file(&cli, &source, &mut cache).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&output).unwrap(),
            json!({ "seq": 5, "noteText": "hi" })
        );
    }

    #[test]
    fn test_envelope_mode_to_file() {
        let temp_dir = TempDir::new().unwrap();
        let schema = write_schema(temp_dir.path());
        let source = temp_dir.path().join("event.json");
        let event = json!({
            "specversion": "1.0",
            "id": "7",
            "source": "test",
            "type": "demo.ping",
            "datacontenttype": "application/protobuf",
            "dataschema": format!("{}#demo.Ping", schema.display()),
            "data_base64": STANDARD.encode(PING),
        });
        fs::write(&source, event.to_string()).unwrap();

        let target = temp_dir.path().join("out").join("event.json");
        let cli = cli(&[
            "-s",
            source.to_str().unwrap(),
            "-t",
            target.to_str().unwrap(),
            "--pretty",
        ]);
        process_single_file(&cli, &source).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(written["data"], json!({ "seq": 5, "note_text": "hi" }));
        assert_eq!(written["datacontenttype"], json!("application/json"));
        assert_eq!(written["id"], json!("7"));
        assert!(written.get("data_base64").is_none());
    }

    #[test]
    fn test_directory_mode_continues_past_failures() {
        let temp_dir = TempDir::new().unwrap();
        let schema = write_schema(temp_dir.path());
        let events = temp_dir.path().join("events");
        fs::create_dir_all(events.join("nested")).unwrap();

        let dataschema = format!("{}#demo.Ping", schema.display());
        let good = json!({ "id": "1", "dataschema": dataschema, "data_base64": STANDARD.encode(PING) });
        fs::write(events.join("a.json"), good.to_string()).unwrap();
        fs::write(events.join("nested").join("b.json"), good.to_string()).unwrap();
        fs::write(events.join("broken.json"), "{ not json").unwrap();
        fs::write(events.join(".hidden"), "ignored").unwrap();

        let out = temp_dir.path().join("out");
        let cli = cli(&["-d", events.to_str().unwrap(), "-t", out.to_str().unwrap()]);
        process_directory(&cli, &events).unwrap();

        assert!(out.join("a.json").is_file());
        assert!(out.join("nested").join("b.json").is_file());
        assert!(!out.join("broken.json").exists());
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let schema = write_schema(temp_dir.path());
        let source = temp_dir.path().join("ping.bin");
        fs::write(&source, PING).unwrap();

        let uri = format!("{}#demo.Pong", schema.display());
        let cli = cli(&["-s", source.to_str().unwrap(), "-r", "-u", &uri]);
        let mut cache = RegistryCache::new(cli.registry_config());
        let err = convert_file(&cli, &source, &mut cache).unwrap_err();
        assert!(format!("{:#}", err).contains("demo.Pong"));
    }

    #[test]
    fn test_configs_from_flags() {
        let cli = cli(&["-s", "x", "--max-depth", "0", "--strict-schema"]);
        assert_eq!(cli.decoder_config().max_depth, None);
        assert_eq!(cli.registry_config().duplicate_names, DuplicatePolicy::Error);
        assert_eq!(cli.projector_config().field_names, FieldNaming::ProtoName);
    }

    #[test]
    fn test_exit_codes() {
        fn usage(args: &[&str]) -> std::result::Result<(), u8> {
            Cli::try_parse_from(std::iter::once("pbdyn").chain(args.iter().copied()))
                .map(|_| ())
                .map_err(|err| usage_exit_code(&err))
        }
        // --raw without a schema URI, no input, both inputs
        assert_eq!(usage(&["-s", "x", "--raw"]), Err(EXIT_USAGE));
        assert_eq!(usage(&[]), Err(EXIT_USAGE));
        assert_eq!(usage(&["-s", "x", "-d", "y"]), Err(EXIT_USAGE));
        assert_eq!(usage(&["--help"]), Err(0));
        assert_eq!(usage(&["-s", "x"]), Ok(()));

        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.json");
        let result = run(&cli(&["-s", missing.to_str().unwrap()]));
        assert!(result.is_err());
        assert_eq!(exit_code(&result), EXIT_FAILURE);

        let schema = write_schema(temp_dir.path());
        let source = temp_dir.path().join("ping.bin");
        fs::write(&source, PING).unwrap();
        let uri = format!("{}#demo.Ping", schema.display());
        let target = temp_dir.path().join("ping.json");
        let result = run(&cli(&[
            "-s",
            source.to_str().unwrap(),
            "-r",
            "-u",
            &uri,
            "-t",
            target.to_str().unwrap(),
        ]));
        assert_eq!(exit_code(&result), 0);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
