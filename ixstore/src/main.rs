use std::path::Path;
use std::process::ExitCode;

use ixstore::config::EngineConfig;
use ixstore::index::{AttrType, IndexError, IndexHandle, create_index_file};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage:
  ixstore <index-file>                                     dump and verify an index
  ixstore create <index-file> <int|float|string> [length]  create an empty index";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ixstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(
        buffer_capacity = config.buffer_capacity,
        page_size = config.page_size,
        "loaded configuration"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.as_slice() {
        [path] => inspect(&config, Path::new(path)),
        [command, path, attr_type, rest @ ..] if command == "create" => {
            match parse_attribute(attr_type, rest) {
                Some((attr_type, length)) => create(&config, Path::new(path), attr_type, length),
                None => return usage(),
            }
        }
        _ => return usage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn usage() -> ExitCode {
    eprintln!("{USAGE}");
    ExitCode::FAILURE
}

/// Attribute type plus key width; numeric types default to 4 bytes.
fn parse_attribute(attr_type: &str, rest: &[String]) -> Option<(AttrType, usize)> {
    let attr_type = match attr_type {
        "int" => AttrType::Int,
        "float" => AttrType::Float,
        "string" => AttrType::String,
        _ => return None,
    };
    match rest {
        [] if attr_type != AttrType::String => Some((attr_type, 4)),
        [length] => length.parse().ok().map(|length| (attr_type, length)),
        _ => None,
    }
}

fn create(
    config: &EngineConfig,
    path: &Path,
    attr_type: AttrType,
    length: usize,
) -> Result<(), IndexError> {
    create_index_file(path, attr_type, length, config.page_size)?;
    tracing::info!(path = %path.display(), %attr_type, length, "created index");
    Ok(())
}

fn inspect(config: &EngineConfig, path: &Path) -> Result<(), IndexError> {
    let mut handle = IndexHandle::with_config(config);
    handle.open(path)?;

    let header = handle.header()?;
    tracing::info!(
        root = ?header.root,
        height = header.height,
        num_pages = header.num_pages,
        "opened index"
    );

    let stdout = std::io::stdout();
    handle.dump(&mut stdout.lock())?;

    let stats = handle.verify()?;
    println!(
        "ok: height {}, nodes per level {:?}, {} entries",
        stats.height, stats.nodes_per_level, stats.entries
    );

    handle.close()
}
