use clap::{Parser, Subcommand};
use depot_core::config::{CatalogSection, Config};
use depot_core::package::{NewPackage, PackagePatch};
use depot_store::{Catalog, CatalogOptions, ListQuery, ListSort, SchemaVersion};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "depot", version, about = "Package catalog for a distribution registry")]
struct Cli {
    #[arg(long, value_name = "PATH", help = "Catalog database path")]
    db: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Config file path")]
    config: Option<PathBuf>,
    #[arg(
        short = 'v',
        long = "verbose",
        help = "Increase verbosity",
        conflicts_with = "quiet"
    )]
    verbose: bool,
    #[arg(short = 'q', long = "quiet", help = "Suppress non-error output")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Create the catalog database")]
    Init {
        #[arg(long, help = "Create the legacy (v1) shape, for migration testing")]
        legacy: bool,
    },
    #[command(about = "Insert a package record")]
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        #[arg(long = "archive-path", value_name = "PATH")]
        archive_path: String,
        #[arg(long, help = "CRC-32 of the archive content, as supplied by the producer")]
        crc: u32,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "image-url")]
        image_url: Option<String>,
        #[arg(long = "executable-path", value_name = "PATH")]
        executable_path: Option<String>,
        #[arg(long = "has-installer")]
        has_installer: bool,
        #[arg(long = "add-to-path")]
        add_to_path: bool,
    },
    #[command(about = "Show one package by id")]
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Look a package up by exact name")]
    Find {
        name: String,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "List packages")]
    List {
        #[arg(long, value_name = "SUBSTRING", help = "Only names containing this")]
        contains: Option<String>,
        #[arg(long = "sort-name", help = "Sort by name instead of insertion order")]
        sort_name: bool,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Update fields of a package")]
    Set {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long = "archive-path", value_name = "PATH")]
        archive_path: Option<String>,
        #[arg(long)]
        crc: Option<u32>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "clear-description", conflicts_with = "description")]
        clear_description: bool,
        #[arg(long = "image-url")]
        image_url: Option<String>,
        #[arg(long = "clear-image-url", conflicts_with = "image_url")]
        clear_image_url: bool,
        #[arg(long = "executable-path", value_name = "PATH")]
        executable_path: Option<String>,
        #[arg(long = "clear-executable-path", conflicts_with = "executable_path")]
        clear_executable_path: bool,
        #[arg(long = "has-installer")]
        has_installer: Option<bool>,
        #[arg(long = "add-to-path")]
        add_to_path: Option<bool>,
    },
    #[command(about = "Delete a package; its id is never reused")]
    Remove { id: i64 },
    #[command(about = "Check an archive file against the stored checksum")]
    Verify {
        id: i64,
        archive: PathBuf,
    },
    #[command(about = "Migrate the catalog between schema versions")]
    Migrate {
        #[arg(long, value_name = "N", help = "Source version (defaults to the detected one)")]
        from: Option<u32>,
        #[arg(long, value_name = "N")]
        to: u32,
    },
    #[command(about = "Show catalog location, schema version and record count")]
    Status,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing home directory in environment")]
    MissingHome,
    #[error("config error: {0}")]
    Config(#[from] depot_core::config::ConfigError),
    #[error("{0}")]
    Store(#[from] depot_store::StoreError),
    #[error("failed to create directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to read archive {0}: {1}")]
    ReadArchive(PathBuf, std::io::Error),
    #[error("unknown schema version {0}, expected 1 or 2")]
    UnknownSchemaVersion(u32),
    #[error("failed to encode json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("nothing to change; pass at least one field flag")]
    EmptyPatch,
}

#[derive(Debug, Clone, Copy)]
struct Output {
    quiet: bool,
    verbose: bool,
}

impl Output {
    fn info(&self, message: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", message.as_ref());
        }
    }

    fn verbose(&self, message: impl AsRef<str>) {
        if self.verbose && !self.quiet {
            eprintln!("{}", message.as_ref());
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let output = Output {
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    let settings = load_settings(&cli)?;
    let path = db_path(&cli, &settings);
    let legacy_init = matches!(cli.command, Command::Init { legacy: true });
    let catalog = open_catalog(&path, &settings, legacy_init, &output)?;

    match cli.command {
        Command::Init { .. } => {
            // open_catalog already created the database; --legacy only
            // applies to files that did not exist yet.
            output.info(format!(
                "initialized catalog at {} (schema {})",
                path.display(),
                catalog.schema_version()?
            ));
            Ok(())
        }
        Command::Add {
            name,
            version,
            archive_path,
            crc,
            description,
            image_url,
            executable_path,
            has_installer,
            add_to_path,
        } => {
            let pkg = NewPackage {
                name,
                description,
                version,
                image_url,
                archive_path,
                executable_path,
                crc,
                has_installer,
                add_to_path,
            };
            let id = catalog.insert(&pkg)?;
            output.info(format!("added package {} with id {}", pkg.name, id));
            Ok(())
        }
        Command::Show { id, json } => {
            let record = catalog.get(id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record(&record, &output);
            }
            Ok(())
        }
        Command::Find { name, json } => {
            let record = catalog.find_by_name(&name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record(&record, &output);
            }
            Ok(())
        }
        Command::List {
            contains,
            sort_name,
            json,
        } => {
            let query = ListQuery {
                name: None,
                name_contains: contains,
                sort: if sort_name {
                    ListSort::Name
                } else {
                    ListSort::Insertion
                },
            };
            let records = catalog.list(&query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    output.info(format!(
                        "{:>4}  {}  {}  {}",
                        record.id, record.name, record.version, record.archive_path
                    ));
                }
                output.verbose(format!("{} packages", records.len()));
            }
            Ok(())
        }
        Command::Set {
            id,
            name,
            version,
            archive_path,
            crc,
            description,
            clear_description,
            image_url,
            clear_image_url,
            executable_path,
            clear_executable_path,
            has_installer,
            add_to_path,
        } => {
            let patch = PackagePatch {
                name,
                description: optional_change(description, clear_description),
                version,
                image_url: optional_change(image_url, clear_image_url),
                archive_path,
                executable_path: optional_change(executable_path, clear_executable_path),
                crc,
                has_installer,
                add_to_path,
            };
            if patch.is_empty() {
                return Err(CliError::EmptyPatch);
            }
            catalog.update(id, &patch)?;
            output.info(format!("updated package {}", id));
            Ok(())
        }
        Command::Remove { id } => {
            catalog.delete(id)?;
            output.info(format!("removed package {}; id stays retired", id));
            Ok(())
        }
        Command::Verify { id, archive } => {
            let bytes =
                std::fs::read(&archive).map_err(|err| CliError::ReadArchive(archive.clone(), err))?;
            catalog.verify_archive(id, &bytes)?;
            output.info(format!("archive {} matches the stored checksum", archive.display()));
            Ok(())
        }
        Command::Migrate { from, to } => {
            let to = SchemaVersion::from_number(to).ok_or(CliError::UnknownSchemaVersion(to))?;
            let from = match from {
                Some(number) => SchemaVersion::from_number(number)
                    .ok_or(CliError::UnknownSchemaVersion(number))?,
                None => catalog.schema_version()?,
            };
            catalog.migrate(from, to)?;
            output.info(format!("catalog migrated from schema {} to {}", from, to));
            Ok(())
        }
        Command::Status => {
            output.info(format!("catalog: {}", path.display()));
            output.info(format!("schema version: {}", catalog.schema_version()?));
            output.info(format!("packages: {}", catalog.count()?));
            Ok(())
        }
    }
}

fn optional_change(value: Option<String>, clear: bool) -> Option<Option<String>> {
    if clear {
        Some(None)
    } else {
        value.map(Some)
    }
}

fn print_record(record: &depot_core::package::PackageRecord, output: &Output) {
    output.info(format!("id: {}", record.id));
    output.info(format!("name: {}", record.name));
    output.info(format!("version: {}", record.version));
    if let Some(description) = &record.description {
        output.info(format!("description: {}", description));
    }
    if let Some(image_url) = &record.image_url {
        output.info(format!("image url: {}", image_url));
    }
    output.info(format!("archive path: {}", record.archive_path));
    if let Some(executable_path) = &record.executable_path {
        output.info(format!("executable path: {}", executable_path));
    }
    output.info(format!("crc: {:#010x}", record.crc));
    output.info(format!("has installer: {}", record.has_installer));
    output.info(format!("add to path: {}", record.add_to_path));
}

fn load_settings(cli: &Cli) -> Result<CatalogSection, CliError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => home_dir()?.join(".config/depot/config.toml"),
    };
    if path.exists() {
        return Ok(Config::load_from_path(&path)?.catalog);
    }
    let db_path = home_dir()?
        .join(".local/share/depot/depot.sqlite")
        .to_string_lossy()
        .into_owned();
    Ok(CatalogSection {
        db_path,
        ..CatalogSection::default()
    })
}

fn db_path(cli: &Cli, settings: &CatalogSection) -> PathBuf {
    match &cli.db {
        Some(path) => path.clone(),
        None => PathBuf::from(&settings.db_path),
    }
}

fn open_catalog(
    path: &PathBuf,
    settings: &CatalogSection,
    legacy_init: bool,
    output: &Output,
) -> Result<Catalog, CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| CliError::CreateDir(parent.to_path_buf(), err))?;
        }
    }
    let options = CatalogOptions {
        busy_timeout: Duration::from_millis(settings.busy_timeout_ms),
    };
    output.verbose(format!("opening catalog at {}", path.display()));
    let catalog = if legacy_init && !path.exists() {
        Catalog::create_legacy(path)?
    } else {
        Catalog::open_with(path, options)?
    };
    Ok(catalog)
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(CliError::MissingHome)
}
