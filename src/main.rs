use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::mpsc;

use clap::{Parser, Subcommand};
use scoped_threadpool::Pool;
use tabwriter::TabWriter;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use header_skipper::headerer;
use header_skipper::skipper::ruleset;
use header_skipper::{Error, JsonHeaderStore, Offset, Registry, Result, Rule};

#[derive(Parser, Debug)]
#[command(name = "hskip", version)]
#[command(about = "Detects, strips and restores copier headers on ROM dumps")]
struct Args {
    /// Header store file [default: headers.json next to hskip]
    #[arg(long, env = "HSKIP_STORE", global = true)]
    store: Option<PathBuf>,

    /// Use this catalog instead of the built-in detectors
    #[arg(long, env = "HSKIP_CATALOG", global = true)]
    catalog: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    /// Worker threads [default: one per CPU]
    #[arg(short, long, global = true)]
    jobs: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Strip headers and remember them
    #[command(visible_alias = "ex")]
    Extract {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Write output here instead of next to each input
        #[arg(short, long)]
        outdir: Option<PathBuf>,

        /// Don't add headers to the store
        #[arg(long)]
        no_store_header: bool,

        /// Only try this detector
        #[arg(long, default_value = "")]
        detector: String,
    },

    /// Put stored headers back
    #[command(visible_alias = "re")]
    Restore {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Write output here instead of next to each input
        #[arg(short, long)]
        outdir: Option<PathBuf>,
    },

    /// Show which rule each file matches
    Detect {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Only try this detector
        #[arg(long, default_value = "")]
        detector: String,
    },

    /// List known detectors
    List,

    /// Print the active catalog
    Catalog {
        /// As JSON instead of catalog text
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn default_store() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|x| x.parent().map(Path::to_path_buf));
    match exe_dir {
        Some(dir) => dir.join("headers.json"),
        None => PathBuf::from("headers.json"),
    }
}

fn load_registry(catalog: Option<&Path>) -> Result<Registry> {
    match catalog {
        Some(path) => Registry::from_filepath(path),
        None => {
            let registry = Registry::new();
            registry.init();
            Ok(registry)
        }
    }
}

/// Expand directories into the files below them
fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            match entry {
                Ok(x) if x.file_type().is_file() => files.push(x.into_path()),
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable entry: {}", e),
            }
        }
    }
    files
}

/// Run `f` on every file on a pool of `jobs` threads. Results come back in
/// input order.
fn par_map<T, F>(jobs: u32, files: &[PathBuf], f: F) -> Vec<(PathBuf, T)>
where
    T: Send,
    F: Fn(&Path) -> T + Sync,
{
    let mut pool = Pool::new(jobs.max(1));
    let (tx, rx) = mpsc::channel();

    pool.scoped(|scope| {
        for (i, file) in files.iter().enumerate() {
            let tx = tx.clone();
            let f = &f;
            scope.execute(move || {
                // The receiver outlives the pool
                let _ = tx.send((i, f(file)));
            });
        }
    });
    drop(tx);

    let mut results: Vec<(usize, T)> = rx.into_iter().collect();
    results.sort_by_key(|x| x.0);
    results
        .into_iter()
        .map(|(i, x)| (files[i].clone(), x))
        .collect()
}

fn extract(
    args: &Args,
    registry: &Registry,
    paths: &[PathBuf],
    outdir: Option<&Path>,
    no_store: bool,
    detector: &str,
) -> Result<bool> {
    let files = collect_files(paths);
    let jobs = args.jobs.unwrap_or(num_cpus::get() as u32);
    let results = par_map(jobs, &files, |file| {
        headerer::detect_and_transform(registry, file, detector, outdir)
    });

    let mut store = if no_store {
        None
    } else {
        let path = args.store.clone().unwrap_or_else(default_store);
        Some(JsonHeaderStore::open(&path)?)
    };

    let mut all_ok = true;
    for (file, result) in results {
        let extraction = match result {
            Ok(x) => x,
            Err(Error::NoMatch(_)) => {
                println!("{}: no header", file.display());
                continue;
            }
            Err(e) => {
                error!("{}: {}", file.display(), e);
                all_ok = false;
                continue;
            }
        };
        println!(
            "{}: {} header removed -> {}",
            file.display(),
            extraction.source,
            extraction.output.display()
        );

        if let Some(store) = store.as_mut() {
            if !extraction.store(store)? {
                debug!("header for {} already stored", extraction.digest);
            }
        }
    }

    if let Some(store) = store {
        store.save()?;
    }
    Ok(all_ok)
}

fn restore(args: &Args, paths: &[PathBuf], outdir: Option<&Path>) -> Result<bool> {
    let path = args.store.clone().unwrap_or_else(default_store);
    let store = JsonHeaderStore::open(&path)?;

    let files = collect_files(paths);
    let jobs = args.jobs.unwrap_or(num_cpus::get() as u32);
    let results = par_map(jobs, &files, |file| headerer::restore_file(file, outdir, &store));

    let mut all_ok = true;
    for (file, result) in results {
        match result {
            Ok(outputs) => {
                for output in outputs {
                    println!("{}: restored -> {}", file.display(), output.display());
                }
            }
            Err(Error::NoMatch(_)) => println!("{}: no stored header", file.display()),
            Err(e) => {
                error!("{}: {}", file.display(), e);
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

fn window(rule: &Rule) -> String {
    let show = |x: Option<Offset>| x.map(|x| x.to_string()).unwrap_or_default();
    format!("{}..{}", show(rule.start_offset()), show(rule.end_offset()))
}

fn detect(args: &Args, registry: &Registry, paths: &[PathBuf], detector: &str) -> Result<bool> {
    let files = collect_files(paths);
    let jobs = args.jobs.unwrap_or(num_cpus::get() as u32);
    let results = par_map(jobs, &files, |file| registry.find_match_filepath(file, detector));

    let mut tw = TabWriter::new(io::stdout());
    writeln!(tw, "FILE\tDETECTOR\tOPERATION\tWINDOW")?;
    for (file, rule) in results {
        match rule.source() {
            Some(source) => writeln!(
                tw,
                "{}\t{}\t{}\t{}",
                file.display(),
                source,
                rule.operation(),
                window(&rule)
            )?,
            None => writeln!(tw, "{}\t-\t-\t-", file.display())?,
        }
    }
    tw.flush()?;
    Ok(true)
}

fn list(registry: &Registry) -> Result<bool> {
    let mut tw = TabWriter::new(io::stdout());
    writeln!(tw, "ID\tNAME\tAUTHOR\tVERSION\tRULES")?;
    for d in registry.detectors() {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}",
            d.source(),
            d.name(),
            d.author(),
            d.version(),
            d.rules().len()
        )?;
    }
    tw.flush()?;
    Ok(true)
}

fn catalog(registry: &Registry, json: bool) -> Result<bool> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, registry.detectors())?;
        writeln!(out)?;
    } else {
        write!(out, "{}", ruleset::to_string(registry.detectors()))?;
    }
    Ok(true)
}

fn check_detector(registry: &Registry, name: &str) {
    if !name.is_empty() && registry.detector(name).is_none() {
        warn!("no detector is called {:?}, nothing will match", name);
    }
}

fn run(args: &Args) -> Result<bool> {
    let registry = load_registry(args.catalog.as_deref())?;

    match args.command {
        Command::Extract { ref paths, ref outdir, no_store_header, ref detector } => {
            check_detector(&registry, detector);
            extract(args, &registry, paths, outdir.as_deref(), no_store_header, detector)
        }
        Command::Restore { ref paths, ref outdir } => restore(args, paths, outdir.as_deref()),
        Command::Detect { ref paths, ref detector } => {
            check_detector(&registry, detector);
            detect(args, &registry, paths, detector)
        }
        Command::List => list(&registry),
        Command::Catalog { json } => catalog(&registry, json),
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    match run(&args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("{}", e);
            eprintln!("hskip: {}", e);
            process::exit(2);
        }
    }
}
