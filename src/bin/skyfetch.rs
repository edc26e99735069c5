use std::collections::BTreeMap;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use skyfetch::app::{App, FetchOptions, RunSummary};
use skyfetch::config::ConfigLoader;
use skyfetch::domain::{Archive, Credentials, TargetName};
use skyfetch::error::SkyError;
use skyfetch::output::{JsonOutput, LogSink, OutputMode};
use skyfetch::prompt::{prompt_credentials, prompt_line};
use skyfetch::providers::build_backends;
use skyfetch::region::{AngleUnit, SkyRegion, parse_sexagesimal};
use skyfetch::resolver::{NameResolver, ResolvedPosition, SesameResolver};
use skyfetch::store::Store;
use skyfetch::transfer::CancelFlag;

#[derive(Parser)]
#[command(name = "skyfetch")]
#[command(about = "Find and fetch raw CFHT, ESO and SMOKA frames of a sky target with matching calibrations")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search the archives and fetch science and calibration frames")]
    Fetch(FetchArgs),
    #[command(about = "Resolve a target name to ICRS coordinates")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct FetchArgs {
    target: Option<String>,

    /// Search radius in degrees.
    #[arg(long, conflicts_with = "box_size")]
    radius: Option<f64>,

    /// Box half-widths in degrees.
    #[arg(long = "box", num_args = 2, value_names = ["RA_HALF", "DEC_HALF"])]
    box_size: Option<Vec<f64>>,

    /// Right ascension in degrees, or hh:mm:ss.
    #[arg(long, requires = "dec", allow_hyphen_values = true)]
    ra: Option<String>,

    /// Declination in degrees, or dd:mm:ss.
    #[arg(long, requires = "ra", allow_hyphen_values = true)]
    dec: Option<String>,

    #[arg(long = "archive")]
    archives: Vec<Archive>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    dry_run: bool,

    /// Stop starting new downloads after this many minutes.
    #[arg(long, value_name = "MINUTES")]
    time_limit: Option<u64>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ResolveArgs {
    target: String,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(exit_code(&report));
    }
    ExitCode::SUCCESS
}

fn exit_code(report: &miette::Report) -> u8 {
    report.downcast_ref::<SkyError>().map(map_exit_code).unwrap_or(1)
}

fn map_exit_code(error: &SkyError) -> u8 {
    match error {
        err if err.is_fatal() => 2,
        SkyError::UnresolvedTarget(_) => 2,
        SkyError::ArchiveHttp { .. }
        | SkyError::ArchiveStatus { .. }
        | SkyError::MalformedTable { .. }
        | SkyError::ResolverHttp(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::Resolve(args) => run_resolve(args),
    }
}

fn run_resolve(args: ResolveArgs) -> miette::Result<()> {
    let target: TargetName = args.target.parse()?;
    let resolver = SesameResolver::new()?;
    let position = resolver.resolve(&target)?;
    if args.json {
        JsonOutput::print_position(&position).into_diagnostic()?;
    } else {
        println!("{target}: ra={:.6} dec={:+.6}", position.ra_deg, position.dec_deg);
    }
    Ok(())
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let interactive = matches!(output_mode, OutputMode::Interactive);

    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    config.restrict_to(&args.archives);
    if let Some(output) = args.output.clone() {
        config.output_root = Some(output);
    }

    let target = read_target(args.target.as_deref(), interactive)?;
    let (ra_deg, dec_deg) = read_center(&args, &target)?;
    let region = read_region(&args, ra_deg, dec_deg, interactive)?;

    let store = Store::new(config.output_root.as_deref())?;
    let backends = build_backends(&config, &store)?;
    let cancel = CancelFlag::new();
    let app = App::new(store, config, backends).with_cancel(cancel.clone());

    let options = FetchOptions {
        dry_run: args.dry_run,
    };
    let credentials = if options.dry_run {
        BTreeMap::new()
    } else {
        collect_credentials(&app, interactive)?
    };
    if let Some(minutes) = args.time_limit {
        cancel_after(cancel, Duration::from_secs(minutes.saturating_mul(60)));
    }

    let summary = if args.json {
        app.fetch(&target, &region, &credentials, &options, &JsonOutput)
    } else {
        app.fetch(&target, &region, &credentials, &options, &LogSink)
    }?;

    if args.json {
        JsonOutput::print_summary(&summary).into_diagnostic()?;
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn cancel_after(cancel: CancelFlag, limit: Duration) {
    thread::spawn(move || {
        thread::sleep(limit);
        tracing::warn!("time limit of {}s reached; remaining downloads are skipped", limit.as_secs());
        cancel.cancel();
    });
}

fn read_target(value: Option<&str>, interactive: bool) -> Result<TargetName, SkyError> {
    match value {
        Some(value) => value.parse(),
        None if interactive => loop {
            let line = prompt_line("Target name: ")?;
            match line.parse() {
                Ok(target) => break Ok(target),
                Err(err) => eprintln!("{err}"),
            }
        },
        None => Err(SkyError::InvalidTarget(String::new())),
    }
}

fn read_center(args: &FetchArgs, target: &TargetName) -> Result<(f64, f64), SkyError> {
    if let (Some(ra), Some(dec)) = (args.ra.as_deref(), args.dec.as_deref()) {
        let ra_unit = if ra.contains(':') || ra.trim().contains(' ') {
            AngleUnit::Hours
        } else {
            AngleUnit::Degrees
        };
        return Ok((
            parse_sexagesimal(ra, ra_unit)?,
            parse_sexagesimal(dec, AngleUnit::Degrees)?,
        ));
    }
    let resolver = SesameResolver::new()?;
    let ResolvedPosition { ra_deg, dec_deg } = resolver.resolve(target)?;
    tracing::info!("{target} resolved to ra={ra_deg:.5} dec={dec_deg:+.5}");
    Ok((ra_deg, dec_deg))
}

fn read_region(
    args: &FetchArgs,
    ra_deg: f64,
    dec_deg: f64,
    interactive: bool,
) -> Result<SkyRegion, SkyError> {
    if let Some(radius) = args.radius {
        return SkyRegion::circle(ra_deg, dec_deg, radius);
    }
    if let Some(halves) = args.box_size.as_deref() {
        let [ra_half, dec_half] = halves else {
            return Err(SkyError::InvalidExtent("--box takes two values".to_string()));
        };
        return SkyRegion::rectangle(ra_deg, dec_deg, *ra_half, *dec_half);
    }
    if !interactive {
        return Err(SkyError::InvalidExtent(
            "--radius or --box is required".to_string(),
        ));
    }

    let shape = prompt_line("Search shape, radius or box (r/b): ")?;
    match shape.to_ascii_lowercase().as_str() {
        "r" => {
            let radius = read_degrees("Radius (deg): ")?;
            SkyRegion::circle(ra_deg, dec_deg, radius)
        }
        "b" => {
            let ra_half = read_degrees("RA half-width (deg): ")?;
            let dec_half = read_degrees("DEC half-width (deg): ")?;
            SkyRegion::rectangle(ra_deg, dec_deg, ra_half, dec_half)
        }
        _ => Err(SkyError::InvalidSearchShape(shape)),
    }
}

fn read_degrees(label: &str) -> Result<f64, SkyError> {
    let line = prompt_line(label)?;
    line.parse()
        .map_err(|_| SkyError::InvalidExtent(line.clone()))
}

/// Environment first, then prompts. Archives that cannot work without an
/// account are fatal when nothing is available non-interactively.
fn collect_credentials(
    app: &App,
    interactive: bool,
) -> Result<BTreeMap<Archive, Credentials>, SkyError> {
    let required = app.archives_requiring_credentials();
    let mut credentials = BTreeMap::new();
    for archive in app.archives_accepting_credentials() {
        if let Some(found) = Credentials::from_env(archive) {
            credentials.insert(archive, found);
            continue;
        }
        if !required.contains(&archive) {
            continue;
        }
        if !interactive {
            return Err(SkyError::MissingCredentials(archive.label().to_string()));
        }
        if let Some(found) = prompt_credentials(archive)? {
            credentials.insert(archive, found);
        }
    }
    Ok(credentials)
}

fn print_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}skyfetch summary for {}{reset}", summary.target);
    for archive in &summary.archives {
        println!(
            "{cyan}{}: {} unique artifacts in {} batches{reset}",
            archive.archive.label(),
            archive.unique_artifacts,
            archive.batches
        );
        for instrument in &archive.instruments {
            let counts = &instrument.counts;
            match &instrument.error {
                Some(error) => println!("{red}  {} failed: {error}{reset}", instrument.instrument),
                None => println!(
                    "  {}: science={} bias={} dark={} flat={}",
                    instrument.instrument, counts.science, counts.bias, counts.dark, counts.flat
                ),
            }
        }
        if !summary.dry_run {
            let transfers = &archive.transfers;
            println!(
                "{green}  downloaded {} / already present {}{reset}",
                transfers.downloaded, transfers.already_present
            );
            if transfers.failed > 0 {
                println!("{red}  failed {}{reset}", transfers.failed);
            }
        }
        for request in &archive.requests {
            println!("  request {request}");
        }
        for path in &archive.request_files {
            println!("  request file {path}");
        }
        if let Some(path) = &archive.manifest_path {
            println!("  manifest {path}");
        }
    }
    if !summary.warnings.is_empty() {
        println!("{yellow}Warnings: {}{reset}", summary.warnings.len());
        for warning in &summary.warnings {
            println!("{yellow}  {warning}{reset}");
        }
    }
}
