use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ena_fetch::app::{App, Selection};
use ena_fetch::config::{ConfigLoader, Overrides, ResolvedConfig};
use ena_fetch::domain::{Accession, TaxonId, TaxonResult};
use ena_fetch::error::EnaError;
use ena_fetch::output::print_summary;
use ena_fetch::progress::BarProgress;
use ena_fetch::shutdown::{FORCED_EXIT_CODE, install_signal_handler};
use ena_fetch::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "ena-fetch")]
#[command(about = "Download checksum-verified FASTQ runs and assemblies from ENA")]
#[command(version)]
struct Cli {
    /// Run, experiment, sample, study or project accessions.
    #[arg(long = "acc", num_args = 1..)]
    accessions: Vec<String>,

    /// File with one accession per line.
    #[arg(long)]
    accfile: Option<PathBuf>,

    /// NCBI taxonomy ids; everything beneath each taxon is fetched.
    #[arg(long = "taxid", num_args = 1..)]
    taxa: Vec<String>,

    /// What a taxon id expands to.
    #[arg(long, value_enum)]
    taxon_result: Option<TaxonResult>,

    /// Output directory [default: ./ENA_out]
    #[arg(short, long)]
    outdir: Option<PathBuf>,

    /// Records downloaded in parallel [default: 12]
    #[arg(short, long)]
    threads: Option<usize>,

    /// Attempts per file transfer [default: 15]
    #[arg(long)]
    transfer_attempts: Option<u32>,

    /// Full fetch-verify passes per record, 0 for unlimited [default: 10]
    #[arg(long)]
    item_attempts: Option<u32>,

    /// Wall-clock limit per record, in seconds.
    #[arg(long, value_name = "SECS")]
    item_timeout: Option<u64>,

    /// Keep only runs from this instrument platform, e.g. ILLUMINA.
    #[arg(long)]
    platform: Option<String>,

    /// Keep only runs with this library source, e.g. GENOMIC.
    #[arg(long)]
    library_source: Option<String>,

    /// JSON config file [default: ./ena-fetch.json when present]
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    no_progress: bool,
}

impl Cli {
    fn selection(&self) -> Result<Option<Selection>, EnaError> {
        if !self.accessions.is_empty() {
            let accessions = self
                .accessions
                .iter()
                .map(|value| value.parse::<Accession>())
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Some(Selection::Accessions(accessions)));
        }
        if let Some(path) = &self.accfile {
            return Ok(Some(Selection::AccessionFile(path.clone())));
        }
        if !self.taxa.is_empty() {
            let taxa = self
                .taxa
                .iter()
                .map(|value| value.parse::<TaxonId>())
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Some(Selection::Taxa(taxa)));
        }
        Ok(None)
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            outdir: self.outdir.clone(),
            threads: self.threads,
            transfer_attempts: self.transfer_attempts,
            item_attempts: self.item_attempts,
            item_timeout_secs: self.item_timeout,
            taxon_result: self.taxon_result,
            platform: self.platform.clone(),
            library_source: self.library_source.clone(),
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<EnaError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EnaError) -> u8 {
    match error {
        EnaError::InvalidAccession(_)
        | EnaError::InvalidTaxonId(_)
        | EnaError::ConfigRead(_)
        | EnaError::ConfigParse(_)
        | EnaError::InvalidConfig(_)
        | EnaError::AccessionFile(_) => 2,
        EnaError::HttpClient(_) | EnaError::MetadataParse { .. } => 3,
        EnaError::Cancelled => FORCED_EXIT_CODE as u8,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(selection) = cli.selection()? else {
        Cli::command().print_help().into_diagnostic()?;
        return Ok(());
    };
    let config = ConfigLoader::resolve(cli.config.as_deref(), cli.overrides())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    runtime.block_on(execute(selection, config, cli.no_progress))
}

async fn execute(
    selection: Selection,
    config: ResolvedConfig,
    no_progress: bool,
) -> miette::Result<()> {
    let cancel = install_signal_handler();
    let transport = HttpTransport::new(config.transfer.clone(), cancel.clone())?;
    let progress = BarProgress::new(no_progress);
    let app = App::new(transport, config, cancel.clone());

    let mut report = app.run(selection, &progress).await?;
    print_summary(&report).into_diagnostic()?;
    if let Some(err) = report.stopped.take() {
        return Err(err.into());
    }
    if cancel.is_cancelled() {
        return Err(EnaError::Cancelled.into());
    }
    Ok(())
}
