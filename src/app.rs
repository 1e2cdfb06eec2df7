//! Selection modes on top of the engine.
//!
//! Every mode reduces to the same two phases driven by one [`Coordinator`]:
//! fetch listings (file reports, taxon searches or taxon link documents) into
//! the cache, then fetch the files they name.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use futures_util::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::ResolvedConfig;
use crate::coordinator::Coordinator;
use crate::domain::{Accession, Location, TaxonId, TaxonResult};
use crate::ena;
use crate::engine::{FailureKind, FetchOutcome, fetch_asset, outcome_for_error};
use crate::error::{EnaError, ResolutionError};
use crate::metadata::MetadataTable;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::resolve::resolve_all;
use crate::store::Store;
use crate::transport::{Transport, sweep_partials};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Accessions(Vec<Accession>),
    AccessionFile(PathBuf),
    Taxa(Vec<TaxonId>),
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Per-record outcomes in completion order, plus failed listings.
    pub outcomes: Vec<FetchOutcome>,
    pub rejected: Vec<ResolutionError>,
    pub table_path: Option<Utf8PathBuf>,
    /// Set when a local disk failure stopped the run early. The outcomes
    /// collected up to that point are still reported.
    pub stopped: Option<EnaError>,
}

impl RunReport {
    pub fn ok_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.ok_count()
    }
}

#[derive(Debug, Clone)]
struct Listing {
    id: String,
    location: Location,
    cache: Utf8PathBuf,
}

#[derive(Debug, Clone)]
struct Asset {
    name: String,
    location: Location,
    path: PathBuf,
}

pub struct App<T: Transport> {
    transport: T,
    store: Store,
    config: ResolvedConfig,
    coordinator: Coordinator,
}

impl<T: Transport> App<T> {
    pub fn new(transport: T, config: ResolvedConfig, cancel: CancellationToken) -> Self {
        let store = Store::new(config.outdir.clone());
        let coordinator = Coordinator::new(config.concurrency, cancel);
        Self {
            transport,
            store,
            config,
            coordinator,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub async fn run(
        &self,
        selection: Selection,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, EnaError> {
        self.store.ensure_root()?;
        self.store.ensure_tmp()?;

        let report = match selection {
            Selection::Accessions(accessions) => self.run_accessions(accessions, sink).await,
            Selection::AccessionFile(path) => {
                let accessions = read_accession_file(&path)?;
                tracing::info!("Read {} accessions from {}", accessions.len(), path.display());
                self.run_accessions(accessions, sink).await
            }
            Selection::Taxa(taxa) => match self.config.taxon_result {
                TaxonResult::ReadRun => self.run_taxon_runs(taxa, sink).await,
                TaxonResult::Assembly => self.run_taxon_assemblies(taxa, sink).await,
            },
        };
        sink.event(ProgressEvent::Finished);
        report
    }

    async fn run_accessions(
        &self,
        accessions: Vec<Accession>,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, EnaError> {
        let listings = accessions
            .iter()
            .map(|acc| {
                Ok(Listing {
                    id: acc.to_string(),
                    location: self.config.endpoints.file_report(acc)?,
                    cache: self.store.report_cache_path(acc),
                })
            })
            .collect::<Result<Vec<_>, EnaError>>()?;
        self.run_listed_records(listings, sink).await
    }

    async fn run_taxon_runs(
        &self,
        taxa: Vec<TaxonId>,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, EnaError> {
        let listings = taxa
            .iter()
            .map(|taxid| {
                Ok(Listing {
                    id: format!("taxon {taxid}"),
                    location: self.config.endpoints.taxon_runs(taxid)?,
                    cache: self.store.taxon_cache_path(taxid, "tsv"),
                })
            })
            .collect::<Result<Vec<_>, EnaError>>()?;
        self.run_listed_records(listings, sink).await
    }

    /// Metadata tables to downloaded, verified record directories.
    async fn run_listed_records(
        &self,
        listings: Vec<Listing>,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, EnaError> {
        let mut report = RunReport::default();
        let fetched = self.fetch_listings(listings, &mut report, sink).await;
        if report.stopped.is_some() {
            return Ok(report);
        }

        let mut tables = Vec::new();
        for listing in fetched {
            match MetadataTable::from_path(listing.cache.as_std_path()) {
                Ok(table) => tables.push(table),
                Err(err) => {
                    tracing::warn!("{err}");
                    // A bad cached listing would otherwise be reused forever.
                    if let Err(remove_err) = fs::remove_file(listing.cache.as_std_path()) {
                        tracing::debug!("cannot drop {}: {remove_err}", listing.cache);
                    }
                    report.outcomes.push(FetchOutcome::failed(
                        listing.id,
                        FailureKind::Permanent,
                        err.to_string(),
                    ));
                }
            }
        }
        let table = MetadataTable::concat(tables);

        let filter = &self.config.filter;
        if !table.headers.is_empty() {
            let date = chrono::Local::now().date_naive();
            let path = self.store.aggregate_table_path(date);
            let content = table.to_tsv(|record| filter.matches(record))?;
            Store::write_bytes_atomic(&path, &content)?;
            tracing::info!("Wrote metadata table {path}");
            report.table_path = Some(path);
        }

        let selected: Vec<_> = table
            .records
            .iter()
            .filter(|record| filter.matches(record))
            .collect();
        if !filter.is_empty() {
            tracing::info!(
                "{} of {} records match the filter",
                selected.len(),
                table.records.len()
            );
        }

        let work = match resolve_all(selected, |record| {
            self.store.record_dir(&record.id).into_std_path_buf()
        }) {
            Ok(work) => work,
            Err(err) => {
                tracing::error!("Stopping run: {err}");
                report.stopped = Some(EnaError::Filesystem(err.to_string()));
                return Ok(report);
            }
        };
        report.rejected = work.rejected;

        let outcomes = self.coordinator.run_work_items(
            &self.transport,
            work.items,
            &self.config.item,
            sink,
        );
        report.stopped = self.drain(outcomes, &mut report.outcomes).await;
        Ok(report)
    }

    async fn run_taxon_assemblies(
        &self,
        taxa: Vec<TaxonId>,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, EnaError> {
        let listings = taxa
            .iter()
            .map(|taxid| {
                Ok(Listing {
                    id: format!("taxon {taxid}"),
                    location: self.config.endpoints.taxon_assemblies(taxid)?,
                    cache: self.store.taxon_cache_path(taxid, "xml"),
                })
            })
            .collect::<Result<Vec<_>, EnaError>>()?;

        let mut report = RunReport::default();
        let fetched = self.fetch_listings(listings, &mut report, sink).await;
        if report.stopped.is_some() {
            return Ok(report);
        }

        let mut names = HashSet::new();
        let mut assets = Vec::new();
        for listing in fetched {
            let xml = fs::read_to_string(listing.cache.as_std_path())
                .map_err(|err| EnaError::Filesystem(format!("{}: {err}", listing.cache)))?;
            let locations = ena::extract_assembly_urls(&xml)?;
            tracing::info!("{} lists {} assemblies", listing.id, locations.len());
            for location in locations {
                let Some(name) = location.file_name().map(str::to_string) else {
                    tracing::warn!("Skipping assembly link without a file name: {location}");
                    continue;
                };
                if names.insert(name.clone()) {
                    assets.push(Asset {
                        path: self.store.genome_path(&name).into_std_path_buf(),
                        name,
                        location,
                    });
                }
            }
        }
        if assets.is_empty() {
            return Ok(report);
        }
        self.store.ensure_genomes()?;
        sweep_partials(
            self.store.genomes_dir().as_std_path(),
            names.iter().map(String::as_str),
        );

        let transport = &self.transport;
        let cancel = self.coordinator.cancel_token();
        let outcomes = self.coordinator.run(
            "Downloading assemblies",
            assets,
            sink,
            move |asset: Asset| async move {
                fetch_asset(transport, &asset.name, &asset.location, &asset.path, cancel).await
            },
        );
        report.stopped = self.drain(outcomes, &mut report.outcomes).await;
        Ok(report)
    }

    /// Fetch every listing not yet cached. Failed listings and a disk
    /// failure are recorded in `report`; the rest are returned for parsing.
    async fn fetch_listings(
        &self,
        listings: Vec<Listing>,
        report: &mut RunReport,
        sink: &dyn ProgressSink,
    ) -> Vec<Listing> {
        let by_id: HashMap<String, Listing> = listings
            .iter()
            .map(|listing| (listing.id.clone(), listing.clone()))
            .collect();
        let transport = &self.transport;
        let cancel = self.coordinator.cancel_token();
        let outcomes = self.coordinator.run(
            "Fetching metadata",
            listings,
            sink,
            move |listing: Listing| async move {
                if cancel.is_cancelled() {
                    return FetchOutcome::failed(listing.id, FailureKind::Cancelled, "cancelled");
                }
                match ena::fetch_cached(transport, &listing.location, &listing.cache).await {
                    Ok(_) => FetchOutcome::success(listing.id),
                    Err(err) => {
                        tracing::warn!("Cannot fetch listing for {}: {err}", listing.id);
                        outcome_for_error(&listing.id, &err)
                    }
                }
            },
        );
        let mut listing_outcomes = Vec::new();
        report.stopped = self.drain(outcomes, &mut listing_outcomes).await;

        let mut fetched = Vec::new();
        for outcome in listing_outcomes {
            if outcome.is_success() {
                if let Some(listing) = by_id.get(&outcome.id) {
                    fetched.push(listing.clone());
                }
            } else {
                report.outcomes.push(outcome);
            }
        }
        fetched
    }

    /// Collect outcomes. A filesystem failure cancels the rest of the run
    /// and is returned once the in-flight items have settled.
    async fn drain(
        &self,
        outcomes: impl Stream<Item = FetchOutcome>,
        into: &mut Vec<FetchOutcome>,
    ) -> Option<EnaError> {
        let mut outcomes = std::pin::pin!(outcomes);
        let mut fatal = None;
        while let Some(outcome) = outcomes.next().await {
            if fatal.is_none() && outcome.failure == Some(FailureKind::Filesystem) {
                tracing::error!("Stopping run: {outcome}");
                self.coordinator.cancel_token().cancel();
                fatal = Some(outcome.message.clone().unwrap_or_else(|| outcome.id.clone()));
            }
            into.push(outcome);
        }
        fatal.map(EnaError::Filesystem)
    }
}

/// Newline-delimited accessions; blank lines and `#` comments are ignored.
pub fn read_accession_file(path: &Path) -> Result<Vec<Accession>, EnaError> {
    let content =
        fs::read_to_string(path).map_err(|_| EnaError::AccessionFile(path.to_path_buf()))?;
    let mut seen = HashSet::new();
    let mut accessions = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let acc: Accession = line.parse()?;
        if seen.insert(acc.clone()) {
            accessions.push(acc);
        }
    }
    Ok(accessions)
}
