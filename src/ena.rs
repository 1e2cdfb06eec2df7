//! Archive endpoints and cached metadata retrieval.

use std::path::Path;

use camino::Utf8Path;
use regex::Regex;
use reqwest::Url;

use crate::domain::{Accession, Location, TaxonId};
use crate::error::{EnaError, FetchError};
use crate::metadata::REPORT_FIELDS;
use crate::transport::Transport;

pub const DEFAULT_PORTAL_URL: &str = "https://www.ebi.ac.uk/ena/portal/api";
pub const DEFAULT_BROWSER_URL: &str = "https://www.ebi.ac.uk/ena/browser/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnaEndpoints {
    pub portal_url: String,
    pub browser_url: String,
}

impl Default for EnaEndpoints {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            browser_url: DEFAULT_BROWSER_URL.to_string(),
        }
    }
}

impl EnaEndpoints {
    /// File report listing every run beneath `acc`.
    pub fn file_report(&self, acc: &Accession) -> Result<Location, EnaError> {
        endpoint(
            &self.portal_url,
            "filereport",
            &[
                ("accession", acc.as_str()),
                ("result", "read_run"),
                ("fields", &REPORT_FIELDS.join(",")),
                ("format", "tsv"),
            ],
        )
    }

    /// Every run in the taxonomy subtree of `taxid`.
    pub fn taxon_runs(&self, taxid: &TaxonId) -> Result<Location, EnaError> {
        endpoint(
            &self.portal_url,
            "search",
            &[
                ("result", "read_run"),
                ("query", &format!("tax_tree({taxid})")),
                ("fields", &REPORT_FIELDS.join(",")),
                ("format", "tsv"),
                ("limit", "0"),
            ],
        )
    }

    /// XML links to the assemblies in the taxonomy subtree of `taxid`.
    pub fn taxon_assemblies(&self, taxid: &TaxonId) -> Result<Location, EnaError> {
        endpoint(
            &self.browser_url,
            "xml/links/taxon",
            &[
                ("accession", taxid.as_str()),
                ("result", "assembly"),
                ("subtree", "true"),
            ],
        )
    }
}

fn endpoint(base: &str, path: &str, query: &[(&str, &str)]) -> Result<Location, EnaError> {
    let mut url = Url::parse(&format!("{}/{path}", base.trim_end_matches('/')))
        .map_err(|err| EnaError::InvalidConfig(format!("endpoint {base}: {err}")))?;
    url.query_pairs_mut().extend_pairs(query);
    url.as_str().parse()
}

/// Download `location` into `cache` unless it is already there. Returns
/// whether a request was made.
pub async fn fetch_cached<T: Transport>(
    transport: &T,
    location: &Location,
    cache: &Utf8Path,
) -> Result<bool, FetchError> {
    let path: &Path = cache.as_std_path();
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        tracing::debug!(cache = %cache, "using cached listing");
        return Ok(false);
    }
    transport.fetch(location, path).await?;
    Ok(true)
}

/// Compressed FASTA links listed in a taxon links document.
pub fn extract_assembly_urls(xml: &str) -> Result<Vec<Location>, EnaError> {
    let pattern = Regex::new(r"<URL>\s*((?:ftp|https?)://[^<\s]*?\.fasta\.gz)\s*</URL>")
        .map_err(|err| EnaError::InvalidConfig(err.to_string()))?;
    let mut seen = std::collections::HashSet::new();
    let mut locations = Vec::new();
    for captures in pattern.captures_iter(xml) {
        let raw = &captures[1];
        if seen.insert(raw.to_string()) {
            locations.push(raw.parse()?);
        }
    }
    Ok(locations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_report_url() {
        let acc: Accession = "PRJEB1787".parse().unwrap();
        let location = EnaEndpoints::default().file_report(&acc).unwrap();
        let url = location.to_url().unwrap();
        assert_eq!(url.path(), "/ena/portal/api/filereport");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("accession".to_string(), "PRJEB1787".to_string())));
        assert!(pairs.contains(&("result".to_string(), "read_run".to_string())));
        let fields = pairs
            .iter()
            .find(|(key, _)| key == "fields")
            .map(|(_, value)| value.clone())
            .unwrap();
        assert!(fields.contains("fastq_ftp"));
        assert!(fields.contains("fastq_md5"));
    }

    #[test]
    fn taxon_urls() {
        let taxid: TaxonId = "562".parse().unwrap();
        let endpoints = EnaEndpoints {
            portal_url: "http://127.0.0.1:9000/portal/".to_string(),
            browser_url: "http://127.0.0.1:9000/browser".to_string(),
        };
        let runs = endpoints.taxon_runs(&taxid).unwrap().to_url().unwrap();
        assert_eq!(runs.path(), "/portal/search");
        assert!(
            runs.query_pairs()
                .any(|(key, value)| key == "query" && value == "tax_tree(562)")
        );
        let assemblies = endpoints.taxon_assemblies(&taxid).unwrap().to_url().unwrap();
        assert_eq!(assemblies.path(), "/browser/xml/links/taxon");
        assert!(
            assemblies
                .query_pairs()
                .any(|(key, value)| key == "subtree" && value == "true")
        );
    }

    #[test]
    fn extracts_fasta_links_once() {
        let xml = r#"<ENA_LINKS>
  <LINK><URL>ftp://ftp.ebi.ac.uk/pub/databases/ena/wgs/public/ab/AB1.fasta.gz</URL></LINK>
  <LINK><URL>ftp://ftp.ebi.ac.uk/pub/databases/ena/wgs/public/ab/AB1.fasta.gz</URL></LINK>
  <LINK><URL>ftp://ftp.ebi.ac.uk/pub/databases/ena/wgs/public/ab/AB1.dat.gz</URL></LINK>
  <LINK><URL>ftp://ftp.ebi.ac.uk/pub/databases/ena/wgs/public/cd/CD2.fasta.gz</URL></LINK>
</ENA_LINKS>"#;
        let urls = extract_assembly_urls(xml).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].file_name(), Some("AB1.fasta.gz"));
        assert_eq!(urls[1].file_name(), Some("CD2.fasta.gz"));
    }
}
