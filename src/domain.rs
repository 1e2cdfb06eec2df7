use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{EnaError, FetchError};

/// Run, experiment, sample, study or project accession understood by the
/// archive's file report endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = EnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let letters = normalized
            .chars()
            .take_while(|ch| ch.is_ascii_alphabetic())
            .count();
        let digits = &normalized[letters..];
        let is_valid = (2..=6).contains(&letters)
            && !digits.is_empty()
            && digits.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(EnaError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonId(String);

impl TaxonId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = EnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() || !normalized.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(EnaError::InvalidTaxonId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Lowercase hexadecimal MD5 digest as published in `fastq_md5`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, computed: &str) -> bool {
        self.0.eq_ignore_ascii_case(computed.trim())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Digest {
    type Err = EnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() || !normalized.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(EnaError::InvalidDigest(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// One remote file location, as it appears in the metadata table. The archive
/// publishes most of them without a scheme (`ftp.sra.ebi.ac.uk/vol1/...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location(String);

impl Location {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, used as the local file name.
    pub fn file_name(&self) -> Option<&str> {
        let path = self.0.split(['?', '#']).next().unwrap_or_default();
        let without_scheme = path.split_once("://").map_or(path, |(_, rest)| rest);
        let (_authority, tail) = without_scheme.split_once('/')?;
        let name = tail.trim_end_matches('/').rsplit('/').next()?;
        if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
            return None;
        }
        Some(name)
    }

    /// URL the transport should request. The archive mirrors its FTP tree
    /// over HTTPS, so bare and `ftp://` locations are fetched over HTTPS.
    pub fn to_url(&self) -> Result<reqwest::Url, FetchError> {
        let raw = self.0.as_str();
        let candidate = if let Some(rest) = raw.strip_prefix("ftp://") {
            format!("https://{rest}")
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else if raw.contains("://") {
            return Err(FetchError::InvalidLocation(raw.to_string()));
        } else {
            format!("https://{raw}")
        };
        let url = reqwest::Url::parse(&candidate)
            .map_err(|err| FetchError::InvalidLocation(format!("{raw}: {err}")))?;
        if url.host_str().is_none() {
            return Err(FetchError::InvalidLocation(raw.to_string()));
        }
        Ok(url)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Location {
    type Err = EnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(EnaError::InvalidLocation(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// What a taxon id expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TaxonResult {
    /// Genome assemblies beneath the taxon, fetched as FASTA.
    #[default]
    Assembly,
    /// Sequencing runs beneath the taxon, fetched like accessions.
    ReadRun,
}

impl fmt::Display for TaxonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxonResult::Assembly => write!(f, "assembly"),
            TaxonResult::ReadRun => write!(f, "read-run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_valid() {
        let acc: Accession = " srr014966 ".parse().unwrap();
        assert_eq!(acc.as_str(), "SRR014966");
        let project: Accession = "PRJEB1787".parse().unwrap();
        assert_eq!(project.as_str(), "PRJEB1787");
    }

    #[test]
    fn parse_accession_invalid() {
        let err = "12345".parse::<Accession>().unwrap_err();
        assert_matches!(err, EnaError::InvalidAccession(_));
        let err = "SRR12a".parse::<Accession>().unwrap_err();
        assert_matches!(err, EnaError::InvalidAccession(_));
    }

    #[test]
    fn parse_taxon() {
        assert_eq!("562".parse::<TaxonId>().unwrap().as_str(), "562");
        assert_matches!("E.coli".parse::<TaxonId>(), Err(EnaError::InvalidTaxonId(_)));
    }

    #[test]
    fn digest_is_lowercased() {
        let digest: Digest = "D41D8CD98F00B204E9800998ECF8427E".parse().unwrap();
        assert_eq!(digest.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        assert!(digest.matches("d41d8cd98f00b204e9800998ecf8427E"));
        assert_matches!("xyz".parse::<Digest>(), Err(EnaError::InvalidDigest(_)));
    }

    #[test]
    fn location_urls() {
        let bare: Location = "ftp.sra.ebi.ac.uk/vol1/fastq/SRR014/SRR014966/SRR014966_1.fastq.gz"
            .parse()
            .unwrap();
        assert_eq!(
            bare.to_url().unwrap().as_str(),
            "https://ftp.sra.ebi.ac.uk/vol1/fastq/SRR014/SRR014966/SRR014966_1.fastq.gz"
        );
        assert_eq!(bare.file_name(), Some("SRR014966_1.fastq.gz"));

        let ftp: Location = "ftp://ftp.ebi.ac.uk/pub/a.fasta.gz".parse().unwrap();
        assert_eq!(
            ftp.to_url().unwrap().as_str(),
            "https://ftp.ebi.ac.uk/pub/a.fasta.gz"
        );

        let http: Location = "http://127.0.0.1:8080/files/a.fastq.gz".parse().unwrap();
        assert_eq!(http.to_url().unwrap().scheme(), "http");

        let bad: Location = "s3://bucket/key".parse().unwrap();
        assert_matches!(bad.to_url(), Err(FetchError::InvalidLocation(_)));
    }

    #[test]
    fn location_without_file_name() {
        let loc: Location = "host.only".parse().unwrap();
        assert_eq!(loc.file_name(), None);
        let dots: Location = "host/path/..".parse().unwrap();
        assert_eq!(dots.file_name(), None);
        let scheme_only: Location = "ftp://host".parse().unwrap();
        assert_eq!(scheme_only.file_name(), None);
        let root: Location = "https://host/".parse().unwrap();
        assert_eq!(root.file_name(), None);
        let nested: Location = "ftp://host/pub/a.fasta.gz?x=1".parse().unwrap();
        assert_eq!(nested.file_name(), Some("a.fasta.gz"));
    }
}
