use ena_fetch::domain::{Accession, Digest, Location, TaxonId};

#[test]
fn accessions_cover_archive_prefixes() {
    for value in ["SRR014966", "ERR000001", "DRR000001", "PRJEB1787", "SAMEA104", "ERP000001"] {
        let acc: Accession = value.parse().unwrap();
        assert_eq!(acc.as_str(), value);
    }
    assert!("SRR".parse::<Accession>().is_err());
    assert!("".parse::<Accession>().is_err());
}

#[test]
fn taxon_ids_are_numeric() {
    assert!("9606".parse::<TaxonId>().is_ok());
    assert!("-1".parse::<TaxonId>().is_err());
}

#[test]
fn digests_compare_case_insensitively() {
    let digest: Digest = "9e107d9d372bb6826bd81d3542a419d6".parse().unwrap();
    assert!(digest.matches("9E107D9D372BB6826BD81D3542A419D6"));
    assert!(!digest.matches("d41d8cd98f00b204e9800998ecf8427e"));
}

#[test]
fn archive_locations_map_to_https() {
    let location: Location = "ftp.sra.ebi.ac.uk/vol1/fastq/ERR000/ERR000001/ERR000001_1.fastq.gz"
        .parse()
        .unwrap();
    let url = location.to_url().unwrap();
    assert_eq!(url.scheme(), "https");
    assert_eq!(url.host_str(), Some("ftp.sra.ebi.ac.uk"));
    assert_eq!(location.file_name(), Some("ERR000001_1.fastq.gz"));
    assert!("with space/a.gz".parse::<Location>().is_err());
}
