use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::domain::DatasetId;
use crate::error::CellError;

pub const CLUSTER_COLUMN: &str = "clusterName";
pub const MARKERS_COLUMN: &str = "NSForest_markers";
pub const RESULTS_SUFFIX: &str = "_results";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRow {
    pub cluster_name: String,
    pub markers_literal: String,
}

impl MarkerRow {
    pub fn new(cluster_name: &str, markers_literal: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            markers_literal: markers_literal.to_string(),
        }
    }

    pub fn markers(&self) -> Result<Vec<String>, CellError> {
        parse_marker_list(&self.markers_literal)
    }
}

#[derive(Debug, Clone)]
pub struct MarkerTable {
    pub source: String,
    pub rows: Vec<MarkerRow>,
}

impl MarkerTable {
    pub fn new(source: &str, rows: Vec<MarkerRow>) -> Self {
        Self {
            source: source.to_string(),
            rows,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, CellError> {
        let file = File::open(path)
            .map_err(|err| CellError::Filesystem(format!("open {}: {err}", path.display())))?;
        Self::from_reader(&path.display().to_string(), file)
    }

    pub fn from_reader<R: Read>(source: &str, reader: R) -> Result<Self, CellError> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| CellError::MalformedRow(format!("{source}: {err}")))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim() == name)
                .ok_or_else(|| CellError::MissingColumn {
                    table: source.to_string(),
                    column: name.to_string(),
                })
        };
        let cluster_idx = column(CLUSTER_COLUMN)?;
        let markers_idx = column(MARKERS_COLUMN)?;

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record =
                record.map_err(|err| CellError::MalformedRow(format!("{source}: {err}")))?;
            let field = |idx: usize, name: &str| {
                record.get(idx).ok_or_else(|| {
                    CellError::MalformedRow(format!(
                        "{source}: record {} has no `{name}` value",
                        line + 1
                    ))
                })
            };
            rows.push(MarkerRow {
                cluster_name: field(cluster_idx, CLUSTER_COLUMN)?.to_string(),
                markers_literal: field(markers_idx, MARKERS_COLUMN)?.to_string(),
            });
        }
        debug!(source, rows = rows.len(), "loaded marker table");
        Ok(Self {
            source: source.to_string(),
            rows,
        })
    }
}

/// Derives the dataset id from a result file name: `<dataset_id>.csv` or
/// `<dataset_id>_results.csv`.
pub fn dataset_id_for_table(path: &Path) -> Result<DatasetId, CellError> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| CellError::InvalidDatasetId(path.display().to_string()))?;
    stem.strip_suffix(RESULTS_SUFFIX).unwrap_or(stem).parse()
}

pub fn parse_marker_list(literal: &str) -> Result<Vec<String>, CellError> {
    let malformed = |message: &str| CellError::MalformedMarkers {
        literal: literal.to_string(),
        message: message.to_string(),
    };

    let inner = literal
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| malformed("expected a bracketed list"))?;

    let mut markers = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
        let Some(quote) = chars.next() else {
            break;
        };
        if quote != '\'' && quote != '"' {
            return Err(malformed("expected a quoted gene symbol"));
        }

        let mut value = String::new();
        let mut closed = false;
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(escaped @ ('\\' | '\'' | '"')) => value.push(escaped),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(malformed("dangling escape")),
                },
                ch if ch == quote => {
                    closed = true;
                    break;
                }
                ch => value.push(ch),
            }
        }
        if !closed {
            return Err(malformed("unterminated string"));
        }
        markers.push(value);

        while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
        match chars.next() {
            Some(',') | None => {}
            Some(_) => return Err(malformed("expected `,` between gene symbols")),
        }
    }
    Ok(markers)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_python_list_literal() {
        assert_eq!(
            parse_marker_list("['SFTPC','NAPSA']").unwrap(),
            vec!["SFTPC", "NAPSA"]
        );
        assert_eq!(
            parse_marker_list(r#" ["HLA-DRA", 'CD74', ] "#).unwrap(),
            vec!["HLA-DRA", "CD74"]
        );
    }

    #[test]
    fn empty_list_has_no_markers() {
        assert!(parse_marker_list("[]").unwrap().is_empty());
        assert!(parse_marker_list("[  ]").unwrap().is_empty());
    }

    #[test]
    fn escapes_are_decoded() {
        assert_eq!(
            parse_marker_list(r"['5\'-NT']").unwrap(),
            vec!["5'-NT"]
        );
    }

    #[test]
    fn rejects_malformed_literals() {
        for literal in ["SFTPC", "['SFTPC'", "['SFTPC' 'NAPSA']", "[SFTPC]", "['SFTPC]"] {
            let err = parse_marker_list(literal).unwrap_err();
            assert_matches!(err, CellError::MalformedMarkers { .. });
        }
    }

    #[test]
    fn dataset_id_from_file_name() {
        let id = dataset_id_for_table(Path::new("results/dsA_results.csv")).unwrap();
        assert_eq!(id.as_str(), "dsA");
        let id = dataset_id_for_table(Path::new("results/3de0ad6d-4378.csv")).unwrap();
        assert_eq!(id.as_str(), "3de0ad6d-4378");
    }
}
