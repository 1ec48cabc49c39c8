//! Symbol catalog: loads the identifier universe for a run.
//!
//! Accepts a plain list (one token per line, `#` comments), an exchange equity CSV
//! with a `SYMBOL` column, or an inline list. Tokens are validated before anything
//! else sees them; rejected tokens are reported, never fetched.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{CatalogError, Symbol, ValidationError};

#[derive(Debug, Clone)]
pub enum CatalogSource {
    File(PathBuf),
    Inline(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedToken {
    pub token: String,
    pub reason: String,
}

/// Validated, sorted and de-duplicated identifiers for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Universe {
    pub symbols: Vec<Symbol>,
    pub rejected: Vec<RejectedToken>,
}

impl Universe {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Load and validate the universe. `suffix` is appended to bare tokens.
pub fn load_universe(source: &CatalogSource, suffix: Option<&str>) -> Result<Universe, CatalogError> {
    let tokens = match source {
        CatalogSource::File(path) => read_tokens(path)?,
        CatalogSource::Inline(tokens) => tokens.clone(),
    };

    let mut accepted = BTreeSet::new();
    let mut rejected = Vec::new();
    for token in tokens {
        match Symbol::parse_with_suffix(&token, suffix) {
            Ok(symbol) => {
                accepted.insert(symbol);
            }
            Err(ValidationError::EmptySymbol) => {}
            Err(error) => {
                tracing::warn!(token = %token, error = %error, "rejected catalog token");
                rejected.push(RejectedToken {
                    token,
                    reason: error.to_string(),
                });
            }
        }
    }

    if accepted.is_empty() {
        return Err(CatalogError::Empty {
            rejected: rejected.len(),
        });
    }

    let universe = Universe {
        symbols: accepted.into_iter().collect(),
        rejected,
    };
    tracing::info!(
        accepted = universe.symbols.len(),
        rejected = universe.rejected.len(),
        "catalog loaded"
    );
    Ok(universe)
}

fn read_tokens(path: &Path) -> Result<Vec<String>, CatalogError> {
    let contents = fs::read_to_string(path).map_err(|source| CatalogError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_tokens(&contents).map_err(|source| CatalogError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Split catalog text into raw tokens, detecting the CSV layout by a `SYMBOL` header.
fn parse_tokens(contents: &str) -> Result<Vec<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(contents.as_bytes());

    let mut records = reader.records();
    let Some(header) = records.next().transpose()? else {
        return Ok(Vec::new());
    };
    let Some(column) = header
        .iter()
        .position(|cell| cell.eq_ignore_ascii_case("SYMBOL"))
    else {
        return Ok(plain_lines(contents));
    };

    let mut tokens = Vec::new();
    for record in records {
        if let Some(cell) = record?.get(column) {
            tokens.push(cell.to_owned());
        }
    }
    Ok(tokens)
}

/// One token per line for catalogs without a header.
fn plain_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn plain_list_skips_comments_and_blank_lines() {
        let tokens = parse_tokens("# nifty\nTCS\n\nINFY\n").expect("tokens");
        assert_eq!(tokens, vec!["TCS", "INFY"]);
    }

    #[test]
    fn csv_layout_reads_the_symbol_column() {
        let csv = "SYMBOL,NAME OF COMPANY, SERIES\n\"RELIANCE\",Reliance Industries,EQ\nM&M,Mahindra,EQ\n";
        assert_eq!(parse_tokens(csv).expect("tokens"), vec!["RELIANCE", "M&M"]);
    }

    #[test]
    fn quoted_company_names_keep_their_commas() {
        let csv = "NAME OF COMPANY,SYMBOL,SERIES\n\"Reliance, Industries Ltd\",RELIANCE,EQ\n\"Larsen & Toubro, Ltd\",LT,EQ\n";
        assert_eq!(parse_tokens(csv).expect("tokens"), vec!["RELIANCE", "LT"]);
    }

    #[test]
    fn short_rows_are_skipped() {
        let csv = "NAME OF COMPANY,SYMBOL\nOrphan Row\nInfosys Limited,INFY\n";
        assert_eq!(parse_tokens(csv).expect("tokens"), vec!["INFY"]);
    }

    #[test]
    fn universe_is_sorted_deduplicated_and_suffixed() {
        let source = CatalogSource::Inline(vec![
            String::from("tcs"),
            String::from("INFY"),
            String::from("TCS.NS"),
            String::from("<bad>"),
        ]);

        let universe = load_universe(&source, Some(".NS")).expect("universe");

        let symbols: Vec<&str> = universe.symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(symbols, vec!["INFY.NS", "TCS.NS"]);
        assert_eq!(universe.rejected.len(), 1);
        assert_eq!(universe.rejected[0].token, "<bad>");
    }

    #[test]
    fn all_rejected_is_an_empty_catalog() {
        let source = CatalogSource::Inline(vec![String::from(">"), String::from("A'B")]);
        let error = load_universe(&source, None).expect_err("empty");
        assert!(matches!(error, CatalogError::Empty { rejected: 2 }));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let temp = tempdir().expect("tempdir");
        let source = CatalogSource::File(temp.path().join("missing.txt"));
        let error = load_universe(&source, None).expect_err("unreadable");
        assert!(matches!(error, CatalogError::Unreadable { .. }));
    }

    #[test]
    fn reads_catalog_files() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("symbols.txt");
        fs::write(&path, "HDFCBANK\nSBIN.BO\n").expect("write catalog");

        let universe = load_universe(&CatalogSource::File(path), Some(".NS")).expect("universe");

        assert_eq!(universe.len(), 2);
        assert_eq!(universe.symbols[0].as_str(), "HDFCBANK.NS");
    }
}
