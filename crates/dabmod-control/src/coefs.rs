//! Memoryless-polynomial coefficient store.
//!
//! The engine reloads its predistorter from a plain text file on request,
//! so this file format is the contract between calibration and engine:
//!
//! ```text
//! <n>            coefficient count
//! <am_0>         n AM coefficients, one per line, in term order
//! ...
//! <am_{n-1}>
//! <pm_0>         n PM coefficients, one per line, in term order
//! ...
//! <pm_{n-1}>
//! ```
//!
//! Reads and writes are plain synchronous file I/O without locking. Callers
//! running several calibration loops against one path must serialise access
//! themselves.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::{Error, FormatIssue, Result};

/// Paired AM/PM coefficients. Both sequences always have the same length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoefficientSet {
    am: Vec<f64>,
    pm: Vec<f64>,
}

impl CoefficientSet {
    pub fn new(am: Vec<f64>, pm: Vec<f64>) -> Result<Self> {
        if am.len() != pm.len() {
            return Err(Error::Invariant(format!(
                "{} AM coefficients but {} PM coefficients",
                am.len(),
                pm.len()
            )));
        }
        Ok(CoefficientSet { am, pm })
    }

    /// Coefficient count `n` (number of AM/PM pairs).
    pub fn len(&self) -> usize {
        self.am.len()
    }

    pub fn is_empty(&self) -> bool {
        self.am.is_empty()
    }

    pub fn am(&self) -> &[f64] {
        &self.am
    }

    pub fn pm(&self) -> &[f64] {
        &self.pm
    }

    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.am, self.pm)
    }

    /// Render the file contents.
    ///
    /// Values use the shortest representation that parses back to the same
    /// `f64`. NaN and infinities are refused since the engine cannot read them.
    pub fn to_file_string(&self) -> Result<String> {
        if let Some(bad) = self.am.iter().chain(&self.pm).find(|c| !c.is_finite()) {
            return Err(Error::Invariant(format!(
                "coefficient {bad} is not a finite number"
            )));
        }
        let mut out = String::with_capacity(16 * (2 * self.len() + 1));
        let _ = writeln!(out, "{}", self.len());
        for coef in self.am.iter().chain(&self.pm) {
            let _ = writeln!(out, "{coef}");
        }
        Ok(out)
    }

    /// Parse file contents; `path` is only used for error reporting.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let format_error = |issue| Error::Format {
            path: path.to_path_buf(),
            issue,
        };

        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let (_, count_line) = lines
            .next()
            .ok_or_else(|| format_error(FormatIssue::MissingCount))?;
        let n: usize = count_line
            .parse()
            .map_err(|_| format_error(FormatIssue::BadCount(count_line.to_string())))?;

        // `n` is untrusted; let the values that are really there size the vectors.
        let mut am = Vec::new();
        let mut pm = Vec::new();
        for (line, raw) in lines {
            let value: f64 = raw.parse().map_err(|_| {
                format_error(FormatIssue::BadValue {
                    line,
                    text: raw.to_string(),
                })
            })?;
            if am.len() < n {
                am.push(value);
            } else if pm.len() < n {
                pm.push(value);
            } else {
                let mut coefs = am;
                coefs.extend(pm);
                coefs.push(value);
                return Err(format_error(FormatIssue::TooMany { expected: n, coefs }));
            }
        }

        if pm.len() < n {
            return Err(format_error(FormatIssue::TooFew {
                expected: n,
                found: am.len() + pm.len(),
            }));
        }
        Ok(CoefficientSet { am, pm })
    }
}

/// Load `([AM], [PM])` from `path`.
pub fn read_coef_file(path: &Path) -> Result<CoefficientSet> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let set = CoefficientSet::parse(&text, path)?;
    tracing::debug!(path = %path.display(), n = set.len(), "read coefficients");
    Ok(set)
}

/// Overwrite `path` with `set`. No atomic rename, no backup.
pub fn write_coef_file(set: &CoefficientSet, path: &Path) -> Result<()> {
    let text = set.to_file_string()?;
    std::fs::write(path, text).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), n = set.len(), "wrote coefficients");
    Ok(())
}
