use std::path::{Path, PathBuf};

use futures_util::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::RunError;

/// One record of the result artifact, fields in file order.
pub type ResultRow = Vec<String>;

/// Forward-only reader over a comma separated result artifact.
///
/// Rows come back in file order, the header row included. Every row must have
/// the same number of fields as the first one. The reader is consumed by
/// iteration; reading again means opening the file again.
pub struct ResultReader {
    reader: BufReader<tokio::fs::File>,
    line: String,
    line_no: usize,
    width: Option<usize>,
    path: PathBuf,
}

impl std::fmt::Debug for ResultReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultReader")
            .field("path", &self.path)
            .field("line_no", &self.line_no)
            .finish_non_exhaustive()
    }
}

impl ResultReader {
    /// # Errors
    ///
    /// Returns [`RunError::ResultNotFound`] when the artifact does not exist.
    pub async fn open(path: &Path) -> Result<Self, RunError> {
        let file = tokio::fs::File::open(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                RunError::ResultNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                RunError::Io {
                    context: "open result artifact",
                    source,
                }
            }
        })?;
        Ok(Self {
            reader: BufReader::new(file),
            line: String::new(),
            line_no: 0,
            width: None,
            path: path.to_path_buf(),
        })
    }

    async fn read_line(&mut self) -> Result<bool, RunError> {
        self.line.clear();
        let bytes = self
            .reader
            .read_line(&mut self.line)
            .await
            .map_err(|source| RunError::Io {
                context: "read result artifact",
                source,
            })?;
        if bytes > 0 {
            self.line_no = self.line_no.saturating_add(1);
        }
        Ok(bytes > 0)
    }

    /// Next row, or `None` at end of file. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Parse`] on an unterminated quote, stray characters
    /// after a closing quote, or a row whose width differs from the first row.
    pub async fn next_row(&mut self) -> Result<Option<ResultRow>, RunError> {
        loop {
            if !self.read_line().await? {
                return Ok(None);
            }
            if !self.line.trim().is_empty() {
                break;
            }
        }

        let start_line = self.line_no;
        let mut record = std::mem::take(&mut self.line);
        let row = loop {
            match parse_record(&record).map_err(|message| RunError::Parse {
                line: start_line,
                message,
            })? {
                Some(row) => break row,
                // Quoted field spans lines.
                None => {
                    if !self.read_line().await? {
                        return Err(RunError::Parse {
                            line: start_line,
                            message: "unterminated quoted field".to_owned(),
                        });
                    }
                    record.push_str(&self.line);
                }
            }
        };

        match self.width {
            None => self.width = Some(row.len()),
            Some(width) if width != row.len() => {
                return Err(RunError::Parse {
                    line: start_line,
                    message: format!("expected {} fields, found {}", width, row.len()),
                });
            }
            Some(_) => {}
        }
        Ok(Some(row))
    }

    /// Materializes the remaining rows.
    ///
    /// # Errors
    ///
    /// Returns the first parse or I/O error encountered.
    pub async fn collect_rows(mut self) -> Result<Vec<ResultRow>, RunError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Turns the reader into a stream that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<ResultRow, RunError>> {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.next_row().await {
                Ok(Some(row)) => Some((Ok(row), Some(reader))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

/// Splits one logical CSV record. Returns `Ok(None)` when a quoted field is
/// still open at the end of `text`.
fn parse_record(text: &str) -> Result<Option<ResultRow>, String> {
    let text = text.strip_suffix('\n').unwrap_or(text);
    let text = text.strip_suffix('\r').unwrap_or(text);
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = text.chars().peekable();
    let mut in_quotes = false;
    let mut after_quote = false;

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => {
                    in_quotes = false;
                    after_quote = true;
                }
                other => field.push(other),
            }
            continue;
        }
        match ch {
            ',' => {
                fields.push(std::mem::take(&mut field));
                after_quote = false;
            }
            '"' if field.is_empty() && !after_quote => in_quotes = true,
            other if after_quote => {
                return Err(format!("unexpected '{}' after closing quote", other));
            }
            other => field.push(other),
        }
    }

    if in_quotes {
        return Ok(None);
    }
    fields.push(field);
    Ok(Some(fields))
}
