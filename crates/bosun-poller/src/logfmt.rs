//! The multi-record log wire format and its parser.
//!
//! All data for a whole branch range is retrieved in one `git log` call by
//! handing git a custom `--format` string built around three disjoint
//! sentinel lines: one marking the start of each commit record, one closing
//! each multi-line field, and one separating the fixed fields from the
//! touched-file list that `--name-only` appends. The sentinels are arbitrary
//! tokens chosen only to be vanishingly unlikely to collide with commit
//! text.

use crate::error::{PollerError, PollerResult};

/// Marks the start of each commit record.
pub const COMMIT_BOUNDARY: &str = "----- qfRW9kJmXvC -----";

/// Closes each multi-line field.
pub const FIELD_BOUNDARY: &str = "----- t3VpUzhNd2s -----";

/// Separates the fixed fields from the touched-file list.
pub const FILES_BOUNDARY: &str = "----- Lk0aGweYxq8 -----";

/// The `--format` string matching [`parse_log`].
pub fn log_format() -> String {
    format!(
        "{COMMIT_BOUNDARY}%n\
         hash: %H%n\
         author: %aE%n\
         timestamp: %ct%n\
         subject:+%n%s%n{FIELD_BOUNDARY}%n\
         body:+%n%b%n{FIELD_BOUNDARY}%n\
         {FILES_BOUNDARY}"
    )
}

/// One commit as decoded from the log output, newest-first order preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommit {
    pub hash: String,
    pub author: String,
    pub timestamp: i64,
    pub subject: String,
    pub body: String,
    pub files: Vec<String>,
}

impl RawCommit {
    /// Subject plus body, the change comment downstream consumers see.
    pub fn comments(&self) -> String {
        if self.body.is_empty() {
            self.subject.clone()
        } else {
            format!("{}\n\n{}", self.subject, self.body)
        }
    }
}

#[derive(Debug, Default)]
struct CommitBuilder {
    hash: Option<String>,
    author: Option<String>,
    timestamp: Option<i64>,
    subject: Option<String>,
    body: Option<String>,
    files: Vec<String>,
}

impl CommitBuilder {
    fn set(&mut self, field: &str, value: String) -> PollerResult<()> {
        match field {
            "hash" => self.hash = Some(value),
            "author" => self.author = Some(value),
            "timestamp" => {
                let ts = value.trim().parse::<i64>().map_err(|_| {
                    PollerError::Protocol(format!("bad timestamp value: {value:?}"))
                })?;
                self.timestamp = Some(ts);
            }
            "subject" => self.subject = Some(value),
            "body" => self.body = Some(value),
            other => {
                return Err(PollerError::Protocol(format!("unknown field: {other}")));
            }
        }
        Ok(())
    }

    fn finish(self) -> PollerResult<RawCommit> {
        let missing = |name: &str| PollerError::Protocol(format!("commit record missing {name}"));
        Ok(RawCommit {
            hash: self.hash.ok_or_else(|| missing("hash"))?,
            author: self.author.ok_or_else(|| missing("author"))?,
            timestamp: self.timestamp.ok_or_else(|| missing("timestamp"))?,
            subject: self
                .subject
                .map(|s| s.trim_end_matches('\n').to_string())
                .unwrap_or_default(),
            body: self
                .body
                .map(|s| s.trim_end_matches('\n').to_string())
                .unwrap_or_default(),
            files: self.files,
        })
    }
}

/// Parser state. One external `git log` call produces a stream of commit
/// records; the parser walks it line by line.
enum State {
    /// Before the first commit boundary (or conceptually between records).
    BetweenCommits,
    /// Inside a record, reading `name: value` lines.
    SimpleFields,
    /// Accumulating a multi-line field until the field boundary.
    MultilineField(String),
    /// Reading the touched-file list until the next commit boundary.
    FileList,
}

/// Decode log output produced with [`log_format`] into commit records.
///
/// Commits come back newest-first, exactly as git emits them. Fails with a
/// protocol error on a field line outside a commit record or a field name
/// the format never requests.
pub fn parse_log(output: &str) -> PollerResult<Vec<RawCommit>> {
    let mut commits = Vec::new();
    let mut current: Option<CommitBuilder> = None;
    let mut state = State::BetweenCommits;

    for line in output.lines() {
        if line == COMMIT_BOUNDARY {
            if let Some(done) = current.take() {
                commits.push(done.finish()?);
            }
            current = Some(CommitBuilder::default());
            state = State::SimpleFields;
            continue;
        }

        let builder = match current.as_mut() {
            Some(b) => b,
            None => {
                if line.is_empty() {
                    continue;
                }
                return Err(PollerError::Protocol(format!(
                    "line outside of commit record: {:?}",
                    line.chars().take(60).collect::<String>()
                )));
            }
        };

        match &mut state {
            State::BetweenCommits => {
                return Err(PollerError::Protocol(format!(
                    "line outside of commit record: {:?}",
                    line.chars().take(60).collect::<String>()
                )));
            }
            State::MultilineField(field) => {
                if line == FIELD_BOUNDARY {
                    state = State::SimpleFields;
                } else {
                    let (name, text) = (field.clone(), format!("{line}\n"));
                    append_multiline(builder, &name, &text)?;
                }
            }
            State::FileList => {
                if !line.is_empty() {
                    builder.files.push(line.trim().to_string());
                }
            }
            State::SimpleFields => {
                if line == FILES_BOUNDARY {
                    state = State::FileList;
                    continue;
                }
                if line.is_empty() {
                    continue;
                }
                let (field, rest) = line.split_once(':').ok_or_else(|| {
                    PollerError::Protocol(format!("malformed field line: {line:?}"))
                })?;
                if rest == "+" {
                    // Multi-line field opens; content follows on later lines.
                    builder.set(field, String::new())?;
                    state = State::MultilineField(field.to_string());
                } else if let Some(value) = rest.strip_prefix(' ') {
                    builder.set(field, value.to_string())?;
                } else {
                    return Err(PollerError::Protocol(format!(
                        "malformed field value: {line:?}"
                    )));
                }
            }
        }
    }

    if let Some(done) = current.take() {
        commits.push(done.finish()?);
    }
    Ok(commits)
}

fn append_multiline(builder: &mut CommitBuilder, field: &str, text: &str) -> PollerResult<()> {
    let slot = match field {
        "subject" => &mut builder.subject,
        "body" => &mut builder.body,
        other => {
            return Err(PollerError::Protocol(format!(
                "unknown multi-line field: {other}"
            )));
        }
    };
    match slot {
        Some(existing) => existing.push_str(text),
        None => *slot = Some(text.to_string()),
    }
    Ok(())
}
