//! The flat file-block protocol spoken in both directions of a generation call.
//!
//! A payload is a sequence of blocks:
//!
//! ```text
//! ~~src/server.ts
//! <file content>
//! ~~src/obsolete.ts
//! ```
//!
//! Only a line that *starts* with the delimiter opens a block, so content may
//! contain `~~` anywhere else. A block whose content trims to nothing deletes
//! its path.

use std::path::{Component, Path};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::models::FileOperation;

pub const DELIMITER: &str = "~~";

/// Read `relative_paths` under `root` and concatenate them into one payload.
/// Any unreadable file aborts the encode.
pub async fn encode(
    root: &Path,
    relative_paths: &[String],
    concurrency: usize,
) -> Result<String, PipelineError> {
    let blocks: Vec<(String, String)> = stream::iter(relative_paths.iter().cloned())
        .map(|relative_path| async move {
            let full_path = root.join(&relative_path);
            match tokio::fs::read_to_string(&full_path).await {
                Ok(content) => Ok((relative_path, content)),
                Err(e) => {
                    warn!(path = %relative_path, error = %e, "Error reading file for prompt");
                    Err(PipelineError::file(full_path, e))
                }
            }
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    Ok(encode_blocks(
        blocks.iter().map(|(path, content)| (path.as_str(), content.as_str())),
    ))
}

/// Join in-memory `(path, content)` pairs into a payload.
pub fn encode_blocks<'a>(blocks: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut payload = String::new();
    for (path, content) in blocks {
        if !payload.is_empty() && !payload.ends_with('\n') {
            payload.push('\n');
        }
        payload.push_str(DELIMITER);
        payload.push_str(path);
        payload.push('\n');
        payload.push_str(content);
    }
    payload
}

#[derive(Debug)]
enum DecodeState {
    SeekingDelimiter,
    ReadingPath(String),
    ReadingContent { path: String, lines: Vec<String> },
}

/// Line-oriented decoder. Feed lines in order, then call [`Decoder::finish`].
#[derive(Debug)]
pub struct Decoder {
    state: DecodeState,
    operations: Vec<FileOperation>,
    line_number: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            state: DecodeState::SeekingDelimiter,
            operations: Vec::new(),
            line_number: 0,
        }
    }
}

impl Decoder {
    pub fn feed_line(&mut self, line: &str) -> Result<(), PipelineError> {
        self.line_number += 1;
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(rest) = line.strip_prefix(DELIMITER) {
            self.close_block()?;
            self.state = DecodeState::ReadingPath(rest.to_string());
            return self.read_path();
        }

        if let DecodeState::ReadingContent { lines, .. } = &mut self.state {
            lines.push(line.to_string());
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<FileOperation>, PipelineError> {
        self.close_block()?;
        Ok(self.operations)
    }

    fn read_path(&mut self) -> Result<(), PipelineError> {
        let DecodeState::ReadingPath(raw) = &self.state else {
            return Ok(());
        };
        let path = raw.trim();
        if path.is_empty() {
            warn!(line = self.line_number, "Skipping block with empty path");
            self.state = DecodeState::SeekingDelimiter;
            return Ok(());
        }
        let path = normalize_relative(path)?;
        self.state = DecodeState::ReadingContent {
            path,
            lines: Vec::new(),
        };
        Ok(())
    }

    fn close_block(&mut self) -> Result<(), PipelineError> {
        match std::mem::replace(&mut self.state, DecodeState::SeekingDelimiter) {
            DecodeState::ReadingContent { path, lines } => {
                let content = lines.join("\n");
                let content = content.trim();
                let operation = if content.is_empty() {
                    FileOperation::delete(path)
                } else {
                    FileOperation::write(path, content)
                };
                self.operations.push(operation);
            }
            // ReadingPath never outlives the delimiter line that opened it.
            DecodeState::ReadingPath(_) | DecodeState::SeekingDelimiter => {}
        }
        Ok(())
    }
}

/// Parse a payload into ordered file operations. An escaping path rejects the
/// whole payload.
pub fn decode(payload: &str) -> Result<Vec<FileOperation>, PipelineError> {
    let mut decoder = Decoder::default();
    for line in payload.split('\n') {
        decoder.feed_line(line)?;
    }
    let operations = decoder.finish()?;
    debug!(operations = operations.len(), "Decoded payload");
    Ok(operations)
}

/// Lexically normalize a relative path to `/`-separated form, rejecting
/// absolute paths and `..` that climb above the root.
pub fn normalize_relative(path: &str) -> Result<String, PipelineError> {
    let escape = || PipelineError::PathEscape {
        path: path.to_string(),
    };
    let unified = path.replace('\\', "/");
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    if parts.is_empty() {
        return Err(escape());
    }
    Ok(parts.join("/"))
}
