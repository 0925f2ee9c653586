use crate::backend::{Control, Topology};
use crate::error::{CommandError, QueryError};
use crate::sink::{Sink, StreamRoute};
use async_trait::async_trait;
use log::debug;
use std::process::Output;

/// Audio server backend that shells out to `pacmd` and parses its
/// line-oriented output. Queries capture stdout in one invocation so that
/// every scan of the text observes the same enumeration.
pub struct PacmdClient {
    binary: String,
}

impl PacmdClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn invoke(&self, args: &[&str]) -> std::io::Result<Output> {
        debug!("running {} {}", self.binary, args.join(" "));
        tokio::process::Command::new(&self.binary)
            .args(args)
            .output()
            .await
    }

    async fn query(&self, args: &[&str]) -> Result<String, QueryError> {
        let output = self
            .invoke(args)
            .await
            .map_err(|e| QueryError::CommandUnavailable(format!("{}: {}", self.binary, e)))?;

        if !output.status.success() {
            let reason = first_line(&output.stderr)
                .or_else(|| first_line(&output.stdout))
                .unwrap_or_else(|| format!("exit status {}", output.status));
            return Err(QueryError::CommandUnavailable(reason));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn command(&self, args: &[&str]) -> Result<(), CommandError> {
        let output = self
            .invoke(args)
            .await
            .map_err(|e| CommandError::Other(format!("{}: {}", self.binary, e)))?;

        match failure_message(&output) {
            Some(reason) => Err(CommandError::ServerRejected(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Topology for PacmdClient {
    async fn sinks(&self) -> Result<Vec<Sink>, QueryError> {
        let listing = self.query(&["list-sinks"]).await?;
        parse_sinks(&listing)
    }

    async fn stream_routes(&self) -> Result<Vec<StreamRoute>, QueryError> {
        let listing = self.query(&["list-sink-inputs"]).await?;
        parse_stream_routes(&listing)
    }
}

#[async_trait]
impl Control for PacmdClient {
    async fn set_default_sink(&self, sink: u32) -> Result<(), CommandError> {
        let sink = sink.to_string();
        self.command(&["set-default-sink", sink.as_str()]).await
    }

    async fn move_stream(&self, stream: u32, sink: u32) -> Result<(), CommandError> {
        let stream_arg = stream.to_string();
        let sink_arg = sink.to_string();
        let moved = self
            .command(&["move-sink-input", stream_arg.as_str(), sink_arg.as_str()])
            .await;

        match moved {
            Ok(()) => Ok(()),
            // A refused move usually means the stream already ended;
            // re-list to confirm before blaming the server.
            Err(err) => match self.stream_routes().await {
                Ok(routes) if routes.iter().all(|r| r.id != stream) => {
                    Err(CommandError::StreamGone)
                }
                _ => Err(err),
            },
        }
    }
}

fn parse_sinks(listing: &str) -> Result<Vec<Sink>, QueryError> {
    let indices = marker_numbers(listing, "index:")?;
    let descriptions = marker_quoted(listing, "device.description")?;

    if indices.len() != descriptions.len() {
        return Err(QueryError::InconsistentTopology {
            records: indices.len(),
            values: descriptions.len(),
        });
    }

    let mut sinks: Vec<Sink> = indices
        .into_iter()
        .zip(descriptions)
        .map(|(id, name)| Sink {
            id,
            name,
            ordinal: id,
        })
        .collect();
    sinks.sort_by_key(|s| s.ordinal);
    Ok(sinks)
}

fn parse_stream_routes(listing: &str) -> Result<Vec<StreamRoute>, QueryError> {
    let streams = marker_numbers(listing, "index:")?;
    let sinks = marker_numbers(listing, "sink:")?;

    if streams.len() != sinks.len() {
        return Err(QueryError::InconsistentTopology {
            records: streams.len(),
            values: sinks.len(),
        });
    }

    Ok(streams
        .into_iter()
        .zip(sinks)
        .map(|(id, sink)| StreamRoute { id, sink })
        .collect())
}

/// Strips indentation and the `*` default-sink flag; yields the rest of the
/// line when it starts with `marker`.
fn marked<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let stripped = line.trim_start();
    let stripped = stripped
        .strip_prefix('*')
        .map(str::trim_start)
        .unwrap_or(stripped);
    if stripped.starts_with(marker) {
        Some(stripped)
    } else {
        None
    }
}

/// Numeric values of every `marker` line. The value is the first token
/// after the marker; trailing annotations (`<sink name>` and the like) are
/// ignored. A marker line without a parseable number fails the whole scan.
fn marker_numbers(listing: &str, marker: &str) -> Result<Vec<u32>, QueryError> {
    let mut values = Vec::new();
    for line in listing.lines() {
        let rest = match marked(line, marker) {
            Some(rest) => rest,
            None => continue,
        };
        match rest[marker.len()..]
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<u32>().ok())
        {
            Some(value) => values.push(value),
            None => return Err(QueryError::ParseFailure(line.trim_end().to_string())),
        }
    }
    Ok(values)
}

/// Quoted values of every `marker = "..."` property line.
fn marker_quoted(listing: &str, marker: &str) -> Result<Vec<String>, QueryError> {
    let mut values = Vec::new();
    for line in listing.lines() {
        let rest = match marked(line, marker) {
            Some(rest) => rest,
            None => continue,
        };
        let value = rest[marker.len()..]
            .trim_start()
            .strip_prefix('=')
            .map(str::trim)
            .and_then(|v| v.strip_prefix('"'))
            .and_then(|v| v.strip_suffix('"'));
        match value {
            Some(value) => values.push(value.to_string()),
            None => return Err(QueryError::ParseFailure(line.trim_end().to_string())),
        }
    }
    Ok(values)
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// pacmd likes to exit zero even when it refuses a command, reporting the
/// problem as prose instead. A non-zero status or a known refusal phrase
/// both count as failure.
fn failure_message(output: &Output) -> Option<String> {
    if !output.status.success() {
        return Some(
            first_line(&output.stderr)
                .or_else(|| first_line(&output.stdout))
                .unwrap_or_else(|| format!("exit status {}", output.status)),
        );
    }

    refusal_line(&String::from_utf8_lossy(&output.stderr))
        .or_else(|| refusal_line(&String::from_utf8_lossy(&output.stdout)))
}

fn refusal_line(text: &str) -> Option<String> {
    const PHRASES: &[&str] = &["fail", "does not exist", "no such", "not found", "daemon"];

    text.lines()
        .find(|line| {
            let lower = line.to_lowercase();
            PHRASES.iter().any(|phrase| lower.contains(phrase))
        })
        .map(|line| line.trim().to_string())
}
