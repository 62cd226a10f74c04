//! A line-oriented operator console over a [`factstore_core::Store`] — the
//! collaboration glue this workspace ships instead of a wire protocol. Every
//! command is one line of whitespace-separated tokens; reads come from
//! whatever [`tokio::io::AsyncBufRead`] the caller hands in, so the console
//! loop itself is unit-testable without a real terminal.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_stream::StreamExt;
use tracing::{info, instrument, warn};

use factstore_backend_memory::MemoryEngine;
use factstore_backend_redb::RedbEngine;
use factstore_core::{
    Fact, FactId, IdempotencyKey, Metadata, Payload, StartPosition, Store, Subject, Tags,
    Timestamp,
};

/// Dispatches to whichever concrete `Store<E>` configuration resolved: one
/// variant per backend, since `Store` is generic rather than a trait object
/// (there is no shared `dyn` seam to box behind, unlike the teacher's
/// `Arc<dyn EventStoreTrait>`).
pub enum AnyStore {
    Memory(Store<MemoryEngine>),
    Redb(Store<RedbEngine>),
}

impl AnyStore {
    async fn append_fact(&self, fact: Fact) -> anyhow::Result<factstore_core::AppendResult> {
        let result = match self {
            AnyStore::Memory(store) => store.append_fact(fact).await,
            AnyStore::Redb(store) => store.append_fact(fact).await,
        };
        Ok(result?)
    }

    async fn find_by_id(&self, id: FactId) -> anyhow::Result<Option<Fact>> {
        let result = match self {
            AnyStore::Memory(store) => store.find_by_id(id).await,
            AnyStore::Redb(store) => store.find_by_id(id).await,
        };
        Ok(result?)
    }

    async fn find_by_subject(&self, subject: &Subject) -> anyhow::Result<Vec<Fact>> {
        let result = match self {
            AnyStore::Memory(store) => store.find_by_subject(subject).await,
            AnyStore::Redb(store) => store.find_by_subject(subject).await,
        };
        Ok(result?)
    }

    async fn reset(&self) -> anyhow::Result<()> {
        let result = match self {
            AnyStore::Memory(store) => store.reset().await,
            AnyStore::Redb(store) => store.reset().await,
        };
        Ok(result?)
    }

    /// Tails from `start`, printing up to `limit` facts (or forever, if
    /// `limit` is `None`) to `out`. The memory backend wakes on commit; the
    /// redb backend polls — both are conforming, per §6 Open Questions.
    async fn tail(
        &self,
        start: StartPosition,
        limit: Option<usize>,
        mut out: impl AsyncWrite + Unpin,
    ) -> anyhow::Result<()> {
        let mut emitted = 0usize;
        match self {
            AnyStore::Memory(store) => {
                let mut stream = store.streamer().stream_with_watch(start).await?;
                while let Some(fact) = stream.next().await {
                    write_fact_line(&mut out, &fact?).await?;
                    emitted += 1;
                    if limit.is_some_and(|limit| emitted >= limit) {
                        break;
                    }
                }
            }
            AnyStore::Redb(store) => {
                let mut stream = store.streamer().stream(start).await?;
                while let Some(fact) = stream.next().await {
                    write_fact_line(&mut out, &fact?).await?;
                    emitted += 1;
                    if limit.is_some_and(|limit| emitted >= limit) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

async fn write_fact_line(mut out: impl AsyncWrite + Unpin, fact: &Fact) -> anyhow::Result<()> {
    let tags = fact
        .tags
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let line = format!(
        "{} {} {}:{} {} [{}]\n",
        fact.id,
        fact.fact_type,
        fact.subject.subject_type,
        fact.subject.subject_id,
        String::from_utf8_lossy(&fact.payload.data),
        tags
    );
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

/// Resolves `BACKEND` (`memory`, the default, or `redb`), `FACTSTORE_PATH`
/// (required for `redb`), and `STORE_NAME` (default `"default"`) — the same
/// env-var-driven resolution style as the teacher's `resolve_backend()`.
#[instrument]
pub async fn resolve_backend() -> anyhow::Result<AnyStore> {
    let backend = std::env::var("BACKEND").unwrap_or_else(|_| "memory".to_string());
    let store_name = std::env::var("STORE_NAME").unwrap_or_else(|_| "default".to_string());
    match backend.as_str() {
        "memory" => {
            info!(%store_name, "opening in-process memory store");
            Ok(AnyStore::Memory(factstore_backend_memory::open(&store_name)))
        }
        "redb" => {
            let path = std::env::var("FACTSTORE_PATH")
                .map_err(|_| anyhow!("FACTSTORE_PATH must be set when BACKEND=redb"))?;
            info!(%store_name, %path, "opening redb store");
            let store = factstore_backend_redb::open(&PathBuf::from(path), &store_name)
                .context("failed to open redb store")?;
            Ok(AnyStore::Redb(store))
        }
        other => bail!("unsupported BACKEND '{}'. Supported: memory, redb", other),
    }
}

/// Parses one fact id, accepting either its `{:032x}` display form or a
/// plain decimal `u128`.
fn parse_fact_id(token: &str) -> anyhow::Result<FactId> {
    if let Ok(value) = u128::from_str_radix(token, 16) {
        if token.len() == 32 {
            return Ok(FactId(value));
        }
    }
    let value: u128 = token.parse().context("fact id must be hex or decimal")?;
    Ok(FactId(value))
}

fn parse_tags<'a>(tokens: impl Iterator<Item = &'a str>) -> anyhow::Result<Tags> {
    let mut tags = Tags::new();
    for token in tokens {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| anyhow!("tag '{token}' must be key=value"))?;
        tags.insert(key.to_string(), value.to_string());
    }
    Ok(tags)
}

/// Runs commands read from `input` until EOF or `quit`/`exit`, writing
/// results and errors to `out`. One command per line:
///
/// ```text
/// append <fact_type> <subject_type> <subject_id> <payload_text> [k=v ...]
/// get <fact_id>
/// subject <subject_type> <subject_id>
/// tail [from <fact_id>] [limit <n>]
/// reset
/// ```
pub async fn run_console(
    store: &AnyStore,
    input: impl tokio::io::AsyncRead + Unpin,
    mut out: impl AsyncWrite + Unpin,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["quit"] | ["exit"] => break,
            ["append", fact_type, subject_type, subject_id, payload, rest @ ..] => {
                let tags = match parse_tags(rest.iter().copied()) {
                    Ok(tags) => tags,
                    Err(e) => {
                        out.write_all(format!("error: {e}\n").as_bytes()).await?;
                        continue;
                    }
                };
                // No clock dependency for a timestamp the console never reads back
                // from anywhere but the operator's own eyes (§3: caller-supplied,
                // not wall-clock-derived).
                let fact = Fact::new(
                    FactId(IdempotencyKey::fresh().0),
                    *fact_type,
                    Payload::new(payload.as_bytes().to_vec()),
                    Subject::new(*subject_type, *subject_id),
                    Timestamp::new(0, 0),
                    Metadata::new(),
                    tags,
                );
                let appended = match fact {
                    Ok(fact) => store.append_fact(fact).await,
                    Err(e) => Err(e.into()),
                };
                match appended {
                    Ok(result) => out.write_all(format!("{result:?}\n").as_bytes()).await?,
                    Err(e) => out.write_all(format!("error: {e:#}\n").as_bytes()).await?,
                }
            }
            ["get", fact_id] => match parse_fact_id(fact_id) {
                Ok(id) => match store.find_by_id(id).await {
                    Ok(Some(fact)) => write_fact_line(&mut out, &fact).await?,
                    Ok(None) => out.write_all(b"not found\n").await?,
                    Err(e) => out.write_all(format!("error: {e:#}\n").as_bytes()).await?,
                },
                Err(e) => out.write_all(format!("error: {e}\n").as_bytes()).await?,
            },
            ["subject", subject_type, subject_id] => {
                let subject = Subject::new(*subject_type, *subject_id);
                match store.find_by_subject(&subject).await {
                    Ok(facts) => {
                        for fact in &facts {
                            write_fact_line(&mut out, fact).await?;
                        }
                        out.write_all(format!("{} fact(s)\n", facts.len()).as_bytes())
                            .await?;
                    }
                    Err(e) => out.write_all(format!("error: {e:#}\n").as_bytes()).await?,
                }
            }
            ["tail", rest @ ..] => {
                let (start, limit) = match parse_tail_args(rest) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        out.write_all(format!("error: {e}\n").as_bytes()).await?;
                        continue;
                    }
                };
                if let Err(e) = store.tail(start, limit, &mut out).await {
                    warn!(error = %e, "tail ended with an error");
                    out.write_all(format!("error: {e:#}\n").as_bytes()).await?;
                }
            }
            ["reset"] => match store.reset().await {
                Ok(()) => out.write_all(b"ok\n").await?,
                Err(e) => out.write_all(format!("error: {e:#}\n").as_bytes()).await?,
            },
            _ => {
                out.write_all(b"error: unrecognized command\n").await?;
            }
        }
    }
    Ok(())
}

fn parse_tail_args(tokens: &[&str]) -> anyhow::Result<(StartPosition, Option<usize>)> {
    let mut start = StartPosition::Beginning;
    let mut limit = None;
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "from" => {
                let id = tokens
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("'from' requires a fact id"))?;
                start = StartPosition::After(parse_fact_id(id)?);
                i += 2;
            }
            "limit" => {
                let n = tokens
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("'limit' requires a count"))?;
                limit = Some(n.parse().context("limit must be a non-negative integer")?);
                i += 2;
            }
            other => bail!("unrecognized tail option '{other}'"),
        }
    }
    Ok((start, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(input: &str) -> (AnyStore, String) {
        let store = AnyStore::Memory(factstore_backend_memory::open("console-test"));
        let mut out = Vec::new();
        run_console(&store, input.as_bytes(), &mut out).await.unwrap();
        (store, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn append_then_get_round_trips() {
        let (store, out) = run("append order.created order customer-1 hello\n").await;
        assert!(out.contains("Appended"), "unexpected output: {out}");

        let facts = store.find_by_subject(&Subject::new("order", "customer-1")).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact_type, "order.created");
        assert_eq!(facts[0].payload.data, b"hello");
    }

    #[tokio::test]
    async fn append_rejects_malformed_tag() {
        let (_store, out) = run("append t s i payload not-a-tag\n").await;
        assert!(out.contains("error:"), "expected a tag parse error: {out}");
    }

    #[tokio::test]
    async fn reset_wipes_appended_facts() {
        let (store, _out) = run(
            "append t s i payload\n\
             reset\n",
        )
        .await;
        let facts = store.find_by_subject(&Subject::new("s", "i")).await.unwrap();
        assert!(facts.is_empty());
    }

    #[tokio::test]
    async fn unrecognized_command_reports_error() {
        let (_store, out) = run("bogus\n").await;
        assert!(out.contains("unrecognized command"));
    }
}
