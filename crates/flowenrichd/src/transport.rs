//! Record transport: where flow records come from and where they go.
//!
//! The daemon reads newline-delimited JSON records and writes one enriched
//! record per input line, in input order.

use crate::enricher::EnrichmentOrchestrator;
use crate::error::Result;
use async_trait::async_trait;
use flow_types::FlowRecord;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delivers flow records one at a time.
#[async_trait]
pub trait FlowSource: Send {
    /// Next record, `None` once the source is exhausted.
    async fn next_record(&mut self) -> Result<Option<FlowRecord>>;
}

/// Accepts enriched flow records.
#[async_trait]
pub trait FlowSink: Send {
    async fn send(&mut self, record: &FlowRecord) -> Result<()>;

    async fn flush(&mut self) -> Result<()>;
}

/// Reads one JSON object per line.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: u64,
    malformed: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            malformed: 0,
        }
    }

    /// Number of lines skipped because they did not parse.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> FlowSource for JsonLinesSource<R> {
    async fn next_record(&mut self) -> Result<Option<FlowRecord>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<FlowRecord>(line) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    self.malformed += 1;
                    warn!(line = self.line_no, error = %e, "Skipping malformed flow record");
                }
            }
        }
        Ok(None)
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: Vec::with_capacity(512),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FlowSink for JsonLinesSink<W> {
    async fn send(&mut self, record: &FlowRecord) -> Result<()> {
        self.buf.clear();
        serde_json::to_writer(&mut self.buf, record)?;
        self.buf.push(b'\n');
        self.writer.write_all(&self.buf).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Counters of one [`pump`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub forwarded: u64,
}

/// Moves records from `source` through `enricher` into `sink` until the
/// source is exhausted or `shutdown` is cancelled.
///
/// Transport errors end the run; enrichment never does.
pub async fn pump<S, K>(
    source: &mut S,
    sink: &mut K,
    enricher: &EnrichmentOrchestrator,
    shutdown: &CancellationToken,
) -> Result<PumpStats>
where
    S: FlowSource + ?Sized,
    K: FlowSink + ?Sized,
{
    let mut stats = PumpStats::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, stopping record pump");
                break;
            }
            next = source.next_record() => next?,
        };
        let Some(record) = next else {
            debug!("Flow source exhausted");
            break;
        };

        let enriched = enricher.process(record);
        sink.send(&enriched).await?;
        sink.flush().await?;
        stats.forwarded += 1;
    }

    sink.flush().await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnricherConfig;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_source_skips_blank_and_malformed_lines() {
        let input: &[u8] = b"{\"proto\":6}\n\nnot json\n{\"proto\":17,\"bytes\":5}\n";
        let mut source = JsonLinesSource::new(input);

        let first = source.next_record().await.unwrap().unwrap();
        assert_eq!(first.proto, 6);
        let second = source.next_record().await.unwrap().unwrap();
        assert_eq!((second.proto, second.bytes), (17, 5));
        assert!(source.next_record().await.unwrap().is_none());
        assert_eq!(source.malformed(), 1);
    }

    #[tokio::test]
    async fn test_sink_writes_one_line_per_record() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.send(&FlowRecord::default()).await.unwrap();
        sink.send(&FlowRecord {
            proto: 6,
            ..Default::default()
        })
        .await
        .unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: FlowRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.proto, 6);
    }

    #[tokio::test]
    async fn test_pump_preserves_order() {
        let input: &[u8] = b"{\"proto\":1}\n{\"proto\":6}\n{\"proto\":17}\n";
        let mut source = JsonLinesSource::new(input);
        let mut sink = JsonLinesSink::new(Vec::new());
        let enricher = EnrichmentOrchestrator::new(EnricherConfig::default());

        let stats = pump(&mut source, &mut sink, &enricher, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.forwarded, 3);

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let names: Vec<String> = out
            .lines()
            .map(|line| serde_json::from_str::<FlowRecord>(line).unwrap().proto_name)
            .collect();
        assert_eq!(names, vec!["ICMP", "TCP", "UDP"]);
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancel() {
        let input: &[u8] = b"{\"proto\":1}\n";
        let mut source = JsonLinesSource::new(input);
        let mut sink = JsonLinesSink::new(Vec::new());
        let enricher = EnrichmentOrchestrator::new(EnricherConfig::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = pump(&mut source, &mut sink, &enricher, &shutdown)
            .await
            .unwrap();
        assert_eq!(stats.forwarded, 0);
    }
}
