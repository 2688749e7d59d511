//! Streamed response bodies.
//!
//! A streamed body passes through two stages: the decompressor and the
//! progress meter. Their order depends on which length the server declared,
//! because progress has to be measured against the length of the bytes
//! actually flowing past the meter. [`plan_stages`] holds that decision table.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use keel_compression::{ContentEncoding, StreamingDecompressor};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::progress::{ProgressMeter, ProgressState};
use crate::{ClientError, Result};

/// Header carrying the uncompressed body length.
pub const TRANSFER_LENGTH_HEADER: &str = "x-transfer-length";

/// Body lengths declared by the server. Either, both or neither may be known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseLengthInfo {
    /// Length of the bytes on the wire (`Content-Length`).
    pub compressed: Option<u64>,
    /// Length after decoding (`X-Transfer-Length`).
    pub uncompressed: Option<u64>,
}

impl ResponseLengthInfo {
    /// Read both lengths from response headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            compressed: header_u64(headers, http::header::CONTENT_LENGTH.as_str()),
            uncompressed: header_u64(headers, TRANSFER_LENGTH_HEADER),
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Count bytes and emit progress samples.
    Measure,
    /// Decode the content encoding.
    Decompress,
}

/// Ordered stages and the total the meter measures against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    /// Stages in the order each chunk visits them.
    pub stages: Vec<Stage>,
    /// Declared length at the measuring point.
    pub total: Option<u64>,
}

impl StagePlan {
    fn decompress_position(&self) -> Option<usize> {
        self.stages.iter().position(|s| *s == Stage::Decompress)
    }
}

/// Choose the stage order for a response.
///
/// | compressed | known lengths            | order                 | total        |
/// |------------|--------------------------|-----------------------|--------------|
/// | no         | any                      | measure               | uncompressed, else compressed |
/// | yes        | compressed only          | measure, decompress   | compressed   |
/// | yes        | uncompressed (or both)   | decompress, measure   | uncompressed |
/// | yes        | neither                  | decompress, measure   | unknown      |
pub fn plan_stages(compressed: bool, lengths: ResponseLengthInfo) -> StagePlan {
    if !compressed {
        return StagePlan {
            stages: vec![Stage::Measure],
            total: lengths.uncompressed.or(lengths.compressed),
        };
    }

    match lengths {
        ResponseLengthInfo {
            compressed: Some(total),
            uncompressed: None,
        } => StagePlan {
            stages: vec![Stage::Measure, Stage::Decompress],
            total: Some(total),
        },
        ResponseLengthInfo { uncompressed, .. } => StagePlan {
            stages: vec![Stage::Decompress, Stage::Measure],
            total: uncompressed,
        },
    }
}

/// Decompressing, progress-reporting body stream.
///
/// Each chunk pulled from the body visits the planned stages in order; nothing
/// is read ahead of the consumer. Progress samples go to an unbounded channel
/// that closes after the final sample.
pub struct StreamPipeline {
    body: BoxStream<'static, Result<Bytes>>,
    plan: StagePlan,
    decoder: StreamingDecompressor,
    meter: ProgressMeter,
    progress: Option<mpsc::UnboundedSender<ProgressState>>,
    receiver: Option<mpsc::UnboundedReceiver<ProgressState>>,
    done: bool,
}

impl StreamPipeline {
    /// Compose the pipeline for a body with the given encoding and lengths.
    pub fn new(
        body: BoxStream<'static, Result<Bytes>>,
        encoding: ContentEncoding,
        lengths: ResponseLengthInfo,
        interval: Duration,
    ) -> Result<Self> {
        let plan = plan_stages(encoding.is_compressed(), lengths);
        debug!(
            encoding = %encoding,
            stages = ?plan.stages,
            total = ?plan.total,
            "Composed stream pipeline"
        );

        let decoder = StreamingDecompressor::new(encoding)?;
        let meter = ProgressMeter::new(plan.total, interval);
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            body,
            plan,
            decoder,
            meter,
            progress: Some(tx),
            receiver: Some(rx),
            done: false,
        })
    }

    /// The stage plan in use.
    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    /// Take the progress receiver. Returns `None` after the first call.
    pub fn take_progress(&mut self) -> Option<mpsc::UnboundedReceiver<ProgressState>> {
        self.receiver.take()
    }

    /// Read the remaining output into one buffer.
    pub async fn collect_bytes(mut self) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    fn run_stages(&mut self, from: usize, mut chunk: Bytes) -> Result<Bytes> {
        for index in from..self.plan.stages.len() {
            match self.plan.stages[index] {
                Stage::Measure => self.measure(chunk.len()),
                Stage::Decompress => chunk = self.decoder.decompress_chunk(&chunk)?,
            }
        }
        Ok(chunk)
    }

    fn measure(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        if let Some(state) = self.meter.record(len) {
            self.emit(state);
        }
    }

    fn emit(&self, state: ProgressState) {
        trace!(
            received = state.received,
            total = ?state.total,
            percentage = ?state.percentage,
            "Progress"
        );
        if let Some(tx) = &self.progress {
            // The consumer may have dropped the receiver.
            let _ = tx.send(state);
        }
    }

    /// Flush the decoder through the stages after it, then emit the final sample.
    ///
    /// The progress channel is closed on every exit.
    fn finish_stages(&mut self) -> Result<Bytes> {
        let flushed = match self.plan.decompress_position() {
            Some(position) => self
                .decoder
                .finish()
                .map_err(ClientError::from)
                .and_then(|tail| self.run_stages(position + 1, tail)),
            None => Ok(Bytes::new()),
        };

        if flushed.is_ok() {
            let state = self.meter.finish();
            self.emit(state);
        }
        self.progress.take();
        flushed
    }
}

impl Stream for StreamPipeline {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match this.body.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => match this.run_stages(0, chunk) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Poll::Ready(Some(Ok(out))),
                    Err(e) => {
                        this.done = true;
                        this.progress.take();
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    this.progress.take();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return match this.finish_stages() {
                        Ok(tail) if tail.is_empty() => Poll::Ready(None),
                        Ok(tail) => Poll::Ready(Some(Ok(tail))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}

impl std::fmt::Debug for StreamPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipeline")
            .field("plan", &self.plan)
            .field("decoder", &self.decoder)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Successful streamed response: decoded body plus response metadata.
#[derive(Debug)]
pub struct DownloadStream {
    status: StatusCode,
    headers: HeaderMap,
    url: url::Url,
    mime: Option<String>,
    pipeline: StreamPipeline,
}

impl DownloadStream {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        url: url::Url,
        pipeline: StreamPipeline,
    ) -> Self {
        let mime = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            status,
            headers,
            url,
            mime,
            pipeline,
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the response URL.
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Content type of the response.
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// The stage plan used for this body.
    pub fn plan(&self) -> &StagePlan {
        self.pipeline.plan()
    }

    /// Take the progress receiver. Returns `None` after the first call.
    pub fn take_progress(&mut self) -> Option<mpsc::UnboundedReceiver<ProgressState>> {
        self.pipeline.take_progress()
    }

    /// Read the whole decoded body.
    pub async fn bytes(self) -> Result<Bytes> {
        self.pipeline.collect_bytes().await
    }

    /// Read the whole decoded body as UTF-8 text (lossy).
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().pipeline.poll_next_unpin(cx)
    }
}
