//! Drives one active stream: a spawned network reader feeds a [`RevealState`]
//! that a frame ticker paces onto a [`RenderSink`].

use std::time::Duration;

use futures::StreamExt;
use relay_shared::models::StreamEvent;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::EventStream;
use crate::reveal::{RevealState, RevealStep};
use crate::scroll::AutoScroll;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);
const READER_CHANNEL_CAPACITY: usize = 64;
const INCOMPLETE_STREAM_MESSAGE: &str = "stream ended before completion";

/// Where revealed text goes. `render` always receives the full displayed
/// text so far.
pub trait RenderSink: Send {
    fn render(&mut self, displayed: &str);

    fn scroll_to_bottom(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollEvent {
    pub distance_from_bottom: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeStatus {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub status: ConsumeStatus,
    pub displayed: String,
}

enum ReaderMessage {
    Event(StreamEvent),
    Failed(String),
}

pub struct StreamConsumer<S> {
    sink: S,
    frame_interval: Duration,
    auto_scroll: AutoScroll,
    scroll_events: Option<mpsc::UnboundedReceiver<ScrollEvent>>,
}

impl<S: RenderSink> StreamConsumer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            auto_scroll: AutoScroll::default(),
            scroll_events: None,
        }
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn with_scroll_events(mut self, scroll_events: mpsc::UnboundedReceiver<ScrollEvent>) -> Self {
        self.scroll_events = Some(scroll_events);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Runs until everything arrived is displayed and the stream ended, or
    /// until `cancel` fires. The network read stops in both cases.
    pub async fn run(&mut self, events: EventStream, cancel: CancellationToken) -> ConsumeOutcome {
        let reader_cancel = cancel.child_token();
        let (reader_tx, mut reader_rx) = mpsc::channel(READER_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_events(events, reader_tx, reader_cancel.clone()));

        let mut reveal = RevealState::new();
        let mut failure: Option<String> = None;
        let mut reader_open = true;

        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_frame = Instant::now();

        let status = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    reveal.cancel();
                    break ConsumeStatus::Cancelled;
                }
                message = reader_rx.recv(), if reader_open => match message {
                    Some(ReaderMessage::Event(StreamEvent::Delta { content, .. })) => {
                        reveal.push(&content);
                    }
                    Some(ReaderMessage::Event(StreamEvent::Done { full_text, .. })) => {
                        reveal.finish(Some(&full_text));
                    }
                    Some(ReaderMessage::Event(StreamEvent::Error { error })) => {
                        failure = Some(error);
                        reveal.finish(None);
                    }
                    Some(ReaderMessage::Failed(message)) => {
                        failure = Some(message);
                        reveal.finish(None);
                    }
                    None => {
                        reader_open = false;
                        if !reveal.is_done() {
                            failure.get_or_insert_with(|| INCOMPLETE_STREAM_MESSAGE.to_string());
                            reveal.finish(None);
                        }
                    }
                },
                Some(scroll) = next_scroll_event(&mut self.scroll_events) => {
                    self.auto_scroll
                        .on_user_scroll(scroll.distance_from_bottom, Instant::now().into_std());
                }
                now = ticker.tick() => {
                    let elapsed = now.saturating_duration_since(last_frame);
                    last_frame = now;
                    match reveal.tick(elapsed) {
                        RevealStep::Advanced => {
                            self.sink.render(reveal.displayed());
                            if self.auto_scroll.should_follow(now.into_std()) {
                                self.sink.scroll_to_bottom();
                            }
                        }
                        RevealStep::Idle => {}
                        RevealStep::Finished => {
                            break match failure.take() {
                                Some(message) => ConsumeStatus::Failed(message),
                                None => ConsumeStatus::Completed,
                            };
                        }
                        RevealStep::Cancelled => break ConsumeStatus::Cancelled,
                    }
                }
            }
        };

        reader_cancel.cancel();
        if let Err(err) = reader.await {
            debug!("stream reader task ended abnormally: {err}");
        }

        ConsumeOutcome {
            status,
            displayed: reveal.displayed().to_string(),
        }
    }
}

async fn next_scroll_event(
    scroll_events: &mut Option<mpsc::UnboundedReceiver<ScrollEvent>>,
) -> Option<ScrollEvent> {
    match scroll_events {
        Some(receiver) => {
            let event = receiver.recv().await;
            if event.is_none() {
                *scroll_events = None;
            }
            event
        }
        None => std::future::pending().await,
    }
}

async fn read_events(
    mut events: EventStream,
    messages: mpsc::Sender<ReaderMessage>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = events.next() => next,
        };

        let message = match next {
            Some(Ok(event)) => {
                let terminal = !matches!(event, StreamEvent::Delta { .. });
                if messages.send(ReaderMessage::Event(event)).await.is_err() || terminal {
                    return;
                }
                continue;
            }
            Some(Err(err)) => ReaderMessage::Failed(err.to_string()),
            None => return,
        };

        let _ = messages.send(message).await;
        return;
    }
}
