use std::collections::VecDeque;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use relay_shared::models::StreamEvent;
use relay_shared::sse::SseEventDecoder;

use crate::client::ClientError;

pub type EventStream = BoxStream<'static, Result<StreamEvent, ClientError>>;

#[derive(Debug, Default)]
pub struct StreamEventDecoder {
    sse: SseEventDecoder,
}

impl StreamEventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, ClientError> {
        self.sse
            .push(chunk)?
            .iter()
            .map(|data| parse_event(data))
            .collect()
    }

    pub fn finish(&mut self) -> Result<Option<StreamEvent>, ClientError> {
        self.sse
            .finish()?
            .map(|data| parse_event(&data))
            .transpose()
    }
}

fn parse_event(data: &str) -> Result<StreamEvent, ClientError> {
    Ok(serde_json::from_str(data)?)
}

struct EventStreamState<S> {
    body: S,
    decoder: StreamEventDecoder,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

/// Turns a raw body into events. The first error ends the stream.
pub fn decode_event_stream<S, B>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, ClientError>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = EventStreamState {
        body,
        decoder: StreamEventDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(chunk.as_ref()) {
                    Ok(events) => state.pending.extend(events),
                    Err(err) => {
                        state.finished = true;
                        return Some((Err(err), state));
                    }
                },
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    match state.decoder.finish() {
                        Ok(Some(event)) => state.pending.push_back(event),
                        Ok(None) => {}
                        Err(err) => return Some((Err(err), state)),
                    }
                }
            }
        }
    })
    .boxed()
}
