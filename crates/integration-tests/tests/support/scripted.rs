use std::collections::VecDeque;
use std::sync::Mutex;

use futures::StreamExt;
use futures::stream;
use relay_shared::llm::{
    LlmCompletion, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    LlmStreamFuture,
};

pub const SCRIPTED_MODEL: &str = "scripted";
const DEFAULT_FRAGMENTS: [&str; 2] = ["Scripted ", "answer."];

#[derive(Debug, Clone)]
pub enum Script {
    Answer(Vec<String>),
    FailMidStream {
        fragments: Vec<String>,
        error: LlmGatewayError,
    },
    Reject(LlmGatewayError),
}

impl Script {
    pub fn answer(fragments: &[&str]) -> Self {
        Self::Answer(fragments.iter().map(ToString::to_string).collect())
    }
}

#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<LlmGatewayRequest>>,
}

impl ScriptedGateway {
    pub fn push(&self, script: Script) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .push_back(script);
    }

    pub fn requests(&self) -> Vec<LlmGatewayRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn next_script(&self, request: LlmGatewayRequest) -> Script {
        self.requests.lock().expect("requests lock").push(request);
        self.scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_else(|| Script::answer(&DEFAULT_FRAGMENTS))
    }
}

impl LlmGateway for ScriptedGateway {
    fn complete<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a> {
        Box::pin(async move {
            match self.next_script(request) {
                Script::Answer(fragments) => Ok(LlmCompletion {
                    model: SCRIPTED_MODEL.to_string(),
                    provider_request_id: None,
                    text: fragments.concat(),
                    usage: None,
                }),
                Script::FailMidStream { error, .. } | Script::Reject(error) => Err(error),
            }
        })
    }

    fn stream<'a>(&'a self, request: LlmGatewayRequest) -> LlmStreamFuture<'a> {
        Box::pin(async move {
            match self.next_script(request) {
                Script::Answer(fragments) => Ok(fragment_stream(fragments).boxed()),
                Script::FailMidStream { fragments, error } => Ok(fragment_stream(fragments)
                    .chain(stream::once(async move { Err(error) }))
                    .boxed()),
                Script::Reject(error) => Err(error),
            }
        })
    }
}

fn fragment_stream(
    fragments: Vec<String>,
) -> impl futures::Stream<Item = Result<String, LlmGatewayError>> + Send + 'static {
    stream::iter(fragments.into_iter().map(Ok))
}
