use std::time::Duration;

use futures::stream::{self, StreamExt};

use super::gateway::{
    LlmCompletion, LlmGateway, LlmGatewayFuture, LlmGatewayRequest, LlmStreamFuture,
};
use crate::models::{ContentPart, Role, TurnContent};

pub const MOCK_MODEL: &str = "mock";
const DEFAULT_WORD_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct MockGateway {
    word_delay: Duration,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            word_delay: DEFAULT_WORD_DELAY,
        }
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_word_delay(word_delay: Duration) -> Self {
        Self { word_delay }
    }

    pub fn answer_for(request: &LlmGatewayRequest) -> String {
        let prompt = last_user_text(request);
        let preview: String = prompt.chars().take(80).collect();
        format!(
            "**Mock {} response.** No LLM_API_KEY is configured, so this answer was generated \
             locally. You asked about: {}",
            request.mode.as_str(),
            preview.trim()
        )
    }
}

impl LlmGateway for MockGateway {
    fn complete<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a> {
        Box::pin(async move {
            Ok(LlmCompletion {
                model: MOCK_MODEL.to_string(),
                provider_request_id: None,
                text: Self::answer_for(&request),
                usage: None,
            })
        })
    }

    fn stream<'a>(&'a self, request: LlmGatewayRequest) -> LlmStreamFuture<'a> {
        Box::pin(async move {
            let answer = Self::answer_for(&request);
            let word_delay = self.word_delay;
            let words: Vec<String> = answer
                .split_inclusive(' ')
                .map(ToString::to_string)
                .collect();

            let fragments = stream::iter(words).then(move |word| async move {
                if !word_delay.is_zero() {
                    tokio::time::sleep(word_delay).await;
                }
                Ok(word)
            });
            Ok(fragments.boxed())
        })
    }
}

fn last_user_text(request: &LlmGatewayRequest) -> String {
    let Some(turn) = request
        .messages
        .iter()
        .rev()
        .find(|turn| turn.role == Role::User)
    else {
        return String::new();
    };

    match &turn.content {
        TurnContent::Text(text) => text.clone(),
        TurnContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::models::Turn;
    use crate::prompts::FeatureMode;

    fn request(text: &str) -> LlmGatewayRequest {
        LlmGatewayRequest::new(
            FeatureMode::Ideas,
            vec![Turn::system("system"), Turn::user(text)],
        )
    }

    #[tokio::test]
    async fn streamed_words_concatenate_to_the_completion() {
        let gateway = MockGateway::with_word_delay(Duration::ZERO);

        let completion = gateway
            .complete(request("rust web servers"))
            .await
            .expect("mock completion");
        let fragments: Vec<String> = gateway
            .stream(request("rust web servers"))
            .await
            .expect("mock stream")
            .map(|fragment| fragment.expect("mock fragments never fail"))
            .collect()
            .await;

        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), completion.text);
        assert!(completion.text.contains("ideas"));
        assert!(completion.text.contains("rust web servers"));
    }
}
