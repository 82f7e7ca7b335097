use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::{
    providers::LLMProvider,
    types::{CompletionRequest, CompletionResponse},
    LLMError,
};

type Responder = Box<dyn Fn(usize, &CompletionRequest) -> Result<String, LLMError> + Send + Sync>;

/// Offline provider that answers from a script instead of the network.
///
/// Every request is recorded, so callers can check how many calls a run made
/// and what each prompt contained.
pub struct ScriptedProvider {
    responder: Responder,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Replies with `responses` in order and fails once they run out.
    pub fn new(responses: Vec<String>) -> Self {
        Self::from_fn(move |index, _| {
            responses
                .get(index)
                .cloned()
                .ok_or_else(|| LLMError::Provider("no more scripted responses".to_string()))
        })
    }

    /// Computes each reply from the zero-based call index and the request.
    pub fn from_fn(
        responder: impl Fn(usize, &CompletionRequest) -> Result<String, LLMError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies with the text of the last user message.
    pub fn echo() -> Self {
        Self::from_fn(|_, request| {
            Ok(request.last_user_text().unwrap_or_default().to_string())
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let index = {
            let mut guard = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            guard.push(request.clone());
            guard.len() - 1
        };

        let content = (self.responder)(index, &request)?;
        Ok(CompletionResponse::from_text(content))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptedProvider;
    use crate::{
        providers::LLMProvider,
        types::{ChatMessage, CompletionRequest},
        LLMError,
    };

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::new(
            "model",
            vec![ChatMessage::system("persona"), ChatMessage::user(text)],
        )
    }

    #[tokio::test]
    async fn replays_responses_then_fails() {
        let provider = ScriptedProvider::new(vec!["one".into(), "two".into()]);

        let first = provider.complete(request("a")).await.unwrap();
        let second = provider.complete(request("b")).await.unwrap();
        assert_eq!(first.message.text(), Some("one"));
        assert_eq!(second.message.text(), Some("two"));

        let err = provider.complete(request("c")).await.unwrap_err();
        assert!(matches!(err, LLMError::Provider(_)));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn echo_returns_last_user_message() {
        let provider = ScriptedProvider::echo();
        let response = provider.complete(request("hello there")).await.unwrap();
        assert_eq!(response.message.text(), Some("hello there"));
        assert_eq!(
            provider.requests()[0].system_text(),
            Some("persona")
        );
    }
}
