//! Prompt → model → parser composition.
//!
//! A [`Chain`] renders its [`PromptTemplate`] with the caller's variables,
//! sends the messages through a shared [`ChatModel`], and hands the reply to
//! an [`OutputParser`]. Every task in this crate is one chain.

use std::sync::Arc;

use tracing::Instrument;

use crate::error::Result;
use crate::model::ChatModel;
use crate::output_parser::OutputParser;
use crate::prompt::{PromptTemplate, PromptVars};

/// A named prompt/model/parser pipeline.
///
/// ```
/// use llm_tasks::backend::MockBackend;
/// use llm_tasks::chain::Chain;
/// use llm_tasks::model::ChatModel;
/// use llm_tasks::output_parser::StrOutputParser;
/// use llm_tasks::prompt::{PromptTemplate, PromptVars};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let model = ChatModel::builder("http://unused", "m")
///     .backend(Arc::new(MockBackend::fixed("pong")))
///     .build()
///     .unwrap();
/// let chain = Chain::new("ping", PromptTemplate::from_template("{text}"), Arc::new(model), StrOutputParser);
/// let out = chain.invoke(&PromptVars::from(("text", "ping"))).await.unwrap();
/// assert_eq!(out, "pong");
/// # }
/// ```
pub struct Chain<P> {
    name: String,
    prompt: PromptTemplate,
    model: Arc<ChatModel>,
    parser: P,
}

impl<P: OutputParser> Chain<P> {
    pub fn new(
        name: impl Into<String>,
        prompt: PromptTemplate,
        model: Arc<ChatModel>,
        parser: P,
    ) -> Self {
        Self {
            name: name.into(),
            prompt,
            model,
            parser,
        }
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Render, call the model and parse the reply.
    pub async fn invoke(&self, vars: &PromptVars) -> Result<P::Output> {
        let text = self.invoke_raw(vars).await?;
        self.parser.parse(&text)
    }

    /// Render and call the model, returning the unparsed reply.
    pub async fn invoke_raw(&self, vars: &PromptVars) -> Result<String> {
        let span = tracing::info_span!("chain", name = %self.name, model = %self.model.model_name());
        async {
            let messages = self.prompt.format_messages(vars)?;
            tracing::debug!(messages = messages.len(), "prompt rendered");
            self.model.generate(messages).await
        }
        .instrument(span)
        .await
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for Chain<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("parser", &self.parser)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, Role};
    use crate::error::TaskError;
    use crate::output_parser::{JsonOutputParser, StrOutputParser};

    fn model(mock: Arc<MockBackend>) -> Arc<ChatModel> {
        Arc::new(
            ChatModel::builder("http://unused", "test-model")
                .backend(mock)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn invoke_renders_prompt_and_parses() {
        let mock = Arc::new(MockBackend::fixed(r#"{"ok": true}"#));
        let chain = Chain::new(
            "json",
            PromptTemplate::from_template("Answer about {text}"),
            model(mock.clone()),
            JsonOutputParser,
        );

        let value = chain.invoke(&PromptVars::from(("text", "cats"))).await.unwrap();
        assert_eq!(value["ok"], true);

        let requests = mock.requests();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].role, Role::User);
        assert_eq!(requests[0].messages[0].content, "Answer about cats");
    }

    #[tokio::test]
    async fn invoke_raw_skips_parsing() {
        let mock = Arc::new(MockBackend::fixed("not json"));
        let chain = Chain::new(
            "raw",
            PromptTemplate::from_template("{text}"),
            model(mock),
            JsonOutputParser,
        );
        let vars = PromptVars::from(("text", "x"));
        assert_eq!(chain.invoke_raw(&vars).await.unwrap(), "not json");
        assert!(matches!(chain.invoke(&vars).await, Err(TaskError::Parse { .. })));
    }

    #[tokio::test]
    async fn missing_variable_never_reaches_the_model() {
        let mock = Arc::new(MockBackend::fixed("unused"));
        let chain = Chain::new(
            "missing",
            PromptTemplate::from_template("{text}"),
            model(mock.clone()),
            StrOutputParser,
        );
        let err = chain.invoke(&PromptVars::new()).await.unwrap_err();
        assert!(matches!(err, TaskError::MissingVariable(_)));
        assert!(mock.requests().is_empty());
    }
}
