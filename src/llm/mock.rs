//! Mock LLM 传输（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：取 prompt 中标记为 [latest] 的用户消息，回显为 respond 决策
//! - ScriptedLlm：按顺序返回预置回复，并记录每次收到的 prompt
//! - KeywordLlm：按 prompt 中的关键词选择回复（五步流程各阶段提示词不同）

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::CallContext;
use crate::llm::{LlmError, LlmReply, LlmTransport};
use crate::react::thought::LATEST_MARKER;

/// Mock 客户端：回显用户最新一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmTransport for MockLlmClient {
    async fn complete(&self, prompt: &str, _ctx: &CallContext) -> Result<LlmReply, LlmError> {
        let latest = prompt
            .lines()
            .find_map(|l| l.trim().strip_prefix(LATEST_MARKER))
            .map(str::trim)
            .unwrap_or("(no input)");
        Ok(LlmReply::Structured(serde_json::json!({
            "action": "respond",
            "content": format!("Echo from Mock: {}", latest),
        })))
    }
}

/// 脚本化客户端：每次调用弹出一条预置结果，耗尽后返回 Api 错误
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<LlmReply, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new(script: impl IntoIterator<Item = Result<LlmReply, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 全部为成功回复的便捷构造
    pub fn replies<R: Into<LlmReply>>(replies: impl IntoIterator<Item = R>) -> Self {
        Self::new(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// 每次回复前先等待，用于触发阶段超时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl LlmTransport for ScriptedLlm {
    async fn complete(&self, prompt: &str, _ctx: &CallContext) -> Result<LlmReply, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Api("script exhausted".to_string())))
    }
}

/// 关键词路由客户端：第一个出现在 prompt 中的关键词决定回复
#[derive(Debug, Default)]
pub struct KeywordLlm {
    rules: Vec<(String, Result<LlmReply, LlmError>)>,
    fallback: Option<LlmReply>,
    prompts: Mutex<Vec<String>>,
}

impl KeywordLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, keyword: impl Into<String>, reply: impl Into<LlmReply>) -> Self {
        self.rules.push((keyword.into(), Ok(reply.into())));
        self
    }

    pub fn fail_on(mut self, keyword: impl Into<String>, err: LlmError) -> Self {
        self.rules.push((keyword.into(), Err(err)));
        self
    }

    pub fn otherwise(mut self, reply: impl Into<LlmReply>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmTransport for KeywordLlm {
    async fn complete(&self, prompt: &str, _ctx: &CallContext) -> Result<LlmReply, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        if let Some((_, reply)) = self.rules.iter().find(|(k, _)| prompt.contains(k.as_str())) {
            return reply.clone();
        }
        self.fallback
            .clone()
            .ok_or_else(|| LlmError::Api("no keyword matched".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> CallContext {
        CallContext::new(serde_json::Value::Null, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_mock_echoes_latest_message() {
        let prompt = format!("- older\n{} newest question\n", LATEST_MARKER);
        let reply = MockLlmClient.complete(&prompt, &ctx()).await.unwrap();
        match reply {
            LlmReply::Structured(v) => {
                assert_eq!(v["content"], "Echo from Mock: newest question");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scripted_pops_in_order_then_errors() {
        let llm = ScriptedLlm::replies(["a", "b"]);
        assert_eq!(llm.complete("p1", &ctx()).await.unwrap(), LlmReply::from("a"));
        assert_eq!(llm.complete("p2", &ctx()).await.unwrap(), LlmReply::from("b"));
        assert!(llm.complete("p3", &ctx()).await.is_err());
        assert_eq!(llm.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_keyword_routes_first_match() {
        let llm = KeywordLlm::new().on("plan", "P").on("act", "A").otherwise("F");
        assert_eq!(llm.complete("please act", &ctx()).await.unwrap(), LlmReply::from("A"));
        assert_eq!(llm.complete("nothing", &ctx()).await.unwrap(), LlmReply::from("F"));
    }
}
