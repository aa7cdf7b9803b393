//! LLM 传输层抽象
//!
//! 编排器每次思考/阶段调用只发送一个完整 prompt，并期待一个完整回复；
//! 流式分片（如有）由传输实现自行拼接后返回。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::CallContext;

/// 传输层回复：多数后端返回文本，部分后端（或测试桩）直接给出已解析的 JSON
#[derive(Debug, Clone, PartialEq)]
pub enum LlmReply {
    Text(String),
    Structured(Value),
}

impl From<&str> for LlmReply {
    fn from(s: &str) -> Self {
        LlmReply::Text(s.to_string())
    }
}

impl From<String> for LlmReply {
    fn from(s: String) -> Self {
        LlmReply::Text(s)
    }
}

impl From<Value> for LlmReply {
    fn from(v: Value) -> Self {
        LlmReply::Structured(v)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// LLM 传输 trait：complete(prompt, context) -> 回复或错误
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete(&self, prompt: &str, ctx: &CallContext) -> Result<LlmReply, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
