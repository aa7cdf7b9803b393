//! 工具调用器
//!
//! 先写入 tool_call 历史，再按注册表描述补齐类型与默认参数，按 ToolType 选择调度路径调用注册表；
//! 工具返回 Err 或 panic 都被转成 {isError: true, ...} 对象，绝不向循环抛出。
//! 每次调用输出一行结构化审计日志（JSON），最后交给 ToolResultProcessor 归一化。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentSupervisor, CallContext, HistoryKind};
use crate::tools::{ToolCatalog, ToolDispatcher, ToolInvocationResult, ToolResultProcessor, ToolType};

/// 一次工具调用请求（决策中的 tool 字段）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// 由调用器根据注册表描述回填
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<ToolType>,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, parameters: Option<Value>) -> Self {
        Self {
            name: name.into(),
            parameters,
            tool_type: None,
        }
    }
}

/// 调度路径
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchPath {
    /// 信息检索 / 执行类内置工具
    Builtin,
    /// 通用 MCP 请求（系统集成类，或找不到描述的工具）
    Mcp,
    /// 人机协作类智能体工具
    AgentTool,
}

impl DispatchPath {
    pub fn for_type(tool_type: Option<ToolType>) -> Self {
        match tool_type {
            Some(ToolType::InfoRetrieval) | Some(ToolType::Execution) => DispatchPath::Builtin,
            Some(ToolType::SystemIntegration) | None => DispatchPath::Mcp,
            Some(ToolType::HumanCollaboration) => DispatchPath::AgentTool,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            DispatchPath::Builtin => "builtin",
            DispatchPath::Mcp => "mcp",
            DispatchPath::AgentTool => "agent_tool",
        }
    }
}

pub struct ToolInvoker {
    dispatcher: Arc<dyn ToolDispatcher>,
    processor: ToolResultProcessor,
}

impl ToolInvoker {
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            processor: ToolResultProcessor::new(dispatcher.clone()),
            dispatcher,
        }
    }

    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog::from_dispatcher(self.dispatcher.as_ref())
    }

    /// 回填工具类型与调用方未给出的默认参数；找不到描述时原样返回
    pub fn validate(&self, request: &ToolRequest) -> ToolRequest {
        let mut validated = request.clone();
        let catalog = self.catalog();
        let Some(descriptor) = catalog.find(&request.name) else {
            return validated;
        };

        validated.tool_type = Some(descriptor.tool_type);
        let defaults = descriptor.default_parameters();
        if !descriptor.parameters.is_null() {
            let params = validated
                .parameters
                .get_or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(map) = params {
                for (key, value) in defaults {
                    map.entry(key).or_insert(value);
                }
            }
        }
        validated
    }

    pub async fn invoke(
        &self,
        supervisor: &AgentSupervisor,
        request: ToolRequest,
        cancel: CancellationToken,
    ) -> ToolInvocationResult {
        let recorded = serde_json::to_value(&request).unwrap_or(Value::Null);
        let game_context = supervisor.with_state(|s| {
            s.push_history(HistoryKind::ToolCall, recorded);
            s.game_context()
        });

        let validated = self.validate(&request);
        let path = DispatchPath::for_type(validated.tool_type);
        let ctx = CallContext::new(game_context, cancel);

        let start = Instant::now();
        let params_preview = params_preview(validated.parameters.as_ref());
        let name = validated.name.clone();
        let tool_type = validated.tool_type;
        let raw = match path {
            DispatchPath::Builtin => self.dispatch_builtin(validated, &ctx).await,
            DispatchPath::Mcp => self.dispatch_mcp(validated, &ctx).await,
            DispatchPath::AgentTool => {
                self.dispatch_agent_tool(validated, &ctx, supervisor.human_collaboration())
                    .await
            }
        };

        let result = self.processor.process(&raw, Some(&name));
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "type": tool_type.map(ToolType::as_str),
            "path": path.as_str(),
            "ok": result.should_continue(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "params_preview": params_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    async fn dispatch_builtin(&self, request: ToolRequest, ctx: &CallContext) -> Value {
        tracing::info!(tool = %request.name, "executing info-retrieval/execution tool");
        self.call_guarded(request, ctx).await
    }

    async fn dispatch_mcp(&self, request: ToolRequest, ctx: &CallContext) -> Value {
        tracing::info!(tool = %request.name, "executing MCP tool");
        self.call_guarded(request, ctx).await
    }

    async fn dispatch_agent_tool(
        &self,
        mut request: ToolRequest,
        ctx: &CallContext,
        collaboration: bool,
    ) -> Value {
        tracing::info!(tool = %request.name, collaboration, "executing human-collaboration tool");
        if collaboration {
            let params = request
                .parameters
                .get_or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(map) = params {
                map.insert("humanCollaborationRequired".to_string(), Value::Bool(true));
            }
        }
        self.call_guarded(request, ctx).await
    }

    /// 调用注册表；Err 与 panic 一律转成 flagged-error 对象
    async fn call_guarded(&self, request: ToolRequest, ctx: &CallContext) -> Value {
        let params = request.parameters.unwrap_or(Value::Object(Default::default()));
        let call = self.dispatcher.invoke(&request.name, params, ctx);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(raw)) => raw,
            Ok(Err(message)) => flagged_error(&request.name, &message),
            Err(panic) => flagged_error(&request.name, &panic_message(panic.as_ref())),
        }
    }
}

fn flagged_error(tool: &str, message: &str) -> Value {
    serde_json::json!({
        "isError": true,
        "error": format!("tool execution failed: {}", message),
        "message": format!("internal error executing tool \"{}\"", tool),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

fn params_preview(params: Option<&Value>) -> String {
    let s = params.map(Value::to_string).unwrap_or_default();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
