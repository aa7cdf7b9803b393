//! 工具注册表
//!
//! 所有工具实现 Tool trait（名称 / 描述 / 类型 / 参数 schema / 异步执行），由 ToolRegistry 按注册顺序保存；
//! 编排核心只通过 ToolDispatcher（list_tools / invoke）使用它，不关心具体工具。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::CallContext;

/// 工具能力类型，决定调度路径
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// 信息检索类：获取和查询系统或外部信息
    InfoRetrieval,
    /// 执行/动作类：执行具体操作或控制；未声明类型的工具归入此类
    #[default]
    Execution,
    /// 系统/API 集成类：与其他系统或 API 交互
    SystemIntegration,
    /// 人机协作类：促进人机交互和协作
    HumanCollaboration,
}

impl ToolType {
    pub const ALL: [ToolType; 4] = [
        ToolType::InfoRetrieval,
        ToolType::Execution,
        ToolType::SystemIntegration,
        ToolType::HumanCollaboration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolType::InfoRetrieval => "info_retrieval",
            ToolType::Execution => "execution",
            ToolType::SystemIntegration => "system_integration",
            ToolType::HumanCollaboration => "human_collaboration",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ToolType::InfoRetrieval => "信息检索工具",
            ToolType::Execution => "执行/动作工具",
            ToolType::SystemIntegration => "系统/API集成工具",
            ToolType::HumanCollaboration => "人机协作工具",
        }
    }
}

/// 工具描述（只读，由注册表提供给编排核心）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type", default)]
    pub tool_type: ToolType,
    /// JSON-schema 风格的参数描述
    #[serde(default)]
    pub parameters: Value,
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDescriptor {
    /// 参数 schema 中声明了 default 的字段
    pub fn default_parameters(&self) -> Vec<(String, Value)> {
        self.parameters
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|(k, p)| p.get("default").map(|d| (k.clone(), d.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// outputSchema.required 中列出的字段
    pub fn required_outputs(&self) -> Vec<String> {
        self.output_schema
            .as_ref()
            .and_then(|s| s.get("required"))
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }
}

/// 工具 trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（决策 JSON 中 tool.name 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    fn tool_type(&self) -> ToolType {
        ToolType::Execution
    }

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn output_schema(&self) -> Option<Value> {
        None
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            id: self.name().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            tool_type: self.tool_type(),
            parameters: self.parameters_schema(),
            output_schema: self.output_schema(),
        }
    }

    /// 执行工具；返回值可以是任意成功载荷，也可以是 JSON-RPC 错误或 {isError: true, ...} 对象
    async fn execute(&self, params: Value, ctx: &CallContext) -> Result<Value, String>;
}

/// 工具注册表对编排核心暴露的契约
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    async fn invoke(&self, name: &str, params: Value, ctx: &CallContext) -> Result<Value, String>;
}

/// 工具注册表：按注册顺序存储 Arc<dyn Tool>，同名注册会替换旧工具
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => self.tools[i] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// 按注册顺序返回全部工具
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    async fn invoke(&self, name: &str, params: Value, ctx: &CallContext) -> Result<Value, String> {
        let tool = self.get(name).ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(params, ctx).await
    }
}
