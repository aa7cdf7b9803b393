//! 编排器构建器：统一的初始化逻辑
//!
//! 根据配置选择 LLM 后端，注册内置工具，生成 AgentOrchestrator。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::AgentOrchestrator;
use crate::llm::{LlmTransport, MockLlmClient, OpenAiTransport};
use crate::tools::{BoardContextTool, EchoTool, Tool, ToolDispatcher, ToolRegistry};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
///
/// 缺少对应的 API Key 时退回 Mock，保证命令行在离线环境也能跑通。
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmTransport> {
    let provider = cfg.llm.provider.to_lowercase();
    let model = cfg.llm.model.as_deref();

    match provider.as_str() {
        "deepseek" => {
            let key = std::env::var("DEEPSEEK_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"));
            if let Ok(key) = key {
                tracing::info!("Using DeepSeek LLM ({})", model.unwrap_or(crate::llm::DEEPSEEK_CHAT));
                return Arc::new(OpenAiTransport::deepseek(model, &key));
            }
        }
        "openai" => {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                let model = model.unwrap_or("gpt-4o-mini");
                tracing::info!("Using OpenAI LLM ({})", model);
                return Arc::new(OpenAiTransport::new(cfg.llm.base_url.as_deref(), model, &key));
            }
        }
        "mock" => return Arc::new(MockLlmClient),
        other => tracing::warn!("Unknown LLM provider '{}'", other),
    }
    tracing::warn!("No API key set or provider unknown, using Mock LLM");
    Arc::new(MockLlmClient)
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmTransport>>,
    registry: ToolRegistry,
    builtin_tools: bool,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            registry: ToolRegistry::new(),
            builtin_tools: true,
        }
    }

    /// 指定 LLM 传输（不指定时按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmTransport>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    /// 是否注册内置的 echo / board_context 工具
    pub fn with_builtin_tools(mut self, enable: bool) -> Self {
        self.builtin_tools = enable;
        self
    }

    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        if self.builtin_tools {
            tools.register(EchoTool);
            tools.register(BoardContextTool);
        }
        for tool in self.registry.tools() {
            tools.register_arc(tool);
        }
        tools
    }

    pub fn build(mut self) -> AgentOrchestrator {
        let registry: Arc<dyn ToolDispatcher> = Arc::new(self.build_tool_registry());
        let llm = self
            .llm
            .take()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let agent = &self.config.agent;
        let orchestrator =
            AgentOrchestrator::new(llm, registry, agent.limits(), agent.phase_timeouts());
        orchestrator.set_five_step_default(agent.enable_five_step_process);
        orchestrator.set_human_collaboration_enabled(agent.human_collaboration);
        orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CallContext;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Winrate;

    #[async_trait]
    impl Tool for Winrate {
        fn name(&self) -> &str {
            "winrate"
        }
        fn description(&self) -> &str {
            "estimated winrate"
        }
        async fn execute(&self, _params: Value, _ctx: &CallContext) -> Result<Value, String> {
            Ok(serde_json::json!({"winrate": 0.52}))
        }
    }

    #[test]
    fn test_builder_registers_builtin_and_custom_tools() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.agent.max_steps = 6;
        cfg.agent.human_collaboration = true;

        let orch = OrchestratorBuilder::new(cfg).with_tool(Winrate).build();

        let names: Vec<String> = orch.available_tools(None).into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "board_context", "winrate"]);
        assert_eq!(orch.get_stats().max_steps, 6);
        assert!(orch.human_collaboration_enabled());
    }

    #[test]
    fn test_builder_without_builtins() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        let orch = OrchestratorBuilder::new(cfg)
            .with_builtin_tools(false)
            .with_tool(Winrate)
            .build();
        assert_eq!(orch.available_tools(None).len(), 1);
    }
}
