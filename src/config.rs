//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `GOBAN__*` 覆盖（双下划线表示嵌套，如 `GOBAN__AGENT__MAX_STEPS=10`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{LoopLimits, PhaseTimeouts};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
}

/// [agent] 段：循环预算、单阶段超时与协作模式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: u32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub think_timeout_ms: u64,
    pub act_timeout_ms: u64,
    pub observe_timeout_ms: u64,
    /// run 默认是否走五步流程
    pub enable_five_step_process: bool,
    pub human_collaboration: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        let limits = LoopLimits::default();
        let timeouts = PhaseTimeouts::default();
        Self {
            max_steps: limits.max_steps,
            timeout_ms: limits.timeout_ms,
            max_retries: limits.max_retries,
            think_timeout_ms: timeouts.think.as_millis() as u64,
            act_timeout_ms: timeouts.act.as_millis() as u64,
            observe_timeout_ms: timeouts.observe.as_millis() as u64,
            enable_five_step_process: false,
            human_collaboration: false,
        }
    }
}

impl AgentSection {
    pub fn limits(&self) -> LoopLimits {
        LoopLimits {
            max_steps: self.max_steps,
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
        }
    }

    pub fn phase_timeouts(&self) -> PhaseTimeouts {
        PhaseTimeouts {
            think: Duration::from_millis(self.think_timeout_ms),
            act: Duration::from_millis(self.act_timeout_ms),
            observe: Duration::from_millis(self.observe_timeout_ms),
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 GOBAN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 GOBAN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("GOBAN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_loop_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.limits(), LoopLimits::default());
        assert_eq!(cfg.agent.phase_timeouts(), PhaseTimeouts::default());
        assert_eq!(cfg.llm.provider, "deepseek");
        assert!(!cfg.agent.enable_five_step_process);
    }

    #[test]
    fn test_explicit_file_overrides_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[agent]\nmax_steps = 7\nthink_timeout_ms = 1500\nhuman_collaboration = true\n\n[llm]\nprovider = \"mock\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(cfg.agent.max_steps, 7);
        assert_eq!(cfg.agent.max_retries, 3);
        assert_eq!(cfg.agent.phase_timeouts().think, Duration::from_millis(1500));
        assert!(cfg.agent.human_collaboration);
        assert_eq!(cfg.llm.provider, "mock");
    }
}
