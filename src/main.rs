//! Goban Agent 命令行入口
//!
//! 结果以格式化 JSON 打印到 stdout，日志写到 stderr。

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use goban_agent::config::{load_config, AppConfig};
use goban_agent::{OrchestratorBuilder, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "goban-agent")]
#[command(about = "围棋助手智能体：有界推理循环与五步人机协作流程", long_about = None)]
struct Cli {
    /// 走五步流程，返回待确认的计划
    #[arg(long)]
    five_step: bool,

    /// 打印详细的工具目录
    #[arg(long)]
    tools: bool,

    /// 额外的 TOML 配置文件（覆盖 config/default.toml）
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 用户消息（多个词以空格拼接）
    message: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    goban_agent::observability::init();

    let cli = Cli::parse();
    let message = cli.message.join(" ");
    if message.is_empty() && !cli.tools {
        bail!("a message is required unless --tools is given");
    }

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let orchestrator = OrchestratorBuilder::new(cfg).build();

    if cli.tools {
        println!("{}", orchestrator.format_tools_list(true));
        if message.is_empty() {
            return Ok(());
        }
    }

    let options = RunOptions {
        enable_five_step_process: cli.five_step.then_some(true),
        ..RunOptions::default()
    };
    let outcome = orchestrator
        .run(&message, serde_json::Value::Null, options)
        .await;
    let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags_and_message() {
        let cli = Cli::try_parse_from([
            "goban-agent",
            "--five-step",
            "--config",
            "local.toml",
            "best",
            "move?",
        ])
        .unwrap();
        assert!(cli.five_step);
        assert!(!cli.tools);
        assert_eq!(cli.config, Some(PathBuf::from("local.toml")));
        assert_eq!(cli.message.join(" "), "best move?");
    }

    #[test]
    fn test_cli_tools_without_message() {
        let cli = Cli::try_parse_from(["goban-agent", "--tools"]).unwrap();
        assert!(cli.tools);
        assert!(cli.message.is_empty());
    }
}
