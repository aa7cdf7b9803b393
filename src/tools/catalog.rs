//! 工具目录：按类型过滤、分组，生成 prompt 用 JSON 与人类可读列表

use serde_json::Value;

use crate::tools::{ToolDescriptor, ToolDispatcher, ToolType};

/// 某一时刻注册表的只读快照（保持注册顺序）
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    pub fn from_dispatcher(dispatcher: &dyn ToolDispatcher) -> Self {
        Self::new(dispatcher.list_tools())
    }

    pub fn find(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// 可用工具；指定类型时只返回该类型
    pub fn available(&self, filter: Option<ToolType>) -> Vec<&ToolDescriptor> {
        self.tools
            .iter()
            .filter(|t| filter.map_or(true, |f| t.tool_type == f))
            .collect()
    }

    /// 按 ToolType::ALL 顺序分组，省略空组
    pub fn grouped(&self) -> Vec<(ToolType, Vec<&ToolDescriptor>)> {
        ToolType::ALL
            .iter()
            .map(|ty| (*ty, self.available(Some(*ty))))
            .filter(|(_, tools)| !tools.is_empty())
            .collect()
    }

    /// prompt 中使用的分组 JSON：{"info_retrieval": [...], ...}
    pub fn grouped_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (ty, tools) in self.grouped() {
            let entries: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            map.insert(ty.as_str().to_string(), Value::Array(entries));
        }
        Value::Object(map)
    }

    pub fn format_list(&self, detailed: bool) -> String {
        let mut out = String::new();
        for (ty, tools) in self.grouped() {
            out.push_str(&format!("\n{} ({}个):\n", ty.display_name(), tools.len()));
            let lines: Vec<String> = tools
                .iter()
                .map(|t| {
                    if detailed {
                        describe(t)
                    } else {
                        format!("  - {}: {}", t.name, t.description)
                    }
                })
                .collect();
            out.push_str(&lines.join("\n"));
            out.push('\n');
        }
        out
    }

    pub fn details(&self, name: &str) -> Option<String> {
        self.find(name).map(describe)
    }
}

fn describe(tool: &ToolDescriptor) -> String {
    let params = format_parameters(&tool.parameters);
    format!(
        "  - 工具名称: {}\n    类型: {}\n    描述: {}\n    参数要求: {}",
        tool.name,
        tool.tool_type.display_name(),
        tool.description,
        if params.is_empty() { "无".to_string() } else { params }
    )
}

/// 「必填参数: a, b; 可选参数: x (number) - 说明 [默认: 5]」
pub fn format_parameters(parameters: &Value) -> String {
    let mut parts = Vec::new();

    if let Some(required) = parameters.get("required").and_then(Value::as_array) {
        let names: Vec<&str> = required.iter().filter_map(Value::as_str).collect();
        if !names.is_empty() {
            parts.push(format!("必填参数: {}", names.join(", ")));
        }
    }

    if let Some(props) = parameters.get("properties").and_then(Value::as_object) {
        let descs: Vec<String> = props
            .iter()
            .map(|(name, p)| {
                let mut d = name.clone();
                if let Some(ty) = p.get("type").and_then(Value::as_str) {
                    d.push_str(&format!(" ({})", ty));
                }
                if let Some(desc) = p.get("description").and_then(Value::as_str) {
                    d.push_str(&format!(" - {}", desc));
                }
                if let Some(default) = p.get("default") {
                    d.push_str(&format!(" [默认: {}]", default));
                }
                d
            })
            .collect();
        if !descs.is_empty() {
            parts.push(format!("可选参数: {}", descs.join(", ")));
        }
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{BoardContextTool, EchoTool, ToolRegistry};

    fn catalog() -> ToolCatalog {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(BoardContextTool);
        ToolCatalog::from_dispatcher(&registry)
    }

    #[test]
    fn test_grouped_follows_type_order_and_skips_empty() {
        let catalog = catalog();
        let groups: Vec<ToolType> = catalog.grouped().into_iter().map(|(t, _)| t).collect();
        assert_eq!(groups, vec![ToolType::InfoRetrieval, ToolType::Execution]);

        let json = catalog.grouped_json();
        assert_eq!(json["info_retrieval"][0]["name"], "board_context");
        assert!(json.get("system_integration").is_none());
    }

    #[test]
    fn test_details_lists_defaults() {
        let text = catalog().details("echo").unwrap();
        assert!(text.contains("工具名称: echo"));
        assert!(text.contains("[默认: \"(empty)\"]"));
        assert!(catalog().details("nope").is_none());
    }

    #[test]
    fn test_format_parameters_required() {
        let params = serde_json::json!({
            "required": ["vertex"],
            "properties": {"vertex": {"type": "string"}}
        });
        assert_eq!(
            format_parameters(&params),
            "必填参数: vertex; 可选参数: vertex (string)"
        );
    }
}
