//! Workflow Templates - 工作流模板
//!
//! 模板只读共享，每个任务先深拷贝再修改节点字段。

use serde_json::{json, Value};
use thiserror::Error;

const COMFYUI_KONTEXT_TEMPLATE: &str =
    include_str!("../../assets/workflows/comfyui_flux_kontext.json");
const INVOKEAI_KONTEXT_TEMPLATE: &str =
    include_str!("../../assets/workflows/invokeai_flux_kontext.json");

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid workflow template: {0}")]
    InvalidTemplate(String),

    #[error("Workflow node not found: {0}")]
    NodeNotFound(String),

    #[error("Workflow field not found: {node}.{field}")]
    FieldNotFound { node: String, field: String },
}

/// ComfyUI 节点图（API 格式，节点 id -> {inputs, class_type}）
#[derive(Debug, Clone)]
pub struct ComfyWorkflow {
    graph: Value,
}

impl ComfyWorkflow {
    pub fn from_json(raw: &str) -> Result<Self, WorkflowError> {
        let graph: Value =
            serde_json::from_str(raw).map_err(|e| WorkflowError::InvalidTemplate(e.to_string()))?;
        if !graph.is_object() {
            return Err(WorkflowError::InvalidTemplate(
                "top level must be an object".to_string(),
            ));
        }
        Ok(Self { graph })
    }

    /// 内置的 Flux Kontext NIM 工作流
    pub fn flux_kontext() -> Result<Self, WorkflowError> {
        Self::from_json(COMFYUI_KONTEXT_TEMPLATE)
    }

    /// 基于模板生成一份已填入参数的副本
    pub fn patch(&self, image_name: &str, prompt: &str, steps: u32) -> Result<Value, WorkflowError> {
        let mut graph = self.graph.clone();

        set_input(&mut graph, "LoadImage", "image", json!(image_name))?;
        set_input(&mut graph, "NIMFLUXNode", "prompt", json!(prompt))?;
        set_input(&mut graph, "NIMFLUXNode", "steps", json!(steps))?;

        Ok(graph)
    }
}

fn set_input(graph: &mut Value, class_type: &str, field: &str, value: Value) -> Result<(), WorkflowError> {
    let nodes = graph
        .as_object_mut()
        .ok_or_else(|| WorkflowError::InvalidTemplate("graph is not an object".to_string()))?;

    let node = nodes
        .values_mut()
        .find(|node| node.get("class_type").and_then(Value::as_str) == Some(class_type))
        .ok_or_else(|| WorkflowError::NodeNotFound(class_type.to_string()))?;

    let slot = node
        .get_mut("inputs")
        .and_then(|inputs| inputs.get_mut(field))
        .ok_or_else(|| WorkflowError::FieldNotFound {
            node: class_type.to_string(),
            field: field.to_string(),
        })?;
    *slot = value;
    Ok(())
}

/// InvokeAI enqueue_batch 请求体
#[derive(Debug, Clone)]
pub struct InvokeBatch {
    batch: Value,
}

impl InvokeBatch {
    pub fn from_json(raw: &str) -> Result<Self, WorkflowError> {
        let batch: Value =
            serde_json::from_str(raw).map_err(|e| WorkflowError::InvalidTemplate(e.to_string()))?;
        if batch.pointer("/batch/graph/nodes").map_or(true, |n| !n.is_object()) {
            return Err(WorkflowError::InvalidTemplate(
                "missing batch.graph.nodes".to_string(),
            ));
        }
        Ok(Self { batch })
    }

    pub fn flux_kontext() -> Result<Self, WorkflowError> {
        Self::from_json(INVOKEAI_KONTEXT_TEMPLATE)
    }

    /// 填入提示词、参考图名与步数
    pub fn patch(&self, image_name: &str, prompt: &str, steps: u32) -> Result<Value, WorkflowError> {
        let mut batch = self.batch.clone();
        let nodes = batch
            .pointer_mut("/batch/graph/nodes")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| WorkflowError::InvalidTemplate("missing batch.graph.nodes".to_string()))?;

        let prompt_node = find_node(nodes, |id, _| id.starts_with("positive_prompt:"), "positive_prompt")?;
        set_field(prompt_node, "positive_prompt", "/value", json!(prompt))?;

        let kontext_node = find_node(nodes, |_, node| node_type(node) == Some("flux_kontext"), "flux_kontext")?;
        set_field(kontext_node, "flux_kontext", "/image/image_name", json!(image_name))?;

        let denoise_node = find_node(nodes, |_, node| node_type(node) == Some("flux_denoise"), "flux_denoise")?;
        set_field(denoise_node, "flux_denoise", "/num_steps", json!(steps))?;

        Ok(batch)
    }
}

fn node_type(node: &Value) -> Option<&str> {
    node.get("type").and_then(Value::as_str)
}

fn find_node<'a, F>(
    nodes: &'a mut serde_json::Map<String, Value>,
    predicate: F,
    label: &str,
) -> Result<&'a mut Value, WorkflowError>
where
    F: Fn(&str, &Value) -> bool,
{
    nodes
        .iter_mut()
        .find(|(id, node)| predicate(id, node))
        .map(|(_, node)| node)
        .ok_or_else(|| WorkflowError::NodeNotFound(label.to_string()))
}

fn set_field(node: &mut Value, label: &str, pointer: &str, value: Value) -> Result<(), WorkflowError> {
    let slot = node.pointer_mut(pointer).ok_or_else(|| WorkflowError::FieldNotFound {
        node: label.to_string(),
        field: pointer.trim_start_matches('/').replace('/', "."),
    })?;
    *slot = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comfy_node<'a>(graph: &'a Value, class_type: &str) -> &'a Value {
        graph
            .as_object()
            .unwrap()
            .values()
            .find(|n| n["class_type"] == class_type)
            .unwrap()
    }

    #[test]
    fn test_comfy_patch_sets_three_fields() {
        let template = ComfyWorkflow::flux_kontext().unwrap();
        let patched = template.patch("shot_0001.png", "make it snowy", 28).unwrap();

        assert_eq!(comfy_node(&patched, "LoadImage")["inputs"]["image"], "shot_0001.png");
        assert_eq!(comfy_node(&patched, "NIMFLUXNode")["inputs"]["prompt"], "make it snowy");
        assert_eq!(comfy_node(&patched, "NIMFLUXNode")["inputs"]["steps"], 28);
    }

    #[test]
    fn test_comfy_patch_does_not_touch_template() {
        let template = ComfyWorkflow::flux_kontext().unwrap();
        let _ = template.patch("a.png", "first", 20).unwrap();
        let second = template.patch("b.png", "second", 30).unwrap();

        assert_eq!(comfy_node(&second, "LoadImage")["inputs"]["image"], "b.png");
        assert_ne!(comfy_node(&template.graph, "NIMFLUXNode")["inputs"]["prompt"], "first");
    }

    #[test]
    fn test_comfy_patch_missing_node() {
        let template = ComfyWorkflow::from_json(
            r#"{"1": {"inputs": {"image": "x"}, "class_type": "LoadImage"}}"#,
        )
        .unwrap();
        let err = template.patch("a.png", "p", 20).unwrap_err();
        assert!(matches!(err, WorkflowError::NodeNotFound(ref n) if n == "NIMFLUXNode"));
    }

    #[test]
    fn test_comfy_patch_missing_field() {
        let template = ComfyWorkflow::from_json(
            r#"{"1": {"inputs": {}, "class_type": "LoadImage"}}"#,
        )
        .unwrap();
        assert!(matches!(
            template.patch("a.png", "p", 20),
            Err(WorkflowError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_invoke_patch() {
        let template = InvokeBatch::flux_kontext().unwrap();
        let patched = template.patch("upload-123.png", "studio ghibli", 42).unwrap();
        let nodes = &patched["batch"]["graph"]["nodes"];

        assert_eq!(nodes["positive_prompt:0oQdkhpu9K"]["value"], "studio ghibli");
        assert_eq!(nodes["flux_kontext:MsQ9ynwazR"]["image"]["image_name"], "upload-123.png");
        assert_eq!(nodes["flux_denoise:9SHZg1d4kC"]["num_steps"], 42);
        assert_eq!(patched["queue_id"], "default");
    }

    #[test]
    fn test_invoke_rejects_malformed_template() {
        assert!(InvokeBatch::from_json(r#"{"batch": {}}"#).is_err());
        assert!(InvokeBatch::from_json("not json").is_err());
    }
}
