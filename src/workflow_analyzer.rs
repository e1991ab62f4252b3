//! Extracción de referencias a modelos dentro de un workflow.
//!
//! Recorre los nodos de primer nivel y, después, los nodos de cada
//! definición de subgrafo (a cualquier profundidad de anidamiento),
//! emitiendo una `AssetReference` por cada widget que contiene una ruta
//! de modelo.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::inventory::normalize_path;
use crate::matcher::bare_filename;
use crate::models::{AssetRecord, AssetReference, NodeId, UNKNOWN_CATEGORY};

/// Extensiones que se consideran ficheros de modelo si no se configuran otras.
pub const DEFAULT_MODEL_EXTENSIONS: &[&str] =
    &["safetensors", "ckpt", "pt", "pth", "bin", "gguf", "sft", "onnx"];

/// Categoría sugerida para los tipos de nodo cargadores más comunes.
pub fn category_hint(node_type: &str) -> Option<&'static str> {
    let category = match node_type {
        "CheckpointLoaderSimple" | "CheckpointLoader" | "ImageOnlyCheckpointLoader"
        | "unCLIPCheckpointLoader" => "checkpoints",
        "LoraLoader" | "LoraLoaderModelOnly" => "loras",
        "VAELoader" => "vae",
        "ControlNetLoader" | "DiffControlNetLoader" => "controlnet",
        "CLIPLoader" | "DualCLIPLoader" | "TripleCLIPLoader" | "CLIPLoaderGGUF"
        | "DualCLIPLoaderGGUF" => "text_encoders",
        "CLIPVisionLoader" => "clip_vision",
        "UNETLoader" | "UnetLoaderGGUF" => "diffusion_models",
        "UpscaleModelLoader" => "upscale_models",
        "StyleModelLoader" => "style_models",
        "GLIGENLoader" => "gligen",
        "HypernetworkLoader" => "hypernetworks",
        "PhotoMakerLoader" => "photomaker",
        "IPAdapterModelLoader" => "ipadapter",
        _ => return None,
    };
    Some(category)
}

/// Categoría efectiva: la declarada si es útil, si no la pista por tipo de nodo.
pub fn resolve_category(declared: Option<&str>, node_type: &str) -> String {
    match declared {
        Some(c) if !c.is_empty() && c != UNKNOWN_CATEGORY => c.to_string(),
        _ => category_hint(node_type).unwrap_or(UNKNOWN_CATEGORY).to_string(),
    }
}

/// ¿Parece este valor de widget una ruta a un fichero de modelo?
pub fn is_model_path(value: &str, extensions: &[String]) -> bool {
    let value = value.trim();
    if value.is_empty() || value.starts_with("http://") || value.starts_with("https://") {
        return false;
    }
    Path::new(bare_filename(value))
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Definiciones de subgrafo en orden de documento, incluidas las anidadas
/// dentro de otros subgrafos.
pub fn collect_subgraphs(container: &Value) -> Vec<&Value> {
    let mut out = Vec::new();
    push_subgraphs(container, &mut out);
    out
}

fn push_subgraphs<'a>(container: &'a Value, out: &mut Vec<&'a Value>) {
    let Some(subgraphs) = container
        .get("definitions")
        .and_then(|d| d.get("subgraphs"))
        .and_then(Value::as_array)
    else {
        return;
    };
    for subgraph in subgraphs {
        out.push(subgraph);
        push_subgraphs(subgraph, out);
    }
}

/// Directorio declarado en `properties.models` para un fichero concreto.
fn declared_category<'a>(node: &'a Value, filename: &str) -> Option<&'a str> {
    node.get("properties")?
        .get("models")?
        .as_array()?
        .iter()
        .find(|m| m.get("name").and_then(Value::as_str) == Some(filename))?
        .get("directory")?
        .as_str()
}

fn scan_node(
    node: &Value,
    subgraph_id: Option<&str>,
    is_top_level: bool,
    extensions: &[String],
    out: &mut Vec<AssetReference>,
) {
    let Some(node_id) = node.get("id").and_then(NodeId::from_value) else {
        warn!("Nodo sin id válido, se ignora: {}", node.get("type").unwrap_or(&serde_json::Value::Null));
        return;
    };
    let node_type = node.get("type").and_then(Value::as_str).unwrap_or_default();
    let Some(widgets) = node.get("widgets_values").and_then(Value::as_array) else {
        return;
    };

    for (widget_index, value) in widgets.iter().enumerate() {
        let Some(path) = value.as_str() else { continue };
        if !is_model_path(path, extensions) {
            continue;
        }
        let category = resolve_category(declared_category(node, bare_filename(path)), node_type);
        out.push(AssetReference {
            node_id: node_id.clone(),
            node_type: node_type.to_string(),
            widget_index,
            original_path: path.to_string(),
            category,
            subgraph_id: subgraph_id.map(str::to_string),
            is_top_level,
        });
    }
}

/// Enumera todas las referencias a modelos del workflow.
///
/// Orden: nodos de primer nivel y luego subgrafos en orden de documento.
/// Falla si el documento no es un objeto con una lista `nodes`.
pub fn analyze_workflow_models(workflow: &Value, extensions: &[String]) -> Result<Vec<AssetReference>> {
    let nodes = workflow
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("El workflow no contiene una lista 'nodes'"))?;

    let subgraphs = collect_subgraphs(workflow);
    let subgraph_ids: HashSet<&str> = subgraphs
        .iter()
        .filter_map(|s| s.get("id").and_then(Value::as_str))
        .collect();

    let mut refs = Vec::new();
    for node in nodes {
        // Un nodo de primer nivel cuyo tipo es el id de un subgrafo es una instancia de ese subgrafo.
        let instance_of = node
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| subgraph_ids.contains(t));
        scan_node(node, instance_of, true, extensions, &mut refs);
    }

    for subgraph in subgraphs {
        let Some(id) = subgraph.get("id").and_then(Value::as_str) else {
            warn!("Definición de subgrafo sin id, se ignora");
            continue;
        };
        let Some(inner) = subgraph.get("nodes").and_then(Value::as_array) else {
            continue;
        };
        for node in inner {
            scan_node(node, Some(id), false, extensions, &mut refs);
        }
    }

    debug!("Encontradas {} referencias a modelos en el workflow", refs.len());
    Ok(refs)
}

fn unify_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Devuelve las referencias cuya ruta no corresponde a ningún modelo del inventario.
pub fn identify_missing_models(refs: &[AssetReference], assets: &[AssetRecord]) -> Vec<AssetReference> {
    let relative: HashSet<String> = assets.iter().map(|a| unify_separators(&a.relative_path)).collect();
    let absolute: HashSet<_> = assets.iter().map(|a| normalize_path(&a.absolute_path)).collect();

    refs.iter()
        .filter(|r| {
            let path = Path::new(&r.original_path);
            let present = relative.contains(&unify_separators(&r.original_path))
                || (path.is_absolute() && absolute.contains(&normalize_path(path)));
            !present
        })
        .cloned()
        .collect()
}
