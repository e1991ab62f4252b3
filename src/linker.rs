//! Orquestación completa: análisis del workflow, cruce con el inventario,
//! búsqueda de candidatos y aplicación de las resoluciones aprobadas.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;
use tracing::info;

use crate::inventory::{normalize_path, AssetInventory, CachedFormatter, PathFormatter};
use crate::matcher::find_matches;
use crate::models::{AnalysisReport, AssetRecord, Match, MissingModel, Resolution, UNKNOWN_CATEGORY};
use crate::workflow_analyzer::{analyze_workflow_models, identify_missing_models, resolve_category};
use crate::workflow_updater::{update_workflow_nodes, PathMapping};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.0;
pub const DEFAULT_MAX_MATCHES: usize = 10;

/// Parámetros de un análisis.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub similarity_threshold: f64,
    pub max_matches_per_model: usize,
    pub model_extensions: Vec<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_matches_per_model: DEFAULT_MAX_MATCHES,
            model_extensions: crate::workflow_analyzer::DEFAULT_MODEL_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// Candidatos de la misma categoría primero y el resto a continuación,
/// conservando el orden relativo de cada grupo.
fn prioritized_candidates<'a>(assets: &'a [AssetRecord], category: &str) -> Vec<&'a AssetRecord> {
    if category == UNKNOWN_CATEGORY {
        return assets.iter().collect();
    }
    let (mut same, other): (Vec<_>, Vec<_>) = assets.iter().partition(|a| a.category == category);
    same.extend(other);
    same
}

/// Un mismo fichero físico sólo aparece una vez; se queda la coincidencia
/// de mayor confianza en la posición de la primera aparición.
pub fn deduplicate_matches(matches: Vec<Match>) -> Vec<Match> {
    let mut seen: HashMap<PathBuf, usize> = HashMap::new();
    let mut out: Vec<Match> = Vec::with_capacity(matches.len());
    for m in matches {
        let key = normalize_path(&m.model.absolute_path);
        match seen.get(&key) {
            Some(&idx) => {
                if m.confidence > out[idx].confidence {
                    out[idx] = m;
                }
            }
            None => {
                seen.insert(key, out.len());
                out.push(m);
            }
        }
    }
    out
}

/// Analiza el workflow y propone candidatos para cada modelo perdido.
pub fn analyze_and_find_matches(
    workflow: &Value,
    inventory: &dyn AssetInventory,
    options: &AnalysisOptions,
) -> Result<AnalysisReport> {
    let all_refs = analyze_workflow_models(workflow, &options.model_extensions)?;
    let assets = inventory.list_assets()?;
    let missing = identify_missing_models(&all_refs, &assets);

    let missing_models: Vec<MissingModel> = missing
        .into_iter()
        .map(|reference| {
            let category = resolve_category(Some(&reference.category), &reference.node_type);
            let candidates = prioritized_candidates(&assets, &category);
            let matches = find_matches(
                &reference.original_path,
                candidates,
                options.similarity_threshold,
                options.max_matches_per_model,
            );
            MissingModel {
                reference,
                matches: deduplicate_matches(matches),
            }
        })
        .collect();

    info!(
        "Análisis: {} referencias, {} perdidas, {} modelos en inventario",
        all_refs.len(),
        missing_models.len(),
        assets.len()
    );

    Ok(AnalysisReport {
        total_missing: missing_models.len(),
        total_models_analyzed: all_refs.len(),
        missing_models,
    })
}

/// Igual que `analyze_and_find_matches` con los parámetros por defecto.
pub fn get_resolution_summary(workflow: &Value, inventory: &dyn AssetInventory) -> Result<AnalysisReport> {
    analyze_and_find_matches(workflow, inventory, &AnalysisOptions::default())
}

fn to_mapping(resolution: &Resolution) -> PathMapping {
    let model = resolution.resolved_model.as_ref();
    let resolved_path = resolution
        .resolved_path
        .clone()
        .filter(|p| !p.is_empty())
        .or_else(|| {
            model
                .filter(|m| !m.absolute_path.as_os_str().is_empty())
                .map(|m| m.absolute_path.to_string_lossy().to_string())
        });
    let base_directory = model
        .filter(|m| !m.base_directory.as_os_str().is_empty())
        .map(|m| m.base_directory.clone());

    PathMapping {
        node_id: resolution.node_id.clone(),
        widget_index: resolution.widget_index,
        resolved_path,
        category: resolution.category.clone(),
        base_directory,
        resolved_model: resolution.resolved_model.clone(),
        subgraph_id: resolution.subgraph_id.clone(),
        is_top_level: resolution.is_top_level,
    }
}

/// Aplica las resoluciones aprobadas y devuelve el workflow modificado.
pub fn apply_resolution(
    workflow: Value,
    resolutions: &[Resolution],
    formatter: Option<&dyn PathFormatter>,
) -> Value {
    let mappings: Vec<PathMapping> = resolutions.iter().map(to_mapping).collect();
    let cached = formatter.map(CachedFormatter::new);
    update_workflow_nodes(workflow, &mappings, cached.as_ref().map(|c| c as &dyn PathFormatter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeId;
    use serde_json::json;

    struct StaticInventory(Vec<AssetRecord>);

    impl AssetInventory for StaticInventory {
        fn list_assets(&self) -> Result<Vec<AssetRecord>> {
            Ok(self.0.clone())
        }
    }

    fn asset(category: &str, relative: &str) -> AssetRecord {
        let base = PathBuf::from("/models").join(category);
        AssetRecord {
            filename: crate::matcher::bare_filename(relative).to_string(),
            absolute_path: base.join(relative),
            relative_path: relative.to_string(),
            category: category.to_string(),
            base_directory: base,
        }
    }

    fn single_node(node_type: &str, path: &str) -> Value {
        json!({"nodes": [{"id": 1, "type": node_type, "widgets_values": [path]}]})
    }

    #[test]
    fn reports_closest_inexact_match() {
        let inventory = StaticInventory(vec![
            asset("checkpoints", "old_model_v2.safetensors"),
            asset("checkpoints", "unrelated.safetensors"),
        ]);
        let report = get_resolution_summary(&single_node("CheckpointLoaderSimple", "old_model_v1.safetensors"), &inventory)
            .unwrap();
        assert_eq!(report.total_missing, 1);
        assert_eq!(report.total_models_analyzed, 1);
        let top = &report.missing_models[0].matches[0];
        assert_eq!(top.filename, "old_model_v2.safetensors");
        assert!(top.confidence < 100.0);
    }

    #[test]
    fn normalized_name_match_is_full_confidence() {
        let inventory = StaticInventory(vec![asset("checkpoints", "Model_A.ckpt")]);
        let report = get_resolution_summary(&single_node("CheckpointLoaderSimple", "model-a.ckpt"), &inventory).unwrap();
        assert_eq!(report.missing_models[0].matches[0].confidence, 100.0);
    }

    #[test]
    fn present_models_are_not_reported() {
        let inventory = StaticInventory(vec![asset("loras", "sub/style.safetensors")]);
        let report = get_resolution_summary(&single_node("LoraLoader", r"sub\style.safetensors"), &inventory).unwrap();
        assert_eq!(report.total_missing, 0);
        assert_eq!(report.total_models_analyzed, 1);
    }

    #[test]
    fn same_category_candidates_come_first() {
        let assets = vec![asset("vae", "a.pt"), asset("loras", "b.pt"), asset("vae", "c.pt")];
        let pool: Vec<&str> = prioritized_candidates(&assets, "loras").iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(pool, vec!["b.pt", "a.pt", "c.pt"]);
        assert_eq!(prioritized_candidates(&assets, UNKNOWN_CATEGORY).len(), 3);
    }

    #[test]
    fn duplicate_physical_files_keep_best_confidence() {
        let first = asset("loras", "x.safetensors");
        let mut alias = first.clone();
        alias.absolute_path = PathBuf::from("/models/loras/./x.safetensors");
        alias.filename = "x_alias.safetensors".into();
        let other = asset("loras", "y.safetensors");
        let matches = vec![
            Match { model: other.clone(), filename: "y.safetensors".into(), similarity: 0.9, confidence: 90.0 },
            Match { model: alias, filename: "x_alias.safetensors".into(), similarity: 0.5, confidence: 50.0 },
            Match { model: first, filename: "x.safetensors".into(), similarity: 0.8, confidence: 80.0 },
        ];
        let deduped = deduplicate_matches(matches);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].filename, "y.safetensors");
        assert_eq!(deduped[1].filename, "x.safetensors");
        assert_eq!(deduped[1].confidence, 80.0);
    }

    #[test]
    fn analysis_deduplicates_across_pools() {
        let base = asset("loras", "style_v1.safetensors");
        let mut twin = base.clone();
        twin.filename = "style_v1_copy.safetensors".into();
        let inventory = StaticInventory(vec![twin, base]);
        let report = get_resolution_summary(&single_node("LoraLoader", "style_v2.safetensors"), &inventory).unwrap();
        let matches = &report.missing_models[0].matches;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].filename, "style_v1.safetensors");
    }

    #[test]
    fn malformed_workflow_is_an_error() {
        let inventory = StaticInventory(Vec::new());
        assert!(get_resolution_summary(&json!({"nodes": 3}), &inventory).is_err());
    }

    #[test]
    fn resolution_takes_path_and_base_from_model() {
        let model = asset("loras", "sub/style.safetensors");
        let resolution = Resolution {
            node_id: Some(NodeId::Int(1)),
            widget_index: Some(0),
            resolved_model: Some(model),
            ..Default::default()
        };
        let wf = apply_resolution(single_node("LoraLoader", "gone.safetensors"), &[resolution], None);
        assert_eq!(
            wf["nodes"][0]["widgets_values"][0],
            json!(std::path::Path::new("sub").join("style.safetensors").to_string_lossy())
        );
    }

    #[test]
    fn explicit_resolved_path_is_kept() {
        let resolution = Resolution {
            node_id: Some(NodeId::Int(1)),
            widget_index: Some(0),
            resolved_path: Some("already/relative.safetensors".into()),
            resolved_model: Some(asset("loras", "other.safetensors")),
            ..Default::default()
        };
        let wf = apply_resolution(single_node("LoraLoader", "gone.safetensors"), &[resolution], None);
        assert_eq!(wf["nodes"][0]["widgets_values"][0], json!("already/relative.safetensors"));
    }

    #[test]
    fn batch_queries_host_listing_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingHost(AtomicUsize);

        impl PathFormatter for CountingHost {
            fn known_names(&self, _category: &str) -> Vec<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                vec!["host/name.safetensors".into()]
            }

            fn resolve(&self, _category: &str, _name: &str) -> Option<PathBuf> {
                Some(PathBuf::from("/models/loras/host/name.safetensors"))
            }
        }

        let workflow = json!({"nodes": [
            {"id": 1, "type": "LoraLoader", "widgets_values": ["a.safetensors"]},
            {"id": 2, "type": "LoraLoader", "widgets_values": ["b.safetensors"]}
        ]});
        let resolutions: Vec<Resolution> = (1..=2)
            .map(|id| Resolution {
                node_id: Some(NodeId::Int(id)),
                widget_index: Some(0),
                resolved_path: Some("/models/loras/host/name.safetensors".into()),
                category: Some("loras".into()),
                ..Default::default()
            })
            .collect();
        let host = CountingHost(AtomicUsize::new(0));
        let wf = apply_resolution(workflow, &resolutions, Some(&host));
        assert_eq!(wf["nodes"][0]["widgets_values"][0], json!("host/name.safetensors"));
        assert_eq!(wf["nodes"][1]["widgets_values"][0], json!("host/name.safetensors"));
        assert_eq!(host.0.load(Ordering::SeqCst), 1);
    }
}
