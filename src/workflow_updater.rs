//! Reescritura de rutas de modelo dentro del workflow.
//!
//! Localiza el nodo (de primer nivel o dentro de una definición de
//! subgrafo), convierte la ruta absoluta resuelta al formato relativo que
//! espera el host y sobrescribe el valor del widget. No toca ningún otro
//! campo del documento.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::inventory::{normalize_path, PathFormatter};
use crate::matcher::bare_filename;
use crate::models::{AssetRecord, NodeId};

/// Dónde buscar el nodo a actualizar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeLocator {
    /// Sólo la lista `nodes` de primer nivel.
    TopLevel,
    /// Sólo los nodos de la definición de subgrafo indicada.
    InSubgraph(String),
    /// Primero el primer nivel (instancias de subgrafo); si no aparece, el subgrafo.
    InstanceOrSubgraph(String),
}

impl NodeLocator {
    /// Traduce la combinación de banderas de una resolución. Devuelve `None`
    /// cuando se pide buscar dentro de un subgrafo sin decir cuál.
    pub fn from_flags(subgraph_id: Option<&str>, is_top_level: Option<bool>) -> Option<Self> {
        match (is_top_level, subgraph_id) {
            (Some(false), Some(id)) => Some(Self::InSubgraph(id.to_string())),
            (Some(false), None) => None,
            (Some(true), _) => Some(Self::TopLevel),
            (None, Some(id)) => Some(Self::InstanceOrSubgraph(id.to_string())),
            (None, None) => Some(Self::TopLevel),
        }
    }
}

/// Cambio de ruta tal y como llega al actualizador. Los campos obligatorios
/// (`node_id`, `widget_index`, `resolved_path`) se validan al aplicar.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathMapping {
    pub node_id: Option<NodeId>,
    pub widget_index: Option<usize>,
    pub resolved_path: Option<String>,
    pub category: Option<String>,
    pub base_directory: Option<PathBuf>,
    pub resolved_model: Option<AssetRecord>,
    pub subgraph_id: Option<String>,
    pub is_top_level: Option<bool>,
}

/// Actualización ya validada de un único widget.
#[derive(Debug, Clone)]
pub struct PathUpdate<'a> {
    pub node_id: &'a NodeId,
    pub widget_index: usize,
    pub resolved_path: &'a str,
    pub category: Option<&'a str>,
    pub base_directory: Option<&'a Path>,
    pub resolved_model: Option<&'a AssetRecord>,
    pub locator: NodeLocator,
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// Convierte una ruta absoluta al formato relativo que usa el host.
///
/// Preferencia: el nombre literal que devuelve el host para ese fichero,
/// la ruta relativa a `base_directory` y, por último, el nombre del fichero.
/// Las rutas relativas o vacías se devuelven tal cual.
pub fn convert_to_relative_path(
    absolute_path: &str,
    category: Option<&str>,
    base_directory: Option<&Path>,
    formatter: Option<&dyn PathFormatter>,
) -> String {
    let path = Path::new(absolute_path);
    if absolute_path.is_empty() || !path.is_absolute() {
        return absolute_path.to_string();
    }
    let target = normalize_path(path);

    if let (Some(formatter), Some(category)) = (formatter, category) {
        for name in formatter.known_names(category) {
            let resolved = formatter.resolve(category, &name).map(|p| normalize_path(&p));
            if resolved.as_ref() == Some(&target) {
                return name;
            }
        }
        debug!("El host no conoce {} en la categoría {}", absolute_path, category);
    }

    if let Some(base) = base_directory {
        if let Ok(relative) = target.strip_prefix(normalize_path(base)) {
            return relative.to_string_lossy().to_string();
        }
        debug!("{} no está bajo {}", absolute_path, base.display());
    }

    bare_filename(absolute_path).to_string()
}

/// Directorio base de un modelo resuelto: el que trae el propio modelo o,
/// si no, el directorio de categoría del host que lo contiene.
pub fn base_directory_for_model(
    model: &AssetRecord,
    category: &str,
    formatter: Option<&dyn PathFormatter>,
) -> Option<PathBuf> {
    if !model.base_directory.as_os_str().is_empty() {
        return Some(model.base_directory.clone());
    }
    if model.absolute_path.as_os_str().is_empty() {
        return None;
    }
    let full = normalize_path(&model.absolute_path);
    formatter?
        .category_dirs(category)
        .into_iter()
        .find(|dir| full.starts_with(normalize_path(dir)))
}

fn top_level_contains(workflow: &Value, node_id: &NodeId) -> bool {
    workflow
        .get("nodes")
        .and_then(Value::as_array)
        .map(|nodes| nodes.iter().any(|n| n.get("id").is_some_and(|id| node_id.matches(id))))
        .unwrap_or(false)
}

/// Índices que llevan desde el documento hasta la definición de subgrafo `id`.
fn subgraph_position(container: &Value, id: &str) -> Option<Vec<usize>> {
    let subgraphs = container.get("definitions")?.get("subgraphs")?.as_array()?;
    for (idx, subgraph) in subgraphs.iter().enumerate() {
        if subgraph.get("id").and_then(Value::as_str) == Some(id) {
            return Some(vec![idx]);
        }
        if let Some(mut rest) = subgraph_position(subgraph, id) {
            rest.insert(0, idx);
            return Some(rest);
        }
    }
    None
}

fn subgraph_mut<'a>(container: &'a mut Value, id: &str) -> Option<&'a mut Value> {
    let position = subgraph_position(container, id)?;
    let mut current = container;
    for idx in position {
        current = current.get_mut("definitions")?.get_mut("subgraphs")?.get_mut(idx)?;
    }
    Some(current)
}

fn node_mut<'a>(container: &'a mut Value, node_id: &NodeId) -> Option<&'a mut Value> {
    container
        .get_mut("nodes")?
        .as_array_mut()?
        .iter_mut()
        .find(|n| n.get("id").is_some_and(|id| node_id.matches(id)))
}

fn locate_node<'a>(workflow: &'a mut Value, node_id: &NodeId, locator: &NodeLocator) -> Option<&'a mut Value> {
    let subgraph_id = match locator {
        NodeLocator::TopLevel => None,
        NodeLocator::InSubgraph(id) => Some(id),
        NodeLocator::InstanceOrSubgraph(id) => {
            if top_level_contains(workflow, node_id) {
                None
            } else {
                Some(id)
            }
        }
    };
    match subgraph_id {
        None => node_mut(workflow, node_id),
        Some(id) => node_mut(subgraph_mut(workflow, id)?, node_id),
    }
}

/// Sustituye la ruta de un widget. Devuelve `false` sin modificar nada si
/// el nodo no existe o el índice de widget está fuera de rango.
pub fn update_model_path(
    workflow: &mut Value,
    update: &PathUpdate<'_>,
    formatter: Option<&dyn PathFormatter>,
) -> bool {
    let Some(node) = locate_node(workflow, update.node_id, &update.locator) else {
        let location = match &update.locator {
            NodeLocator::TopLevel => "top-level".to_string(),
            NodeLocator::InSubgraph(id) | NodeLocator::InstanceOrSubgraph(id) => format!("subgrafo {id}"),
        };
        warn!("Nodo {} no encontrado en {}", update.node_id, location);
        return false;
    };

    let Some(widgets) = node.get_mut("widgets_values").and_then(Value::as_array_mut) else {
        warn!("Widget {} fuera de rango para el nodo {}", update.widget_index, update.node_id);
        return false;
    };
    if update.widget_index >= widgets.len() {
        warn!("Widget {} fuera de rango para el nodo {}", update.widget_index, update.node_id);
        return false;
    }

    // La categoría del modelo resuelto manda sobre la de la referencia original.
    let category = update
        .resolved_model
        .and_then(|m| non_empty(&m.category))
        .or(update.category);

    let relative_path = if Path::new(update.resolved_path).is_absolute() {
        convert_to_relative_path(update.resolved_path, category, update.base_directory, formatter)
    } else {
        update.resolved_path.to_string()
    };

    debug!("Nodo {}, widget {} -> {}", update.node_id, update.widget_index, relative_path);
    widgets[update.widget_index] = Value::String(relative_path);
    true
}

/// Aplica todos los cambios válidos y devuelve el mismo documento.
/// Los cambios incompletos o que no se pueden aplicar se registran y se omiten.
pub fn update_workflow_nodes(
    mut workflow: Value,
    mappings: &[PathMapping],
    formatter: Option<&dyn PathFormatter>,
) -> Value {
    let mut updated = 0;

    for mapping in mappings {
        let (Some(node_id), Some(widget_index), Some(resolved_path)) = (
            mapping.node_id.as_ref(),
            mapping.widget_index,
            mapping.resolved_path.as_deref().and_then(non_empty),
        ) else {
            warn!("Cambio inválido, se omite: {:?}", mapping);
            continue;
        };

        let Some(locator) = NodeLocator::from_flags(mapping.subgraph_id.as_deref(), mapping.is_top_level) else {
            warn!("Nodo {} marcado dentro de un subgrafo sin subgraph_id, se omite", node_id);
            continue;
        };

        let base_directory = mapping.base_directory.clone().or_else(|| {
            let model = mapping.resolved_model.as_ref()?;
            let category = mapping.category.as_deref().unwrap_or(&model.category);
            base_directory_for_model(model, category, formatter)
        });

        let update = PathUpdate {
            node_id,
            widget_index,
            resolved_path,
            category: mapping.category.as_deref(),
            base_directory: base_directory.as_deref(),
            resolved_model: mapping.resolved_model.as_ref(),
            locator,
        };

        if update_model_path(&mut workflow, &update, formatter) {
            updated += 1;
        }
    }

    info!("Actualizadas {} de {} rutas de modelo en el workflow", updated, mappings.len());
    workflow
}
