//! Modelos de dominio: ficheros de modelo del inventario, referencias dentro
//! del workflow y resultados del análisis de modelos perdidos.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Categoría usada cuando no se declara ni se puede inferir ninguna.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Representa un fichero de modelo descubierto en el inventario.
/// Su identidad es `absolute_path` normalizado para la plataforma actual.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetRecord {
    pub filename: String,
    #[serde(alias = "path")]
    pub absolute_path: PathBuf,
    /// Ruta relativa a `base_directory`, con separadores nativos.
    pub relative_path: String,
    pub category: String,
    pub base_directory: PathBuf,
}

/// Identificador de nodo tal y como aparece en el JSON (entero o cadena).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeId {
    Int(i64),
    Str(String),
}

impl NodeId {
    /// Lee el campo `id` de un nodo del workflow.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// Compara contra el `id` de un nodo. Un id numérico y su forma en
    /// cadena ("12" frente a 12) se consideran el mismo nodo.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Int(a), Value::Number(n)) => n.as_i64() == Some(*a),
            (Self::Str(a), Value::String(b)) => a == b,
            (Self::Int(a), Value::String(b)) => b.parse::<i64>().ok() == Some(*a),
            (Self::Str(a), Value::Number(n)) => n.as_i64().map(|n| n.to_string()).as_deref() == Some(a),
            _ => false,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Una aparición de una ruta de modelo dentro del workflow.
///
/// `(node_id, widget_index, subgraph_id, is_top_level)` identifica de forma
/// única la referencia dentro de un mismo workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReference {
    pub node_id: NodeId,
    pub node_type: String,
    pub widget_index: usize,
    pub original_path: String,
    pub category: String,
    pub subgraph_id: Option<String>,
    pub is_top_level: bool,
}

/// Candidato propuesto para una referencia perdida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub model: AssetRecord,
    pub filename: String,
    /// Entre 0.0 y 1.0; sólo vale 1.0 si los nombres normalizados coinciden.
    pub similarity: f64,
    /// `similarity` como porcentaje redondeado a un decimal.
    pub confidence: f64,
}

/// Referencia confirmada como ausente del inventario, con sus candidatos ordenados.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingModel {
    #[serde(flatten)]
    pub reference: AssetReference,
    pub matches: Vec<Match>,
}

/// Resultado completo de un análisis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub missing_models: Vec<MissingModel>,
    pub total_missing: usize,
    pub total_models_analyzed: usize,
}

/// Sustitución aprobada por el usuario para una referencia concreta.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Resolution {
    pub node_id: Option<NodeId>,
    pub widget_index: Option<usize>,
    pub resolved_path: Option<String>,
    pub category: Option<String>,
    pub resolved_model: Option<AssetRecord>,
    pub subgraph_id: Option<String>,
    pub is_top_level: Option<bool>,
}
