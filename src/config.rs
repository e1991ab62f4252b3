//! Carga y gestión de configuración de la aplicación (directorios de modelos y análisis).

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::linker::{DEFAULT_MAX_MATCHES, DEFAULT_SIMILARITY_THRESHOLD};
use crate::workflow_analyzer::DEFAULT_MODEL_EXTENSIONS;

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    /// Raíces con un subdirectorio por categoría de modelo.
    pub models_dirs: Vec<PathBuf>,
    pub model_extensions: Vec<String>,

    pub similarity_threshold: f64,
    pub max_matches_per_model: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, leyendo las variables con `get`.
    pub fn from_vars<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_addr = get("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:8189".to_string());

        let models_dirs = match get("MODELS_DIRS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .split(',')
                .flat_map(|part| env::split_paths(part.trim()).collect::<Vec<_>>())
                .filter(|p| !p.as_os_str().is_empty())
                .collect(),
            None => {
                let home = dirs::home_dir()
                    .ok_or_else(|| anyhow!("Falta MODELS_DIRS y no se pudo determinar el directorio home"))?;
                vec![home.join("ComfyUI").join("models")]
            }
        };
        if models_dirs.is_empty() {
            return Err(anyhow!("MODELS_DIRS no contiene ninguna ruta"));
        }

        let model_extensions = match get("MODEL_EXTENSIONS") {
            Some(raw) => raw
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            None => DEFAULT_MODEL_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        };

        let similarity_threshold = match get("SIMILARITY_THRESHOLD") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|e| anyhow!("SIMILARITY_THRESHOLD inválido ({raw}): {e}"))?,
            None => DEFAULT_SIMILARITY_THRESHOLD,
        };
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(anyhow!("SIMILARITY_THRESHOLD debe estar entre 0 y 1: {similarity_threshold}"));
        }

        let max_matches_per_model = match get("MAX_MATCHES_PER_MODEL") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|e| anyhow!("MAX_MATCHES_PER_MODEL inválido ({raw}): {e}"))?,
            None => DEFAULT_MAX_MATCHES,
        };
        if max_matches_per_model == 0 {
            return Err(anyhow!("MAX_MATCHES_PER_MODEL debe ser mayor que 0"));
        }

        Ok(Self {
            server_addr,
            models_dirs,
            model_extensions,
            similarity_threshold,
            max_matches_per_model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn reads_all_variables() {
        let cfg = load(&[
            ("SERVER_ADDR", "0.0.0.0:9000"),
            ("MODELS_DIRS", "/a/models, /b/models"),
            ("MODEL_EXTENSIONS", ".SafeTensors, ckpt"),
            ("SIMILARITY_THRESHOLD", "0.4"),
            ("MAX_MATCHES_PER_MODEL", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.server_addr, "0.0.0.0:9000");
        assert_eq!(cfg.models_dirs, vec![PathBuf::from("/a/models"), PathBuf::from("/b/models")]);
        assert_eq!(cfg.model_extensions, vec!["safetensors", "ckpt"]);
        assert_eq!(cfg.similarity_threshold, 0.4);
        assert_eq!(cfg.max_matches_per_model, 3);
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[("MODELS_DIRS", "/m")]).unwrap();
        assert_eq!(cfg.server_addr, "127.0.0.1:8189");
        assert_eq!(cfg.similarity_threshold, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(cfg.max_matches_per_model, DEFAULT_MAX_MATCHES);
        assert!(cfg.model_extensions.contains(&"safetensors".to_string()));
    }

    #[test]
    fn rejects_invalid_numbers() {
        assert!(load(&[("MODELS_DIRS", "/m"), ("SIMILARITY_THRESHOLD", "1.5")]).is_err());
        assert!(load(&[("MODELS_DIRS", "/m"), ("SIMILARITY_THRESHOLD", "abc")]).is_err());
        assert!(load(&[("MODELS_DIRS", "/m"), ("MAX_MATCHES_PER_MODEL", "0")]).is_err());
    }
}
