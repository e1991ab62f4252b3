//! Inventario de modelos en disco y formateo de rutas al estilo del host.
//!
//! Cada raíz configurada contiene un subdirectorio por categoría
//! (`checkpoints`, `loras`, ...). Los ficheros de esos subdirectorios, a
//! cualquier profundidad, son los modelos disponibles.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::AssetRecord;

/// Proveedor del inventario de modelos disponibles.
pub trait AssetInventory: Send + Sync {
    fn list_assets(&self) -> Result<Vec<AssetRecord>>;
}

/// Autoridad que conoce el formato exacto de ruta relativa que espera el host.
pub trait PathFormatter: Send + Sync {
    /// Nombres (rutas relativas) que el host conoce para una categoría.
    fn known_names(&self, category: &str) -> Vec<String>;

    /// Ruta absoluta a la que el host resuelve `name` dentro de `category`.
    fn resolve(&self, category: &str, name: &str) -> Option<PathBuf>;

    /// Directorios base de una categoría, si el host los expone.
    fn category_dirs(&self, _category: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Normalización léxica de una ruta: elimina `.` y resuelve `..` sin tocar el disco.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Inventario que recorre directorios de modelos con `walkdir`.
#[derive(Debug, Clone)]
pub struct FsInventory {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl FsInventory {
    pub fn new(roots: Vec<PathBuf>, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        Self { roots, extensions }
    }

    fn is_model_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(std::ffi::OsStr::to_str)
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    fn scan_root(&self, root: &Path, out: &mut Vec<AssetRecord>) -> Result<()> {
        if !root.is_dir() {
            return Err(anyhow!("La raíz de modelos no es un directorio: {}", root.display()));
        }

        let mut categories: Vec<PathBuf> = std::fs::read_dir(root)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        categories.sort();

        for base_directory in categories {
            let category = base_directory
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            let mut files: Vec<PathBuf> = Vec::new();
            for entry in WalkDir::new(&base_directory).follow_links(true) {
                match entry {
                    Ok(entry) if entry.file_type().is_file() && self.is_model_file(entry.path()) => {
                        files.push(entry.into_path());
                    }
                    Ok(_) => {}
                    Err(err) => warn!("Entrada ilegible en {}: {}", base_directory.display(), err),
                }
            }
            files.sort();

            for absolute_path in files {
                let relative_path = match absolute_path.strip_prefix(&base_directory) {
                    Ok(rel) => rel.to_string_lossy().to_string(),
                    Err(_) => continue,
                };
                let filename = absolute_path
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                out.push(AssetRecord {
                    filename,
                    absolute_path,
                    relative_path,
                    category: category.clone(),
                    base_directory: base_directory.clone(),
                });
            }
        }
        Ok(())
    }
}

impl AssetInventory for FsInventory {
    fn list_assets(&self) -> Result<Vec<AssetRecord>> {
        let mut assets = Vec::new();
        for root in &self.roots {
            if let Err(err) = self.scan_root(root, &mut assets) {
                warn!("Omitiendo raíz de modelos {}: {}", root.display(), err);
            }
        }
        info!("Inventario: {} modelos en {} raíces.", assets.len(), self.roots.len());
        Ok(assets)
    }
}

impl PathFormatter for FsInventory {
    fn known_names(&self, category: &str) -> Vec<String> {
        match self.list_assets() {
            Ok(assets) => assets
                .into_iter()
                .filter(|a| a.category == category)
                .map(|a| a.relative_path)
                .collect(),
            Err(err) => {
                warn!("No se pudo listar la categoría {}: {}", category, err);
                Vec::new()
            }
        }
    }

    fn resolve(&self, category: &str, name: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.join(category).join(name))
            .find(|candidate| candidate.is_file())
    }

    fn category_dirs(&self, category: &str) -> Vec<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.join(category))
            .filter(|dir| dir.is_dir())
            .collect()
    }
}

/// Memoriza las consultas a otro formateador durante una petición, para que
/// un lote de resoluciones no vuelva a recorrer el disco en cada cambio.
pub struct CachedFormatter<'a> {
    inner: &'a dyn PathFormatter,
    names: Mutex<HashMap<String, Vec<String>>>,
    resolved: Mutex<HashMap<(String, String), Option<PathBuf>>>,
    dirs: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl<'a> CachedFormatter<'a> {
    pub fn new(inner: &'a dyn PathFormatter) -> Self {
        Self {
            inner,
            names: Mutex::new(HashMap::new()),
            resolved: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
        }
    }
}

fn cached<K, V, F>(cache: &Mutex<HashMap<K, V>>, key: K, load: F) -> V
where
    K: std::hash::Hash + Eq,
    V: Clone,
    F: FnOnce() -> V,
{
    let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    cache.entry(key).or_insert_with(load).clone()
}

impl PathFormatter for CachedFormatter<'_> {
    fn known_names(&self, category: &str) -> Vec<String> {
        cached(&self.names, category.to_string(), || self.inner.known_names(category))
    }

    fn resolve(&self, category: &str, name: &str) -> Option<PathBuf> {
        cached(&self.resolved, (category.to_string(), name.to_string()), || {
            self.inner.resolve(category, name)
        })
    }

    fn category_dirs(&self, category: &str) -> Vec<PathBuf> {
        cached(&self.dirs, category.to_string(), || self.inner.category_dirs(category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn inventory(root: &Path) -> FsInventory {
        FsInventory::new(vec![root.to_path_buf()], vec![".safetensors".into(), "ckpt".into()])
    }

    #[test]
    fn lists_model_files_per_category() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("checkpoints/sdxl/base.safetensors"));
        touch(&dir.path().join("checkpoints/v1.CKPT"));
        touch(&dir.path().join("loras/style.safetensors"));
        touch(&dir.path().join("loras/readme.txt"));
        touch(&dir.path().join("stray.safetensors"));

        let assets = inventory(dir.path()).list_assets().unwrap();
        let names: Vec<(&str, &str)> = assets
            .iter()
            .map(|a| (a.category.as_str(), a.relative_path.as_str()))
            .collect();
        let sub = Path::new("sdxl").join("base.safetensors").to_string_lossy().to_string();
        assert_eq!(
            names,
            vec![("checkpoints", sub.as_str()), ("checkpoints", "v1.CKPT"), ("loras", "style.safetensors")]
        );
        assert_eq!(assets[0].filename, "base.safetensors");
        assert_eq!(assets[0].base_directory, dir.path().join("checkpoints"));
    }

    #[test]
    fn missing_root_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let inv = FsInventory::new(vec![dir.path().join("nope")], vec!["ckpt".into()]);
        assert!(inv.list_assets().unwrap().is_empty());
    }

    #[test]
    fn formatter_round_trips_known_names() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("vae/sub/a.safetensors"));
        let inv = inventory(dir.path());
        let names = inv.known_names("vae");
        assert_eq!(names.len(), 1);
        assert_eq!(inv.resolve("vae", &names[0]), Some(dir.path().join("vae/sub/a.safetensors")));
        assert_eq!(inv.resolve("vae", "missing.safetensors"), None);
        assert_eq!(inv.category_dirs("vae"), vec![dir.path().join("vae")]);
        assert!(inv.category_dirs("loras").is_empty());
    }

    #[test]
    fn normalize_path_is_lexical() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c.pt")), PathBuf::from("/a/c.pt"));
        assert_eq!(normalize_path(Path::new("a/b/")), PathBuf::from("a/b"));
    }

    #[test]
    fn cached_formatter_scans_each_category_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting(AtomicUsize);

        impl PathFormatter for Counting {
            fn known_names(&self, _category: &str) -> Vec<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                vec!["a.pt".into()]
            }

            fn resolve(&self, category: &str, name: &str) -> Option<PathBuf> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Some(PathBuf::from("/m").join(category).join(name))
            }
        }

        let inner = Counting(AtomicUsize::new(0));
        let cache = CachedFormatter::new(&inner);
        for _ in 0..3 {
            assert_eq!(cache.known_names("vae"), vec!["a.pt".to_string()]);
            assert_eq!(cache.resolve("vae", "a.pt"), Some(PathBuf::from("/m/vae/a.pt")));
        }
        assert_eq!(inner.0.load(Ordering::SeqCst), 2);
        cache.known_names("loras");
        assert_eq!(inner.0.load(Ordering::SeqCst), 3);
    }
}
