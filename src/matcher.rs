//! Coincidencia aproximada de nombres de modelo.
//!
//! La similitud es la razón clásica de alineamiento de secuencias
//! `2*M / T`, donde `M` son los caracteres que el diff de `similar` deja
//! como iguales y `T` la longitud total de ambas cadenas.

use similar::{DiffOp, TextDiff};
use tracing::debug;

use crate::models::{AssetRecord, Match};

/// Techo para coincidencias que no son exactas tras normalizar.
const MAX_INEXACT_SIMILARITY: f64 = 0.999;

/// Separa la extensión de un nombre de fichero. Los puntos iniciales
/// (ficheros ocultos) no cuentan como extensión.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Último componente de una ruta, admitiendo tanto `/` como `\`.
pub fn bare_filename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Quita la extensión, pasa a minúsculas y colapsa cualquier racha de
/// `_`, `-` o espacios en un único espacio.
pub fn normalize_filename(name: &str) -> String {
    let (base, _) = split_extension(name);
    let mut out = String::with_capacity(base.len());
    let mut pending_sep = false;
    for c in base.to_lowercase().chars() {
        if c == '_' || c == '-' || c.is_whitespace() {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push(' ');
        }
        pending_sep = false;
        out.push(c);
    }
    out
}

/// Razón de similitud entre 0.0 (disjuntas) y 1.0 (idénticas).
pub fn calculate_similarity(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    let diff = TextDiff::from_chars(a, b);
    let matched: usize = diff
        .ops()
        .iter()
        .map(|op| match *op {
            DiffOp::Equal { len, .. } => len,
            _ => 0,
        })
        .sum();
    2.0 * matched as f64 / total as f64
}

/// Similitud tras normalizar ambos nombres.
pub fn calculate_similarity_with_normalization(a: &str, b: &str) -> f64 {
    calculate_similarity(&normalize_filename(a), &normalize_filename(b))
}

fn candidate_filename(candidate: &AssetRecord) -> Option<String> {
    if !candidate.filename.is_empty() {
        return Some(candidate.filename.clone());
    }
    let from_path = candidate
        .absolute_path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty());
    from_path.or_else(|| {
        let name = bare_filename(&candidate.relative_path);
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Busca los candidatos más parecidos a `target_path`.
///
/// Sólo se comparan nombres de fichero, nunca directorios. El resultado
/// queda ordenado de mayor a menor similitud (estable respecto al orden de
/// entrada) y truncado a `max_results`.
pub fn find_matches<'a, I>(
    target_path: &str,
    candidates: I,
    threshold: f64,
    max_results: usize,
) -> Vec<Match>
where
    I: IntoIterator<Item = &'a AssetRecord>,
{
    let target_filename = bare_filename(target_path);
    let target_norm = normalize_filename(target_filename);
    let (target_base, _) = split_extension(target_filename);

    let mut matches = Vec::new();
    for candidate in candidates {
        let Some(filename) = candidate_filename(candidate) else {
            debug!("Candidato sin nombre de fichero: {}", candidate.absolute_path.display());
            continue;
        };

        let similarity = if normalize_filename(&filename) == target_norm {
            1.0
        } else {
            let full = calculate_similarity_with_normalization(target_filename, &filename);
            let (candidate_base, _) = split_extension(&filename);
            let no_ext = calculate_similarity_with_normalization(target_base, candidate_base);
            full.max(no_ext).min(MAX_INEXACT_SIMILARITY)
        };

        if similarity >= threshold {
            matches.push(Match {
                model: candidate.clone(),
                filename,
                similarity,
                confidence: to_confidence(similarity),
            });
        }
    }

    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(max_results);
    matches
}

/// Porcentaje con un decimal; los empates se redondean al par.
pub fn to_confidence(similarity: f64) -> f64 {
    (similarity * 1000.0).round_ties_even() / 10.0
}
