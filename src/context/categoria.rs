//! Normalização de categorias e resolução de opções do formulário.

use serde_json::Value;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Dica de exibição de uma categoria de gasto pessoal no portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelHint {
    pub key: &'static str,
    pub panel: &'static str,
    pub label: &'static str,
}

const PANEL_HINTS: &[PanelHint] = &[
    PanelHint {
        key: "VIVIENDA",
        panel: "vivienda",
        label: "Vivienda",
    },
    PanelHint {
        key: "EDUCACION_ARTE_Y_CULTURA",
        panel: "educacion_arte_y_cultura",
        label: "Educación, Arte y Cultura",
    },
    PanelHint {
        key: "SALUD",
        panel: "salud",
        label: "Salud",
    },
    PanelHint {
        key: "VESTIMENTA",
        panel: "vestimenta",
        label: "Vestimenta",
    },
    PanelHint {
        key: "ALIMENTACION",
        panel: "alimentacion",
        label: "Alimentación",
    },
    PanelHint {
        key: "TURISMO",
        panel: "turismo",
        label: "Turismo",
    },
];

/// Decompõe (NFD), remove diacríticos, passa para maiúsculas e troca cada
/// sequência não alfanumérica por um único `_`.
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

pub fn panel_hint(categoria: &str) -> Option<&'static PanelHint> {
    let key = normalize_key(categoria);
    if key.is_empty() {
        return None;
    }
    PANEL_HINTS.iter().find(|h| h.key == key)
}

/// Opção resolvida de `apply.category_map`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryOption {
    pub value: Option<String>,
    pub label: Option<String>,
    pub text: Option<String>,
}

fn truthy_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

/// Busca direta da chave no mapa de categorias.
///
/// Entrada string vira `{label}`; objeto vira `{value?, label?, text?}`.
/// Entrada vazia ou sem nenhum dos três campos não resolve.
pub fn resolve_category_option(key: &str, category_map: &Value) -> Option<CategoryOption> {
    let entry = category_map.as_object()?.get(key)?;
    match entry {
        Value::String(s) if !s.is_empty() => Some(CategoryOption {
            label: Some(s.clone()),
            ..Default::default()
        }),
        Value::Object(obj) => {
            let option = CategoryOption {
                value: truthy_string(obj.get("value")),
                label: truthy_string(obj.get("label")),
                text: truthy_string(obj.get("text")),
            };
            if option == CategoryOption::default() {
                None
            } else {
                Some(option)
            }
        }
        _ => None,
    }
}
