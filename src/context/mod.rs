//! # Contexto de Interpolação
//!
//! Mantém as variáveis de um item do plano e renderiza os templates
//! `{{var}}` dos steps.
//!
//! ## Regras:
//!
//! - Identificador: caracteres de palavra, ponto e hífen (`{{ proveedor.ruc }}`)
//! - Variável ausente ou nula vira string vazia (modo `Lenient`, padrão)
//! - Modo `Strict` coleta todas as variáveis ausentes e falha de uma vez
//! - Arrays e objetos são percorridos recursivamente; números, booleanos e
//!   null passam intactos
//! - Não há escape: `{{` sempre abre um placeholder

pub mod categoria;
pub mod factura;

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::errors::{AgentError, AgentResult};
use crate::protocol::PlanAction;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([\w.-]+)\s*\}\}").expect("valid placeholder regex")
});

/// Política para placeholders sem valor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Lenient,
    Strict,
}

/// Mapa plano nome → valor usado para renderizar steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    variables: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Insere um valor JSON como string. `null` remove a chave.
    pub fn set_value(&mut self, key: impl Into<String>, value: &Value) {
        let key = key.into();
        match value {
            Value::Null => {
                self.variables.remove(&key);
            }
            Value::String(s) => {
                self.variables.insert(key, s.clone());
            }
            other => {
                self.variables.insert(key, other.to_string());
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    /// Valor ou "" quando ausente.
    pub fn text(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Cópia do contexto sobreposta com `vars` (usado por `runAction`).
    pub fn overlay(&self, vars: &Map<String, Value>) -> Self {
        let mut next = self.clone();
        for (k, v) in vars {
            next.set_value(k.clone(), v);
        }
        next
    }

    /// Substitui placeholders numa string. Nunca falha.
    pub fn interpolate_str(&self, input: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(input, |caps: &Captures| {
                self.variables.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }

    /// Interpola recursivamente strings dentro de valores JSON.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate_str(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.interpolate_value(item)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    /// Renderiza conforme a política. Em `Strict`, lista todas as
    /// variáveis ausentes num único `ConfigInvalid`.
    pub fn render(&self, value: &Value, mode: Interpolation) -> AgentResult<Value> {
        if mode == Interpolation::Strict {
            let mut missing = Vec::new();
            self.collect_missing(value, &mut missing);
            if !missing.is_empty() {
                return Err(AgentError::ConfigInvalid {
                    issues: missing
                        .into_iter()
                        .map(|k| format!("variável ausente: {}", k))
                        .collect(),
                });
            }
        }
        Ok(self.interpolate_value(value))
    }

    fn collect_missing(&self, value: &Value, missing: &mut Vec<String>) {
        match value {
            Value::String(s) => {
                for caps in PLACEHOLDER_RE.captures_iter(s) {
                    let key = &caps[1];
                    if !self.variables.contains_key(key) && !missing.iter().any(|m| m == key) {
                        missing.push(key.to_string());
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|v| self.collect_missing(v, missing)),
            Value::Object(map) => map.values().for_each(|v| self.collect_missing(v, missing)),
            _ => {}
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Context::new();
        for (k, v) in iter {
            ctx.set(k, v);
        }
        ctx
    }
}

// ============================================================================
// CONTEXTO DE UM ITEM DO PLANO
// ============================================================================

/// Monta o contexto de um item do plano mais os extras do chamador.
///
/// Campos derivados:
/// - `categoria_objetivo`: objetivo, senão nombre, senão id
/// - `periodoTarget`: `periodoTarget`, `periodo_target` ou `periodo`
/// - `numero_factura` / `numero_factura_compacto`: ver [`factura`]
/// - `categoria_panel` / `categoria_label`: ver [`categoria`]
///
/// Extras sobrescrevem qualquer campo derivado.
pub fn build_action_context(action: &PlanAction, extras: &Map<String, Value>) -> Context {
    let mut ctx = Context::new();

    for key in [
        "proveedor_id",
        "proveedor_ruc",
        "factura_id",
        "clave_acceso",
        "categoria_id",
        "categoria_nombre",
        "confianza",
    ] {
        ctx.set(key, action.text(key));
    }

    let objetivo = action.first_text(&["categoria_objetivo", "categoria_nombre", "categoria_id"]);
    ctx.set("categoria_objetivo", objetivo.clone());
    ctx.set(
        "periodoTarget",
        action.first_text(&["periodoTarget", "periodo_target", "periodo"]),
    );

    let numero = factura::numero_factura(&action.text("numero_factura"), &action.text("clave_acceso"));
    ctx.set("numero_factura_compacto", factura::compact(&numero));
    ctx.set("numero_factura", numero);

    let hint = categoria::panel_hint(&objetivo);
    ctx.set(
        "categoria_panel",
        hint.map(|h| h.panel.to_string()).unwrap_or_default(),
    );
    ctx.set(
        "categoria_label",
        hint.map(|h| h.label.to_string()).unwrap_or(objetivo),
    );

    for (k, v) in extras {
        ctx.set_value(k.clone(), v);
    }
    ctx
}
