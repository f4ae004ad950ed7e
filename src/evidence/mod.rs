//! # Evidência de Falhas
//!
//! Screenshot de página inteira gravado em disco quando uma ação falha (ou
//! quando o operador pede), com hash SHA-256 e tamanho para anexar ao
//! evento de erro.
//!
//! Nome do arquivo: `{timestamp ISO com ':' e '.' trocados por '-'}_{rótulo}.png`.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::browser::Page;
use crate::errors::AgentResult;
use crate::protocol::Evidence;

/// Tamanho máximo do rótulo no nome do arquivo.
pub const MAX_LABEL_LEN: usize = 48;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9_-]").expect("regex de rótulo inválida"));

/// Rótulo seguro para nome de arquivo; vazio vira `screenshot`.
pub fn sanitize_label(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let safe = UNSAFE_CHARS.replace_all(&lowered, "_");
    let clipped: String = safe.chars().take(MAX_LABEL_LEN).collect();
    if clipped.is_empty() {
        "screenshot".to_string()
    } else {
        clipped
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn file_stamp() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Captura a página inteira e grava em `dir`.
#[instrument(skip(page, dir), fields(dir = %dir.as_ref().display()))]
pub async fn capture<P: AsRef<Path>>(page: &dyn Page, dir: P, label: &str) -> AgentResult<Evidence> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;

    let bytes = page.screenshot_png(true).await?;
    let path = dir.join(format!("{}_{}.png", file_stamp(), sanitize_label(label)));
    tokio::fs::write(&path, &bytes).await?;

    let evidence = Evidence {
        file_path: path.display().to_string(),
        sha256: sha256_hex(&bytes),
        size: bytes.len() as u64,
    };
    debug!(path = %evidence.file_path, size = evidence.size, "Evidência gravada");
    Ok(evidence)
}
