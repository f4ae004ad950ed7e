//! Derivação do número de factura (`NNN-NNN-NNNNNNNNN`).
//!
//! O número vem formatado do plano ou é extraído da clave de acceso de 49
//! dígitos: estabelecimento `[24..27]`, ponto de emissão `[27..30]` e
//! sequencial `[30..39]`.

const CLAVE_LEN: usize = 49;
const NUMERO_LEN: usize = 15;

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn group(d: &str) -> Option<String> {
    if d.len() != NUMERO_LEN {
        return None;
    }
    Some(format!("{}-{}-{}", &d[0..3], &d[3..6], &d[6..15]))
}

/// Número normalizado, ou "" se nenhuma das fontes for válida.
pub fn numero_factura(numero: &str, clave_acceso: &str) -> String {
    if let Some(n) = group(&digits(numero)) {
        return n;
    }
    let clave = digits(clave_acceso);
    if clave.len() == CLAVE_LEN {
        if let Some(n) = group(&clave[24..39]) {
            return n;
        }
    }
    String::new()
}

/// Forma compacta (sem hífens).
pub fn compact(numero: &str) -> String {
    numero.chars().filter(|c| *c != '-').collect()
}
