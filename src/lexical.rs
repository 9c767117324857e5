//! Señal léxica (BM25) para la búsqueda híbrida.
//!
//! El texto legal es chino y no trae espacios, así que los caracteres CJK se
//! indexan como unigramas más bigramas; el resto se corta en palabras
//! alfanuméricas en minúsculas.

use std::collections::HashMap;

const K1: f64 = 1.2;
const B: f64 = 0.75;

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2A6DF)
}

pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut prev_cjk: Option<char> = None;

    for c in text.chars() {
        if is_cjk(c) {
            flush_word(&mut word, &mut tokens);
            tokens.push(c.to_string());
            if let Some(p) = prev_cjk {
                tokens.push(format!("{p}{c}"));
            }
            prev_cjk = Some(c);
        } else {
            prev_cjk = None;
            if c.is_alphanumeric() {
                word.extend(c.to_lowercase());
            } else {
                flush_word(&mut word, &mut tokens);
            }
        }
    }
    flush_word(&mut word, &mut tokens);
    tokens
}

fn flush_word(word: &mut String, tokens: &mut Vec<String>) {
    if !word.is_empty() {
        tokens.push(std::mem::take(word));
    }
}

/// Índice BM25 en memoria; se reconstruye a partir del docstore al cargar.
#[derive(Debug, Default)]
pub struct Bm25Index {
    doc_terms: HashMap<String, HashMap<String, u32>>,
    doc_lengths: HashMap<String, usize>,
    doc_freq: HashMap<String, usize>,
    total_length: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// Añade un documento. Los ids deben ser únicos: el índice se alimenta
    /// desde el docstore, que ya está deduplicado.
    pub fn insert(&mut self, id: &str, text: &str) {
        debug_assert!(!self.doc_lengths.contains_key(id), "documento {id} duplicado");

        let tokens = tokenize(text);
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0) += 1;
        }
        for term in tf.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += tokens.len();
        self.doc_lengths.insert(id.to_string(), tokens.len());
        self.doc_terms.insert(id.to_string(), tf);
    }

    /// Puntuación BM25 de cada documento con al menos un término en común.
    pub fn scores(&self, query: &str) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        if self.is_empty() {
            return out;
        }
        let n = self.len() as f64;
        let avg_len = (self.total_length as f64 / n).max(1.0);

        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        for term in &terms {
            let Some(&df) = self.doc_freq.get(term) else { continue };
            let idf = ((n - df as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln();
            for (id, tf_map) in &self.doc_terms {
                let Some(&tf) = tf_map.get(term) else { continue };
                let tf = tf as f64;
                let len = self.doc_lengths.get(id).copied().unwrap_or(0) as f64;
                let norm = tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * len / avg_len));
                *out.entry(id.clone()).or_insert(0.0) += idf * norm;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_text_yields_unigrams_and_bigrams() {
        assert_eq!(tokenize("劳动者"), vec!["劳", "动", "劳动", "者", "动者"]);
    }

    #[test]
    fn latin_words_are_lowercased_and_split() {
        assert_eq!(tokenize("GLM-4 Plus, 第1条"), vec!["glm", "4", "plus", "第", "1", "条"]);
    }

    #[test]
    fn matching_documents_outscore_unrelated_ones() {
        let mut index = Bm25Index::new();
        index.insert("a", "为了保护劳动者的合法权益，调整劳动关系");
        index.insert("b", "猪八戒娶媳妇");
        index.insert("c", "用人单位应当按时足额支付工资");

        let scores = index.scores("劳动者权益如何保护？");
        assert!(scores["a"] > 0.0);
        assert!(!scores.contains_key("b"));
        assert!(scores.get("c").copied().unwrap_or(0.0) < scores["a"]);
    }

    #[test]
    fn shared_characters_give_partial_matches() {
        let mut index = Bm25Index::new();
        index.insert("wages", "工资");
        index.insert("injury", "工伤");
        index.insert("leave", "假期");
        assert_eq!(index.len(), 3);

        let scores = index.scores("工资");
        assert!(scores["injury"] > 0.0);
        assert!(scores["wages"] > scores["injury"]);
        assert!(!scores.contains_key("leave"));
    }
}
