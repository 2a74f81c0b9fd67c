//! Instrument registry: the symbols the pipeline is expected to carry.
//!
//! Stored as the `[registry]` table of the pipeline TOML config, grouped by
//! instrument type. Completeness checks compare landed data against it.

use crate::domain::InstrumentType;
use serde::{Deserialize, Serialize};

const DEFAULT_STOCKS: &[&str] = &[
    "AAPL", "AMD", "AMZN", "BA", "BABA", "BAC", "C", "CSCO", "CVX", "DIS", "F", "GE", "GOOGL",
    "IBM", "INTC", "JNJ", "JPM", "KO", "MCD", "META", "MSFT", "NFLX", "NVDA", "PFE", "T", "TSLA",
    "VZ", "WMT", "XOM",
];
const DEFAULT_INDEXES: &[&str] = &["^GSPC", "^DJI", "^IXIC"];
const DEFAULT_COMMODITIES: &[&str] = &["GCUSD", "CLUSD"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
    pub stocks: Vec<String>,
    pub indexes: Vec<String>,
    pub commodities: Vec<String>,
    /// Whether treasury yields are extracted.
    pub bonds: bool,
}

impl Default for Registry {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            stocks: owned(DEFAULT_STOCKS),
            indexes: owned(DEFAULT_INDEXES),
            commodities: owned(DEFAULT_COMMODITIES),
            bonds: true,
        }
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            stocks: Vec::new(),
            indexes: Vec::new(),
            commodities: Vec::new(),
            bonds: false,
        }
    }

    /// Parse a registry from a TOML string. Accepts either bare keys or a
    /// `[registry]` table.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        struct Wrapped {
            registry: Registry,
        }
        if let Ok(w) = toml::from_str::<Wrapped>(content) {
            return Ok(w.registry);
        }
        toml::from_str(content).map_err(|e| format!("parse registry TOML: {e}"))
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("serialize registry: {e}"))
    }

    pub fn symbols(&self, kind: InstrumentType) -> &[String] {
        match kind {
            InstrumentType::Stock => &self.stocks,
            InstrumentType::Index => &self.indexes,
            InstrumentType::Commodity => &self.commodities,
        }
    }

    /// Every (type, symbol) pair in registry order.
    pub fn all(&self) -> Vec<(InstrumentType, &str)> {
        InstrumentType::ALL
            .iter()
            .flat_map(|&kind| self.symbols(kind).iter().map(move |s| (kind, s.as_str())))
            .collect()
    }

    pub fn kind_of(&self, symbol: &str) -> Option<InstrumentType> {
        InstrumentType::ALL
            .into_iter()
            .find(|&kind| self.symbols(kind).iter().any(|s| s == symbol))
    }

    pub fn symbol_count(&self) -> usize {
        self.stocks.len() + self.indexes.len() + self.commodities.len()
    }

    /// Symbols that fail [`validate_symbol`].
    pub fn invalid_symbols(&self) -> Vec<&str> {
        self.all()
            .into_iter()
            .map(|(_, s)| s)
            .filter(|s| !validate_symbol(s))
            .collect()
    }
}

/// Upstream symbol format: 1-10 chars, alphanumeric once `^`, `.` and `-`
/// are stripped.
pub fn validate_symbol(symbol: &str) -> bool {
    if symbol.is_empty() || symbol.len() > 10 {
        return false;
    }
    let stripped: String = symbol
        .chars()
        .filter(|c| !matches!(c, '^' | '.' | '-'))
        .collect();
    !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_kinds() {
        let r = Registry::default();
        assert_eq!(r.stocks.len(), 29);
        assert_eq!(r.symbols(InstrumentType::Index), ["^GSPC", "^DJI", "^IXIC"]);
        assert_eq!(r.kind_of("GCUSD"), Some(InstrumentType::Commodity));
        assert_eq!(r.kind_of("ZZZZ"), None);
        assert!(r.invalid_symbols().is_empty());
    }

    #[test]
    fn all_preserves_registry_order() {
        let r = Registry {
            stocks: vec!["A".into(), "B".into()],
            indexes: vec!["^X".into()],
            commodities: vec![],
            bonds: false,
        };
        assert_eq!(
            r.all(),
            vec![
                (InstrumentType::Stock, "A"),
                (InstrumentType::Stock, "B"),
                (InstrumentType::Index, "^X"),
            ]
        );
    }

    #[test]
    fn symbol_validation() {
        assert!(validate_symbol("AAPL"));
        assert!(validate_symbol("^GSPC"));
        assert!(validate_symbol("BRK.B"));
        assert!(!validate_symbol(""));
        assert!(!validate_symbol("^"));
        assert!(!validate_symbol("TOO_LONG_SYMBOL"));
        assert!(!validate_symbol("AA PL"));
    }

    #[test]
    fn registry_from_toml_lines() {
        let r = Registry::from_toml(
            "[registry]\nstocks = [\"AAPL\", \"MSFT\"]\nindexes = []\nbonds = false # off\n",
        )
        .unwrap();
        assert_eq!(r.stocks, vec!["AAPL", "MSFT"]);
        assert!(r.indexes.is_empty());
        assert!(!r.bonds);
    }

    #[test]
    fn registry_toml_roundtrip() {
        let r = Registry::default();
        let text = r.to_toml().unwrap();
        assert_eq!(Registry::from_toml(&text).unwrap(), r);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let r = Registry::from_toml("stocks = [\"AAPL\"]").unwrap();
        assert_eq!(r.stocks, vec!["AAPL"]);
        assert_eq!(r.indexes.len(), 3);
    }
}
