//! Identifier classification
//!
//! Pure functions only: nothing here touches a provider.

use crate::error::{TesseraError, TesseraResult};
use crate::models::{DomainHint, Identifier, SyntacticClass};

const ADDRESS_HEX_LEN: usize = 40;
const HASH_HEX_LEN: usize = 64;
const MAX_SYMBOL_LEN: usize = 20;

fn hex_body(input: &str) -> Option<&str> {
    let body = input.strip_prefix("0x")?;
    body.chars().all(|c| c.is_ascii_hexdigit()).then_some(body)
}

/// Classify a raw identifier. Total and deterministic; surrounding
/// whitespace is ignored.
pub fn classify(input: &str) -> SyntacticClass {
    let input = input.trim();

    if let Some(body) = hex_body(input) {
        match body.len() {
            ADDRESS_HEX_LEN => return SyntacticClass::EvmAddress,
            HASH_HEX_LEN => return SyntacticClass::TxHash,
            _ => {}
        }
    }

    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return SyntacticClass::BlockNumber;
    }

    SyntacticClass::Unknown
}

/// Both ledgers share address and hash formats, so every class is probed on
/// both. `Unknown` also maps to both to allow a best-effort symbol lookup.
pub fn guess_domain(_class: SyntacticClass) -> DomainHint {
    DomainHint::Both
}

/// Domain-normalized form used for lookups and cache keys.
pub fn canonicalize(input: &str, class: SyntacticClass) -> String {
    let input = input.trim();
    match class {
        SyntacticClass::EvmAddress | SyntacticClass::TxHash => {
            format!("0x{}", input[2..].to_ascii_lowercase())
        }
        SyntacticClass::BlockNumber => {
            let stripped = input.trim_start_matches('0');
            if stripped.is_empty() {
                "0".to_string()
            } else {
                stripped.to_string()
            }
        }
        SyntacticClass::Unknown => input.to_string(),
    }
}

/// Classify and canonicalize in one step.
pub fn identify(input: &str) -> Identifier {
    let class = classify(input);
    Identifier {
        raw: input.to_string(),
        canonical: canonicalize(input, class),
        class,
    }
}

/// Require a 20-byte hex address; returns its canonical form.
pub fn validate_address(input: &str) -> TesseraResult<String> {
    match classify(input) {
        SyntacticClass::EvmAddress => Ok(canonicalize(input, SyntacticClass::EvmAddress)),
        other => Err(TesseraError::InvalidInput(format!(
            "expected a 0x-prefixed 20-byte address, got {:?} ({:?})",
            input.trim(),
            other
        ))),
    }
}

/// Require a token or market symbol such as `PURR` or `kPEPE`.
pub fn validate_symbol(input: &str) -> TesseraResult<String> {
    let symbol = input.trim();
    if symbol.is_empty() {
        return Err(TesseraError::InvalidInput("Symbol cannot be empty".into()));
    }
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(TesseraError::InvalidInput(format!(
            "Symbol too long ({} > {} characters)",
            symbol.len(),
            MAX_SYMBOL_LEN
        )));
    }
    if classify(symbol) != SyntacticClass::Unknown
        || !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '@')
    {
        return Err(TesseraError::InvalidInput(format!(
            "Invalid symbol format: {}",
            symbol
        )));
    }
    Ok(symbol.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4";
    const HASH: &str = "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b";

    #[test]
    fn test_classification_rules() {
        assert_eq!(classify(ADDRESS), SyntacticClass::EvmAddress);
        assert_eq!(classify(HASH), SyntacticClass::TxHash);
        assert_eq!(classify("12345"), SyntacticClass::BlockNumber);
        assert_eq!(classify("0"), SyntacticClass::BlockNumber);
        assert_eq!(classify("PURR"), SyntacticClass::Unknown);
        assert_eq!(classify(""), SyntacticClass::Unknown);
    }

    #[test]
    fn test_near_misses_are_unknown() {
        // 39 and 41 hex chars
        assert_eq!(classify(&ADDRESS[..41]), SyntacticClass::Unknown);
        assert_eq!(classify(&format!("{}a", ADDRESS)), SyntacticClass::Unknown);
        // non-hex character in an otherwise valid hash
        let mut bad = HASH.to_string();
        bad.replace_range(10..11, "g");
        assert_eq!(classify(&bad), SyntacticClass::Unknown);
        // no prefix
        assert_eq!(classify(&HASH[2..]), SyntacticClass::Unknown);
        assert_eq!(classify("-5"), SyntacticClass::Unknown);
        assert_eq!(classify("1.5"), SyntacticClass::Unknown);
        // prefix is lowercase only
        assert_eq!(classify(&format!("0X{}", "a".repeat(40))), SyntacticClass::Unknown);
        assert_eq!(classify(&format!("0X{}", &HASH[2..])), SyntacticClass::Unknown);
    }

    #[test]
    fn test_classification_is_deterministic_and_trims() {
        for input in [ADDRESS, HASH, "991", "kPEPE", "  42  "] {
            assert_eq!(classify(input), classify(input));
        }
        assert_eq!(classify("  42  "), SyntacticClass::BlockNumber);
    }

    #[test]
    fn test_every_class_probes_both_domains() {
        for class in [
            SyntacticClass::EvmAddress,
            SyntacticClass::TxHash,
            SyntacticClass::BlockNumber,
            SyntacticClass::Unknown,
        ] {
            assert_eq!(guess_domain(class), DomainHint::Both);
        }
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(
            canonicalize(ADDRESS, SyntacticClass::EvmAddress),
            ADDRESS.to_lowercase()
        );
        assert_eq!(canonicalize("000120", SyntacticClass::BlockNumber), "120");
        assert_eq!(canonicalize("000", SyntacticClass::BlockNumber), "0");
        assert_eq!(canonicalize(" PURR ", SyntacticClass::Unknown), "PURR");
    }

    #[test]
    fn test_validation() {
        assert!(validate_address(ADDRESS).is_ok());
        assert!(matches!(
            validate_address("0x123"),
            Err(TesseraError::InvalidInput(_))
        ));
        assert_eq!(validate_symbol(" PURR ").unwrap(), "PURR");
        assert!(validate_symbol("").is_err());
        assert!(validate_symbol("12345").is_err());
        assert!(validate_symbol("NOT A SYMBOL").is_err());
    }
}
