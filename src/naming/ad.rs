use serde::Serialize;

use super::normalize_product_name;

/// Structured attributes decoded from an ad name.
///
/// Ad convention: `ID_MARKET_PRODUCT NAME_CONCEPT_TYPE_FORMAT`,
/// e.g. `1094_EN_SMART_BALL_CAT_BASIC_MASHUP_VIDEO_4x5`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdNaming {
    pub id: String,
    pub market: String,
    pub product: String,
    pub target: String,
    pub offer: String,
    pub concept: String,
    pub creative_type: String,
    pub format: String,
    pub raw: String,
}

const KNOWN_TYPES: &[&str] = &["VIDEO", "IMAGE", "CAROUSEL"];
const KNOWN_CONCEPTS: &[&str] = &["BASIC", "PROMO", "MASHUP", "UGG"];

/// Parse an ad name. Total: never fails; names without the convention keep
/// the whole string as the product label.
pub fn parse_ad_name(name: &str) -> AdNaming {
    if name.trim().is_empty() {
        return AdNaming {
            id: String::new(),
            market: String::new(),
            product: String::new(),
            target: String::new(),
            offer: String::new(),
            concept: String::new(),
            creative_type: String::new(),
            format: String::new(),
            raw: name.to_string(),
        };
    }

    let parts: Vec<&str> = name.split('_').collect();
    if parts.len() < 4 {
        return AdNaming {
            id: parts[0].to_string(),
            market: String::new(),
            product: name.to_string(),
            target: String::new(),
            offer: String::new(),
            concept: String::new(),
            creative_type: String::new(),
            format: String::new(),
            raw: name.to_string(),
        };
    }

    let id = parts[0].to_string();
    let market = parts[1].to_string();
    let format = parts[parts.len() - 1].to_string();
    let creative_type = parts[parts.len() - 2].to_string();
    let middle = &parts[2..parts.len() - 2];

    // Product tokens run until the first known concept token; concept tokens
    // run until a known type token.
    let mut product_parts: Vec<&str> = Vec::new();
    let mut concept_parts: Vec<&str> = Vec::new();
    let mut seen_concept = false;
    for p in middle {
        let up = p.to_uppercase();
        if KNOWN_CONCEPTS.contains(&up.as_str()) {
            concept_parts.push(p);
            seen_concept = true;
        } else if seen_concept && KNOWN_TYPES.contains(&up.as_str()) {
            break;
        } else if !seen_concept {
            product_parts.push(p);
        }
    }

    let product = if product_parts.is_empty() {
        "Other".to_string()
    } else {
        normalize_product_name(&product_parts.join(" "))
    };
    let concept = if concept_parts.is_empty() {
        "-".to_string()
    } else {
        concept_parts.join(" ")
    };

    AdNaming {
        id,
        market,
        product,
        target: String::new(),
        offer: String::new(),
        concept,
        creative_type: or_dash(creative_type),
        format: or_dash(format),
        raw: name.to_string(),
    }
}

fn or_dash(s: String) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_convention() {
        let p = parse_ad_name("1094_EN_SMART_BALL_CAT_BASIC_MASHUP_VIDEO_4x5");
        assert_eq!(p.id, "1094");
        assert_eq!(p.market, "EN");
        // CAT sits before the first concept token, so it stays in the product run
        assert_eq!(p.product, "SMART BALL CAT");
        assert_eq!(p.concept, "BASIC MASHUP");
        assert_eq!(p.creative_type, "VIDEO");
        assert_eq!(p.format, "4x5");
    }

    #[test]
    fn test_product_alias_applies() {
        let p = parse_ad_name("20_SI_SILVERVINESTICKS_PROMO_VIDEO_9x16");
        assert_eq!(p.product, "SILVERVINE DENTAL STICKS");
        assert_eq!(p.concept, "PROMO");
        assert_eq!(p.format, "9x16");
    }

    #[test]
    fn test_short_name_keeps_whole_string_as_product() {
        let p = parse_ad_name("retarget_v2");
        assert_eq!(p.id, "retarget");
        assert_eq!(p.product, "retarget_v2");
        assert_eq!(p.market, "");
    }

    #[test]
    fn test_empty_name() {
        let p = parse_ad_name("");
        assert_eq!(p.id, "");
        assert_eq!(p.product, "");
        assert_eq!(p.raw, "");
    }

    #[test]
    fn test_no_concept_token() {
        let p = parse_ad_name("7_HU_PAW_TRIMMER_IMAGE_1x1");
        assert_eq!(p.product, "PAW TRIMMER");
        assert_eq!(p.concept, "-");
        assert_eq!(p.creative_type, "IMAGE");
        assert_eq!(p.format, "1x1");
    }
}
