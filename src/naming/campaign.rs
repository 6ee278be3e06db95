use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use super::normalize_product_name;

/// Structured attributes decoded from a campaign name.
///
/// Campaign convention: `CBO_MARKET_PRODUCT NAME_VARIANT_TYPE_DATE`,
/// e.g. `CBO_ES_SMART_BALL_CAT_BASIC_MASHUP_VIDEO_20250216`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignNaming {
    pub market: String,
    pub product: String,
    pub product_variant: String,
    pub variant: String,
    pub creative_type: String,
    pub naming_date: String,
    pub raw: String,
}

impl CampaignNaming {
    fn fallback(market: String, raw: &str) -> Self {
        Self {
            market,
            product: "Other".to_string(),
            product_variant: "Other".to_string(),
            variant: String::new(),
            creative_type: String::new(),
            naming_date: String::new(),
            raw: raw.to_string(),
        }
    }
}

fn market_fallback_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Tolerates noisy prefixes and stray spaces: "[NEW] CBO_GR_...", "CBO _HR_..."
    RE.get_or_init(|| Regex::new(r"(?i)(?:CBO|ABO)\s*_\s*([A-Za-z]{2,3})(?:_|\s|$)").unwrap())
}

fn is_market_code(s: &str) -> bool {
    (2..=3).contains(&s.len()) && s.chars().all(|c| c.is_ascii_uppercase())
}

/// Parse a campaign name. Total: never fails, unparseable input yields a
/// defaulted structure with `product = "Other"`.
pub fn parse_campaign_name(name: &str) -> CampaignNaming {
    if name.trim().is_empty() {
        return CampaignNaming::fallback(String::new(), name);
    }

    let parts: Vec<&str> = name.split('_').collect();

    let first = parts[0].trim();
    let mut market = String::new();
    if parts.len() >= 2 && (first.eq_ignore_ascii_case("CBO") || first.eq_ignore_ascii_case("ABO"))
    {
        let candidate = parts[1].trim().to_uppercase();
        if is_market_code(&candidate) {
            market = candidate;
        }
    }
    if market.is_empty() {
        if let Some(caps) = market_fallback_re().captures(name) {
            let candidate = caps[1].to_uppercase();
            if is_market_code(&candidate) {
                market = candidate;
            }
        }
    }

    // Short 5-part form: CBO_MX_DENTALWIPES_DOG_TESTING #7
    if parts.len() == 5 {
        let product = normalize_product_name(parts[2].trim());
        let variant = parts[3].trim().to_string();
        let product_variant = join_variant(&product, &variant);
        return CampaignNaming {
            market,
            product,
            product_variant,
            variant,
            creative_type: parts[4].trim().to_string(),
            naming_date: String::new(),
            raw: name.to_string(),
        };
    }

    if parts.len() < 6 {
        return CampaignNaming::fallback(market, name);
    }

    let n = parts.len();
    let naming_date = parts[n - 1].to_string();
    let variant = parts[n - 3].to_string(); // e.g. CAT, DOG
    let creative_type = parts[n - 2].to_string(); // e.g. BASIC, PROMO
    let raw_product = parts[2..n - 3].join(" ");
    let product = normalize_product_name(raw_product.trim());
    let product_variant = join_variant(&product, &variant);

    CampaignNaming {
        market,
        product,
        product_variant,
        variant,
        creative_type,
        naming_date,
        raw: name.to_string(),
    }
}

fn join_variant(product: &str, variant: &str) -> String {
    if variant.is_empty() {
        product.to_string()
    } else {
        format!("{product} {variant}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_convention() {
        let p = parse_campaign_name("CBO_ES_SMART_BALL_CAT_BASIC_20250216");
        assert_eq!(p.market, "ES");
        assert_eq!(p.product, "SMART BALL");
        assert_eq!(p.product_variant, "SMART BALL CAT");
        assert_eq!(p.variant, "CAT");
        assert_eq!(p.creative_type, "BASIC");
        assert_eq!(p.naming_date, "20250216");
    }

    #[test]
    fn test_multi_word_product_is_normalized() {
        let p = parse_campaign_name("CBO_IT_SILVERVINE_STICKS_CAT_PROMO_20250301");
        assert_eq!(p.product, "SILVERVINE DENTAL STICKS");
        assert_eq!(p.product_variant, "SILVERVINE DENTAL STICKS CAT");
    }

    #[test]
    fn test_short_five_part_form() {
        let p = parse_campaign_name("CBO_MX_DENTALWIPES_DOG_TESTING #7");
        assert_eq!(p.market, "MX");
        assert_eq!(p.product, "DENTAL WIPES");
        assert_eq!(p.variant, "DOG");
        assert_eq!(p.creative_type, "TESTING #7");
        assert_eq!(p.naming_date, "");
    }

    #[test]
    fn test_noisy_prefix_market_fallback() {
        assert_eq!(parse_campaign_name("[NEW] CBO_GR_X_Y_Z_20250101").market, "GR");
        assert_eq!(parse_campaign_name("CBO _HR_X_Y_Z_20250101").market, "HR");
        assert_eq!(
            parse_campaign_name("[NOT LIVE] CBO_HU_SMART_BALL_DOG_BASIC_20250405").market,
            "HU"
        );
    }

    #[test]
    fn test_too_few_parts_defaults_to_other() {
        let p = parse_campaign_name("CBO_FR_Retargeting");
        assert_eq!(p.market, "FR");
        assert_eq!(p.product, "Other");
        assert_eq!(p.variant, "");
    }

    #[test]
    fn test_unconventional_name() {
        let p = parse_campaign_name("Black Friday Push 2024");
        assert_eq!(p.market, "");
        assert_eq!(p.product, "Other");
        assert_eq!(p.raw, "Black Friday Push 2024");
    }

    #[test]
    fn test_empty_name() {
        let p = parse_campaign_name("");
        assert_eq!(p.product, "Other");
        assert_eq!(p.market, "");
    }

    #[test]
    fn test_lowercase_market_is_uppercased() {
        assert_eq!(parse_campaign_name("cbo_es_SMART_BALL_CAT_BASIC_20250216").market, "ES");
    }
}
