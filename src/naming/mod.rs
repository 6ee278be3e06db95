pub mod ad;
pub mod campaign;

pub use ad::{parse_ad_name, AdNaming};
pub use campaign::{parse_campaign_name, CampaignNaming};

/// Known spelling/spacing variants of product labels, collapsed to one
/// canonical form so the same product does not show up twice in reports.
/// Keys are matched lowercased, both space-squashed and as-is.
const PRODUCT_ALIASES: &[(&str, &str)] = &[
    ("silvervinesticks", "SILVERVINE DENTAL STICKS"),
    ("silvervinedentalsticks", "SILVERVINE DENTAL STICKS"),
    ("silvervine dental sticks", "SILVERVINE DENTAL STICKS"),
    ("bg silvervine dental sticks", "SILVERVINE DENTAL STICKS"),
    ("smartball", "SMART BALL"),
    ("smartbal", "SMART BALL"),
    ("smart ball", "SMART BALL"),
    ("pawtrimmer", "PAW TRIMMER"),
    ("paw trimmer", "PAW TRIMMER"),
    ("anti flea collar 12 months", "ANTI FLEA COLLAR 12 MONTHS"),
    ("barkingdevice", "BARKING DEVICE"),
    ("barking device", "BARKING DEVICE"),
    ("bundles", "BUNDLES"),
    ("pheromonediffuser", "PHEROMONE DIFFUSER"),
    ("lint reusable roller", "LINT REUSABLE ROLLER"),
    ("bg lint reusable roller", "LINT REUSABLE ROLLER"),
    ("dentalwipes", "DENTAL WIPES"),
    ("fingerwipes", "FINGER WIPES"),
    ("spiralscratch", "SPIRAL SCRATCH"),
    ("mist brush", "MIST BRUSH"),
];

fn alias_lookup(key: &str) -> Option<&'static str> {
    PRODUCT_ALIASES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
}

/// Collapse a raw product label to its canonical form.
///
/// Tries the space-squashed lowercase key first, then the plain lowercase
/// key; unknown labels pass through trimmed. Empty input yields "Other".
/// Idempotent: every canonical form maps back to itself.
pub fn normalize_product_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "Other".to_string();
    }
    let lower = trimmed.to_lowercase();
    let squashed: String = lower.split_whitespace().collect();
    alias_lookup(&squashed)
        .or_else(|| alias_lookup(&lower))
        .map(|s| s.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Product key for aggregation: normalized, with trailing landing-page /
/// product-page suffixes ("X LP", "X PDP") stripped so both funnel variants
/// roll up to one product.
pub fn normalize_product_key(label: &str) -> String {
    let mut s = normalize_product_name(label);
    loop {
        match strip_suffix_ci(&s, " LP").or_else(|| strip_suffix_ci(&s, " PDP")) {
            Some(stripped) => s = stripped.trim_end().to_string(),
            None => break,
        }
    }
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "Other".to_string()
    } else {
        collapsed
    }
}

fn strip_suffix_ci<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(suffix.len())?;
    if s.is_char_boundary(cut) && s[cut..].eq_ignore_ascii_case(suffix) {
        Some(&s[..cut])
    } else {
        None
    }
}

/// Extract the market code from an ad-account name.
///
/// Account convention: `BRAND MARKET MODEL CURRENCY`, e.g.
/// `VELUNAPETS SI COD $` → `SI`. Used as fallback when the campaign or ad
/// name itself carries no market token.
pub fn market_from_account(account_name: &str) -> String {
    let mut parts = account_name.trim().split_whitespace();
    let _brand = parts.next();
    match parts.next() {
        Some(code) if (2..=3).contains(&code.len()) => code.to_uppercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_known_aliases() {
        assert_eq!(
            normalize_product_name("SILVERVINESTICKS"),
            "SILVERVINE DENTAL STICKS"
        );
        assert_eq!(normalize_product_name("smart ball"), "SMART BALL");
        assert_eq!(normalize_product_name("SMARTBAL"), "SMART BALL");
        assert_eq!(
            normalize_product_name("BG Lint Reusable Roller"),
            "LINT REUSABLE ROLLER"
        );
        assert_eq!(
            normalize_product_name("Anti Flea Collar 12 Months"),
            "ANTI FLEA COLLAR 12 MONTHS"
        );
    }

    #[test]
    fn test_normalize_unknown_passes_through() {
        assert_eq!(normalize_product_name("  Laser Pointer "), "Laser Pointer");
        assert_eq!(normalize_product_name(""), "Other");
        assert_eq!(normalize_product_name("   "), "Other");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for (_, canonical) in PRODUCT_ALIASES {
            let once = normalize_product_name(canonical);
            assert_eq!(once, *canonical);
            assert_eq!(normalize_product_name(&once), once);
        }
        for raw in ["Laser Pointer", "SMARTBALL", "weird  spacing  name"] {
            let once = normalize_product_name(raw);
            assert_eq!(normalize_product_name(&once), once);
        }
    }

    #[test]
    fn test_normalize_key_strips_page_suffixes() {
        assert_eq!(normalize_product_key("SMART BALL LP"), "SMART BALL");
        assert_eq!(normalize_product_key("SMART BALL PDP"), "SMART BALL");
        assert_eq!(normalize_product_key("SMART BALL PDP PDP"), "SMART BALL");
        assert_eq!(normalize_product_key("SMARTBALL"), "SMART BALL");
        assert_eq!(normalize_product_key(""), "Other");
    }

    #[test]
    fn test_normalize_key_is_idempotent() {
        for raw in ["SMART BALL LP", "smartball", "PAW TRIMMER PDP", "Other"] {
            let once = normalize_product_key(raw);
            assert_eq!(normalize_product_key(&once), once);
        }
    }

    #[test]
    fn test_market_from_account() {
        assert_eq!(market_from_account("VELUNAPETS SI COD $"), "SI");
        assert_eq!(market_from_account("VELUNAPETS sk COD $"), "SK");
        assert_eq!(market_from_account("VELUNAPETS HUNGARY COD $"), "");
        assert_eq!(market_from_account("SINGLETOKEN"), "");
        assert_eq!(market_from_account(""), "");
    }
}
