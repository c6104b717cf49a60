//! The higher-order category taxonomy offered to the rewriter LLM,
//! mapped to the concrete category names persisted with the chunks.

/// Higher-order name to persisted category names.
pub const CATEGORY_MAP: &[(&str, &[&str])] = &[
    ("العقيدة", &["العقيدة", "الفرق والردود", "كتب السنة", "الجوامع"]),
    ("التفسير", &["التفسير", "علوم القرآن وأصول التفسير"]),
    ("التجويد والقراءات", &["التجويد والقراءات"]),
    (
        "كتب الحديث و الشروح",
        &["كتب السنة", "شروح الحديث", "التخريج والأطراف"],
    ),
    (
        "علوم الحديث والعلل",
        &["العلل والسؤلات الحديثية", "علوم الحديث"],
    ),
    (
        "الفقة",
        &[
            "أصول الفقه",
            "علوم الفقه والقواعد الفقهية",
            "الفقه الحنفي",
            "الفقه المالكي",
            "الفقه الشافعي",
            "الفقه الحنبلي",
            "الفقه العام",
            "مسائل فقهية",
            "السياسة الشرعية والقضاء",
            "الفرائض والوصايا",
            "الفتاوى",
            "الجوامع",
        ],
    ),
    ("السيرة النبوية", &["السيرة النبوية"]),
    ("التاريخ", &["التاريخ"]),
    ("التراجم والطبقات", &["التراجم والطبقات"]),
    ("اللغة والأدب", &["الغريب والمعاجم", "النحو والصرف", "الأدب"]),
];

/// The higher-order names, for the prompt template.
#[must_use]
pub fn higher_order_categories() -> Vec<&'static str> {
    CATEGORY_MAP.iter().map(|(name, _)| *name).collect()
}

/// Resolve higher-order names to persisted category names. Unknown
/// names are dropped silently; the LLM occasionally invents one.
#[must_use]
pub fn resolve_categories(higher_order: &[String]) -> Vec<String> {
    let mut resolved = Vec::new();
    for name in higher_order {
        if let Some((_, concrete)) = CATEGORY_MAP.iter().find(|(ho, _)| ho == name) {
            resolved.extend(concrete.iter().map(|s| (*s).to_string()));
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_higher_order_names_listed() {
        let names = higher_order_categories();
        assert_eq!(names.len(), CATEGORY_MAP.len());
        assert!(names.contains(&"الفقة"));
        assert!(names.contains(&"التفسير"));
    }

    #[test]
    fn test_resolution_expands() {
        let resolved = resolve_categories(&["التفسير".to_string()]);
        assert_eq!(resolved, vec!["التفسير", "علوم القرآن وأصول التفسير"]);
    }

    #[test]
    fn test_unknown_names_dropped() {
        let resolved = resolve_categories(&["الفلك".to_string(), "التاريخ".to_string()]);
        assert_eq!(resolved, vec!["التاريخ"]);
    }
}
