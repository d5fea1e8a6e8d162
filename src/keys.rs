//! Cache-key construction.
//!
//! Every field is written as `<byte length>:<text>` so no field value can
//! shift a boundary, whatever characters it contains. Field order is part
//! of the key: callers pass fields in one fixed order per class.

use std::fmt::{self, Display};

use crate::types::HotParams;

/// The three TTL classes of cached answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheClass {
    Search,
    Id,
    Hot,
}

impl CacheClass {
    pub const ALL: [CacheClass; 3] = [CacheClass::Search, CacheClass::Id, CacheClass::Hot];

    pub fn tag(self) -> &'static str {
        match self {
            CacheClass::Search => "search",
            CacheClass::Id => "id",
            CacheClass::Hot => "hot",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }
}

impl Display for CacheClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A cache key. The class travels next to the text, so class-wide
/// operations never inspect the text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub class: CacheClass,
    pub text: String,
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.class, self.text)
    }
}

pub fn build_key(class: CacheClass, fields: &[&dyn Display]) -> CacheKey {
    let mut text = String::new();
    for (i, field) in fields.iter().enumerate() {
        let value = field.to_string();
        if i > 0 {
            text.push('|');
        }
        text.push_str(&format!("{}:{}", value.len(), value));
    }
    CacheKey { class, text }
}

pub fn search_key(keyword: &str, page: u32, include_adult: bool) -> CacheKey {
    build_key(CacheClass::Search, &[&keyword, &page, &include_adult])
}

pub fn id_key(source_key: &str, vod_id: u64, episode_index: usize) -> CacheKey {
    build_key(CacheClass::Id, &[&source_key, &vod_id, &episode_index])
}

pub fn hot_key(params: &HotParams) -> CacheKey {
    build_key(
        CacheClass::Hot,
        &[
            &params.kind,
            &params.tag,
            &params.sort,
            &params.page_limit,
            &params.page_start,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let a = search_key("进击的巨人", 1, false);
        let b = search_key("进击的巨人", 1, false);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(id_key("lzzy", 42, 3), id_key("lzzy", 42, 3));
    }

    #[test]
    fn test_separator_in_field_cannot_collide() {
        let left = build_key(CacheClass::Search, &[&"a|b", &"c"]);
        let right = build_key(CacheClass::Search, &[&"a", &"b|c"]);
        assert_ne!(left, right);

        let left = build_key(CacheClass::Search, &[&"1:a", &""]);
        let right = build_key(CacheClass::Search, &[&"", &"1:a"]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_field_order_and_class_matter() {
        assert_ne!(search_key("x", 1, true), search_key("x", 1, false));
        assert_ne!(
            build_key(CacheClass::Id, &[&"a", &"b"]),
            build_key(CacheClass::Id, &[&"b", &"a"])
        );
        let fields: [&dyn Display; 2] = [&"omo", &7];
        assert_ne!(
            build_key(CacheClass::Id, &fields),
            build_key(CacheClass::Search, &fields)
        );
    }

    #[test]
    fn test_hot_key_uses_all_params() {
        let base = HotParams::default();
        let other = HotParams {
            page_start: "16".into(),
            ..base.clone()
        };
        assert_eq!(hot_key(&base), hot_key(&HotParams::default()));
        assert_ne!(hot_key(&base), hot_key(&other));
        assert_eq!(hot_key(&base).text, "5:movie|6:热门|9:recommend|2:16|1:0");
    }

    #[test]
    fn test_class_tags_round_trip() {
        for class in CacheClass::ALL {
            assert_eq!(CacheClass::from_tag(class.tag()), Some(class));
        }
        assert_eq!(CacheClass::from_tag("bogus"), None);
    }
}
