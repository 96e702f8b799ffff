// puc-core/src/ranking.rs
//! Pure preference ordering between two announcements filling the same slot.
use std::sync::Arc;

use puc_common::dependency::definition::{DRIVER_CLASS_PROPERTY, PERSISTENCE_PROVIDER_PROPERTY};
use puc_common::model::Announcement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    First,
    Second,
    /// At least one side lacks the metadata the rule ranks by.
    Incomparable,
}

/// What a slot ranks its candidates by. Arrival order (lower announcement id)
/// always breaks the remaining ties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingRule {
    /// Property an announcement must carry to be a candidate at all.
    pub required_property: Option<String>,
    /// Compare `service.ranking` before arrival order, higher first.
    pub use_service_ranking: bool,
}

impl RankingRule {
    pub fn arrival_order() -> Self {
        Self::default()
    }

    pub fn service_ranking() -> Self {
        Self {
            required_property: None,
            use_service_ranking: true,
        }
    }

    pub fn requiring(property: impl Into<String>) -> Self {
        Self {
            required_property: Some(property.into()),
            use_service_ranking: false,
        }
    }

    pub fn with_service_ranking(mut self) -> Self {
        self.use_service_ranking = true;
        self
    }

    pub fn persistence_provider() -> Self {
        Self::requiring(PERSISTENCE_PROVIDER_PROPERTY).with_service_ranking()
    }

    pub fn data_source_factory() -> Self {
        Self::requiring(DRIVER_CLASS_PROPERTY)
    }
}

pub fn is_rankable(announcement: &Announcement, rule: &RankingRule) -> bool {
    match &rule.required_property {
        Some(key) => announcement.property_str(key).is_some_and(|v| !v.is_empty()),
        None => true,
    }
}

pub fn compare(a: &Announcement, b: &Announcement, rule: &RankingRule) -> Preference {
    if !is_rankable(a, rule) || !is_rankable(b, rule) {
        return Preference::Incomparable;
    }
    if rule.use_service_ranking {
        let (ra, rb) = (a.service_ranking(), b.service_ranking());
        if ra != rb {
            return if ra > rb {
                Preference::First
            } else {
                Preference::Second
            };
        }
    }
    if a.id <= b.id {
        Preference::First
    } else {
        Preference::Second
    }
}

/// The most preferred of `candidates`; incomparable candidates never win.
pub fn best<'a, I>(candidates: I, rule: &RankingRule) -> Option<&'a Arc<Announcement>>
where
    I: IntoIterator<Item = &'a Arc<Announcement>>,
{
    candidates
        .into_iter()
        .filter(|c| is_rankable(c, rule))
        .fold(None, |best, candidate| match best {
            Some(current) if compare(candidate, current, rule) != Preference::First => {
                Some(current)
            }
            _ => Some(candidate),
        })
}
