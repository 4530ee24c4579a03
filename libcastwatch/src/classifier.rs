//! Item classification
//!
//! Classifiers decide whether an item is worth announcing at all. They are
//! pure predicates: the engine calls them at most once per item per cycle
//! and treats an error exactly like a rejection.

use crate::config::ClassifierConfig;
use crate::error::ClassifierError;
use crate::types::Item;

/// Accept/reject predicate over an item
pub trait ItemClassifier: Send + Sync {
    fn accept(&self, item: &Item) -> Result<bool, ClassifierError>;
}

/// Accepts every item
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ItemClassifier for AcceptAll {
    fn accept(&self, _item: &Item) -> Result<bool, ClassifierError> {
        Ok(true)
    }
}

/// Wraps a closure as a classifier
pub struct FnClassifier<F>(pub F);

impl<F> ItemClassifier for FnClassifier<F>
where
    F: Fn(&Item) -> Result<bool, ClassifierError> + Send + Sync,
{
    fn accept(&self, item: &Item) -> Result<bool, ClassifierError> {
        (self.0)(item)
    }
}

/// Rule-based classifier driven by the `[classifier]` config section
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier {
    min_duration_secs: Option<u64>,
    exclude_live: bool,
    exclude_tags: Vec<String>,
    exclude_title_keywords: Vec<String>,
}

impl RuleClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            min_duration_secs: config.min_duration_secs,
            exclude_live: config.exclude_live,
            exclude_tags: config.exclude_tags.iter().map(|t| normalize_tag(t)).collect(),
            exclude_title_keywords: config
                .exclude_title_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

/// Lowercase and strip a leading `#` so "#Shorts" and "shorts" match
fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

impl ItemClassifier for RuleClassifier {
    fn accept(&self, item: &Item) -> Result<bool, ClassifierError> {
        if let Some(min) = self.min_duration_secs {
            let duration = item.facts.duration_secs.ok_or_else(|| {
                ClassifierError(format!("duration of item {} is unknown", item.id))
            })?;
            if duration < min {
                return Ok(false);
            }
        }

        if self.exclude_live && item.facts.live {
            return Ok(false);
        }

        if item
            .facts
            .tags
            .iter()
            .map(|t| normalize_tag(t))
            .any(|t| self.exclude_tags.contains(&t))
        {
            return Ok(false);
        }

        let title = item.title.to_lowercase();
        if self
            .exclude_title_keywords
            .iter()
            .any(|k| title.contains(k.as_str()))
        {
            return Ok(false);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(config: ClassifierConfig) -> RuleClassifier {
        RuleClassifier::from_config(&config)
    }

    #[test]
    fn test_default_rules_accept_everything() {
        let classifier = rules(ClassifierConfig::default());
        assert!(classifier.accept(&Item::new("v1", "Anything")).unwrap());
    }

    #[test]
    fn test_too_short_rejected() {
        let classifier = rules(ClassifierConfig {
            min_duration_secs: Some(60),
            ..Default::default()
        });

        assert!(!classifier.accept(&Item::new("v1", "Clip").with_duration(30)).unwrap());
        assert!(classifier.accept(&Item::new("v2", "Video").with_duration(60)).unwrap());
    }

    #[test]
    fn test_unknown_duration_is_error() {
        let classifier = rules(ClassifierConfig {
            min_duration_secs: Some(60),
            ..Default::default()
        });

        let err = classifier.accept(&Item::new("v1", "Mystery")).unwrap_err();
        assert!(err.to_string().contains("v1"));
    }

    #[test]
    fn test_excluded_tags_match_case_and_hash_insensitively() {
        let classifier = rules(ClassifierConfig {
            exclude_tags: vec!["#Shorts".to_string()],
            ..Default::default()
        });

        let tagged = Item::new("v1", "Quick one").with_tags(&["shorts", "gaming"]);
        assert!(!classifier.accept(&tagged).unwrap());

        let hashed = Item::new("v2", "Quick two").with_tags(&["#SHORTS"]);
        assert!(!classifier.accept(&hashed).unwrap());

        let other = Item::new("v3", "Long one").with_tags(&["gaming"]);
        assert!(classifier.accept(&other).unwrap());
    }

    #[test]
    fn test_live_and_title_keywords() {
        let classifier = rules(ClassifierConfig {
            exclude_live: true,
            exclude_title_keywords: vec!["Off-Topic".to_string()],
            ..Default::default()
        });

        let mut live = Item::new("v1", "Streaming now");
        live.facts.live = true;
        assert!(!classifier.accept(&live).unwrap());

        assert!(!classifier
            .accept(&Item::new("v2", "[off-topic] cooking"))
            .unwrap());
        assert!(classifier.accept(&Item::new("v3", "Episode 3")).unwrap());
    }

    #[test]
    fn test_fn_classifier() {
        let classifier = FnClassifier(|item: &Item| -> Result<bool, ClassifierError> {
            Ok(item.id != "v2")
        });
        assert!(classifier.accept(&Item::new("v1", "a")).unwrap());
        assert!(!classifier.accept(&Item::new("v2", "b")).unwrap());
    }
}
