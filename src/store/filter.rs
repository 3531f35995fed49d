//! Client-side filtering of the prompt collection.

use std::collections::BTreeSet;

use crate::api::types::{MediaType, Prompt};

/// Filter criteria. Ephemeral: never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
  pub platform: Option<String>,
  pub tool: Option<String>,
  pub media_type: Option<MediaType>,
  pub category: Option<String>,
  /// Matched against title, content and tags
  pub text: String,
  pub saved_only: bool,
}

impl FilterState {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

/// Prompts passing every set criterion, in their original order.
pub fn filter_prompts(
  prompts: &[Prompt],
  filters: &FilterState,
  saved_ids: &BTreeSet<String>,
) -> Vec<Prompt> {
  if filters.is_empty() {
    return prompts.to_vec();
  }

  let needle = filters.text.trim().to_lowercase();
  prompts
    .iter()
    .filter(|p| matches_opt(Some(&p.platform), filters.platform.as_deref()))
    .filter(|p| matches_opt(p.tool.as_deref(), filters.tool.as_deref()))
    .filter(|p| filters.media_type.map_or(true, |m| p.media_type == m))
    .filter(|p| matches_opt(p.category.as_deref(), filters.category.as_deref()))
    .filter(|p| !filters.saved_only || saved_ids.contains(&p.id))
    .filter(|p| needle.is_empty() || matches_text(p, &needle))
    .cloned()
    .collect()
}

fn matches_opt(value: Option<&str>, wanted: Option<&str>) -> bool {
  match wanted {
    None => true,
    Some(wanted) => value.is_some_and(|v| v.eq_ignore_ascii_case(wanted)),
  }
}

fn matches_text(prompt: &Prompt, needle: &str) -> bool {
  prompt.title.to_lowercase().contains(needle)
    || prompt.content.to_lowercase().contains(needle)
    || prompt.tags.iter().any(|t| t.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::prompt;

  #[test]
  fn test_empty_filter_passes_everything() {
    let prompts = vec![prompt("a", 1), prompt("b", 2)];
    let out = filter_prompts(&prompts, &FilterState::default(), &BTreeSet::new());
    assert_eq!(out, prompts);
  }

  #[test]
  fn test_criteria_combine() {
    let mut video = prompt("v", 1);
    video.media_type = MediaType::Video;
    video.platform = "Runway".into();
    let mut image = prompt("i", 2);
    image.platform = "runway".into();
    image.tags = vec!["Portrait".into()];

    let prompts = vec![video, image];
    let filters = FilterState {
      platform: Some("RUNWAY".into()),
      media_type: Some(MediaType::Image),
      ..FilterState::default()
    };
    let out = filter_prompts(&prompts, &filters, &BTreeSet::new());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, "i");

    let by_tag = FilterState {
      text: "portrait".into(),
      ..FilterState::default()
    };
    assert_eq!(filter_prompts(&prompts, &by_tag, &BTreeSet::new()).len(), 1);
  }

  #[test]
  fn test_saved_only_uses_saved_ids() {
    let prompts = vec![prompt("a", 1), prompt("b", 2)];
    let saved: BTreeSet<String> = ["b".to_string()].into_iter().collect();
    let filters = FilterState {
      saved_only: true,
      ..FilterState::default()
    };
    let out = filter_prompts(&prompts, &filters, &saved);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, "b");
  }
}
