//! Normalization of raw story payloads into [`StoryMetricRecord`]s.
//!
//! Navigation arrives in one of two shapes:
//!
//! ```text
//! {"name": "navigation", "total_value": {"value": 120, "breakdowns": [{
//!     "dimension_keys": ["story_navigation_action_type"],
//!     "results": [{"dimension_values": ["tap_forward"], "value": 80}, ...]}]}}
//!
//! {"name": "navigation", "values": [{"value": {"TAP_FORWARD": 80, ...}}]}
//! {"name": "navigation", "values": [{"value": 120}]}
//! ```
//!
//! Other metrics use `total_value.value` or `values[0].value`.

use chrono::{DateTime, Utc};
use graph_insights_client::types::STORY_METRICS;
use serde_json::{Map, Value};
use tracing::warn;

use storywatch_common::{Account, NavigationProvenance, StoryMetricRecord, StorywatchError};

use crate::metrics::{parse_graph_timestamp, RawStoryPayload};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Breakdown {
    taps_forward: u64,
    taps_back: u64,
    taps_exit: u64,
    swipe_forward: u64,
}

impl Breakdown {
    fn sum(&self) -> u64 {
        self.taps_forward + self.taps_back + self.taps_exit + self.swipe_forward
    }

    /// Record one action count. Returns false for action types outside the four tracked ones.
    fn set(&mut self, action: &str, count: u64) -> bool {
        match action.to_ascii_lowercase().as_str() {
            "tap_forward" => self.taps_forward = count,
            "tap_back" => self.taps_back = count,
            "tap_exit" => self.taps_exit = count,
            "swipe_forward" => self.swipe_forward = count,
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Default)]
struct NavigationReading {
    total: Option<u64>,
    breakdown: Option<Breakdown>,
}

/// Normalize one raw payload into a record.
///
/// Breakdown/total disagreement is flagged on the record and logged, never
/// treated as a parse failure.
pub fn normalize(
    account: Account,
    payload: &RawStoryPayload,
    fetched_at: DateTime<Utc>,
) -> Result<StoryMetricRecord, StorywatchError> {
    let story = payload
        .story
        .as_object()
        .ok_or_else(|| StorywatchError::parse(None, "story node is not an object"))?;
    let story_id = story
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StorywatchError::parse(None, "story node has no id"))?;
    let err = |msg: String| StorywatchError::parse(Some(story_id), msg);

    let posted_at = match story.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(
            parse_graph_timestamp(raw).ok_or_else(|| err(format!("unparseable timestamp '{raw}'")))?,
        ),
        Some(other) => return Err(err(format!("timestamp is not a string: {other}"))),
    };

    let nav = read_navigation(payload.navigation.as_deref()).map_err(&err)?;
    let metrics = read_metrics(&payload.metrics).map_err(&err)?;
    let metric = |name: &str| metrics.get(name).copied().unwrap_or(0);

    let (total, breakdown, provenance) = match (nav.total, nav.breakdown) {
        (total, Some(b)) => (total.unwrap_or_else(|| b.sum()), Some(b), NavigationProvenance::Breakdown),
        (Some(total), None) => (total, None, NavigationProvenance::TotalOnly),
        (None, None) => (0, Some(Breakdown::default()), NavigationProvenance::NotReported),
    };

    let mismatch = breakdown.is_some_and(|b| b.sum() != total);
    if mismatch {
        warn!(
            %account,
            story_id,
            total,
            breakdown_sum = breakdown.map(|b| b.sum()).unwrap_or_default(),
            "Navigation breakdown does not sum to total"
        );
    }

    let views = metric("views");
    let replies = metric("replies");
    let rate = |count: Option<u64>| {
        count
            .filter(|_| views > 0)
            .map(|c| ((c as f64 / views as f64) * 10_000.0).round() / 100.0)
    };

    Ok(StoryMetricRecord {
        account_id: account,
        story_id: story_id.to_string(),
        fetched_at,
        posted_at,
        media_type: string_field(story, "media_type"),
        permalink: string_field(story, "permalink"),
        views,
        reach: metric("reach"),
        navigation_total: total,
        navigation_taps_forward: breakdown.map(|b| b.taps_forward),
        navigation_taps_back: breakdown.map(|b| b.taps_back),
        navigation_taps_exit: breakdown.map(|b| b.taps_exit),
        navigation_swipe_forward: breakdown.map(|b| b.swipe_forward),
        navigation_provenance: provenance,
        navigation_mismatch: mismatch,
        replies,
        shares: metric("shares"),
        total_interactions: metric("total_interactions"),
        profile_visits: metric("profile_visits"),
        follows: metric("follows"),
        exit_rate: rate(breakdown.map(|b| b.taps_exit)),
        reply_rate: rate(Some(replies)),
        forward_rate: rate(breakdown.map(|b| b.taps_forward + b.swipe_forward)),
        back_rate: rate(breakdown.map(|b| b.taps_back)),
    })
}

fn string_field(story: &Map<String, Value>, key: &str) -> Option<String> {
    story.get(key).and_then(Value::as_str).map(str::to_string)
}

fn count(value: &Value, what: &str) -> Result<u64, String> {
    value
        .as_u64()
        .ok_or_else(|| format!("{what} is not a non-negative integer: {value}"))
}

fn read_navigation(entries: Option<&[Value]>) -> Result<NavigationReading, String> {
    let Some(entry) = entries
        .unwrap_or_default()
        .iter()
        .find(|e| e.get("name").and_then(Value::as_str) == Some("navigation"))
    else {
        return Ok(NavigationReading::default());
    };

    if let Some(total_value) = entry.get("total_value") {
        let total = match total_value.get("value") {
            None | Some(Value::Null) => None,
            Some(v) => Some(count(v, "navigation total")?),
        };
        let breakdown = match total_value.get("breakdowns").and_then(Value::as_array) {
            Some(breakdowns) => read_breakdown_results(breakdowns)?,
            None => None,
        };
        return Ok(NavigationReading { total, breakdown });
    }

    let value = entry
        .get("values")
        .and_then(Value::as_array)
        .and_then(|v| v.first())
        .and_then(|v| v.get("value"));

    match value {
        None | Some(Value::Null) => Ok(NavigationReading::default()),
        Some(Value::Object(actions)) => {
            let mut breakdown = Breakdown::default();
            let mut total = 0;
            for (action, n) in actions {
                let n = count(n, &format!("navigation {action}"))?;
                breakdown.set(action, n);
                total += n;
            }
            Ok(NavigationReading {
                total: Some(total),
                breakdown: Some(breakdown),
            })
        }
        Some(v) => Ok(NavigationReading {
            total: Some(count(v, "navigation total")?),
            breakdown: None,
        }),
    }
}

fn read_breakdown_results(breakdowns: &[Value]) -> Result<Option<Breakdown>, String> {
    let mut breakdown = Breakdown::default();
    let mut seen = false;

    for result in breakdowns
        .iter()
        .filter_map(|b| b.get("results").and_then(Value::as_array))
        .flatten()
    {
        let action = result
            .get("dimension_values")
            .and_then(Value::as_array)
            .and_then(|d| d.first())
            .and_then(Value::as_str)
            .ok_or_else(|| format!("breakdown result without dimension value: {result}"))?;
        let n = count(
            result.get("value").unwrap_or(&Value::Null),
            &format!("navigation {action}"),
        )?;
        seen |= breakdown.set(action, n);
    }

    Ok(seen.then_some(breakdown))
}

fn read_metrics(entries: &[Value]) -> Result<std::collections::HashMap<&'static str, u64>, String> {
    let mut out = std::collections::HashMap::new();
    for entry in entries {
        let obj = entry
            .as_object()
            .ok_or_else(|| format!("metric entry is not an object: {entry}"))?;
        let Some(name) = obj.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(known) = STORY_METRICS.iter().find(|m| **m == name) else {
            continue;
        };
        let value = obj
            .get("total_value")
            .and_then(|t| t.get("value"))
            .or_else(|| {
                obj.get("values")
                    .and_then(Value::as_array)
                    .and_then(|v| v.first())
                    .and_then(|v| v.get("value"))
            });
        let n = match value {
            None | Some(Value::Null) => 0,
            Some(v) => count(v, name)?,
        };
        out.insert(*known, n);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(navigation: Option<Value>, metrics: Value) -> RawStoryPayload {
        RawStoryPayload {
            story: json!({
                "id": "17900000001",
                "timestamp": "2024-03-01T18:22:10+0000",
                "media_type": "IMAGE",
                "permalink": "https://instagram.com/stories/npi/17900000001",
            }),
            navigation: navigation.map(|n| vec![n]),
            metrics: metrics.as_array().cloned().unwrap_or_default(),
        }
    }

    fn basic_metrics() -> Value {
        json!([
            {"name": "views", "values": [{"value": 1000}]},
            {"name": "reach", "values": [{"value": 800}]},
            {"name": "replies", "values": [{"value": 10}]},
            {"name": "shares", "total_value": {"value": 4}},
        ])
    }

    fn normalize_ok(p: &RawStoryPayload) -> StoryMetricRecord {
        normalize(Account::Npi, p, Utc::now()).expect("payload should normalize")
    }

    // ---------------------------------------------------------------------------
    // Navigation shapes
    // ---------------------------------------------------------------------------

    #[test]
    fn modern_breakdown_is_copied_verbatim() {
        let nav = json!({
            "name": "navigation",
            "total_value": {
                "value": 120,
                "breakdowns": [{
                    "dimension_keys": ["story_navigation_action_type"],
                    "results": [
                        {"dimension_values": ["tap_forward"], "value": 70},
                        {"dimension_values": ["tap_back"], "value": 20},
                        {"dimension_values": ["tap_exit"], "value": 50},
                        {"dimension_values": ["swipe_forward"], "value": 10},
                    ]
                }]
            }
        });
        let record = normalize_ok(&payload(Some(nav), basic_metrics()));

        assert_eq!(record.navigation_provenance, NavigationProvenance::Breakdown);
        assert_eq!(record.navigation_total, 120, "total comes from the API");
        assert_eq!(record.navigation_taps_forward, Some(70));
        assert_eq!(record.navigation_taps_exit, Some(50));
        assert!(record.navigation_mismatch, "70+20+50+10 != 120");
    }

    #[test]
    fn consistent_breakdown_is_not_flagged() {
        let nav = json!({
            "name": "navigation",
            "total_value": {
                "value": 100,
                "breakdowns": [{"results": [
                    {"dimension_values": ["TAP_FORWARD"], "value": 60},
                    {"dimension_values": ["TAP_BACK"], "value": 10},
                    {"dimension_values": ["TAP_EXIT"], "value": 25},
                    {"dimension_values": ["SWIPE_FORWARD"], "value": 5},
                ]}]
            }
        });
        let record = normalize_ok(&payload(Some(nav), basic_metrics()));

        assert!(!record.navigation_mismatch);
        assert_eq!(record.breakdown_sum(), Some(record.navigation_total));
    }

    #[test]
    fn legacy_object_breakdown_sums_to_total() {
        let nav = json!({
            "name": "navigation",
            "values": [{"value": {"TAP_FORWARD": 30, "TAP_BACK": 5, "TAP_EXIT": 50, "SWIPE_FORWARD": 15}}]
        });
        let record = normalize_ok(&payload(Some(nav), basic_metrics()));

        assert_eq!(record.navigation_total, 100);
        assert_eq!(record.breakdown_sum(), Some(100));
        assert_eq!(record.exit_rate, Some(5.0));
        assert_eq!(record.forward_rate, Some(4.5));
        assert_eq!(record.back_rate, Some(0.5));
    }

    #[test]
    fn total_only_leaves_breakdown_unknown() {
        let nav = json!({"name": "navigation", "values": [{"value": 42}]});
        let record = normalize_ok(&payload(Some(nav), basic_metrics()));

        assert_eq!(record.navigation_provenance, NavigationProvenance::TotalOnly);
        assert_eq!(record.navigation_total, 42);
        assert_eq!(record.navigation_taps_forward, None);
        assert_eq!(record.navigation_swipe_forward, None);
        assert_eq!(record.breakdown_sum(), None);
        assert_eq!(record.exit_rate, None);
        assert_eq!(record.reply_rate, Some(1.0));
    }

    #[test]
    fn missing_navigation_is_zero_but_not_measured() {
        let record = normalize_ok(&payload(None, basic_metrics()));

        assert_eq!(record.navigation_provenance, NavigationProvenance::NotReported);
        assert_eq!(record.navigation_total, 0);
        assert_eq!(record.navigation_taps_back, Some(0));
        assert!(!record.navigation_mismatch);
    }

    #[test]
    fn measured_zero_differs_from_not_reported() {
        let nav = json!({
            "name": "navigation",
            "total_value": {"value": 0, "breakdowns": [{"results": [
                {"dimension_values": ["tap_forward"], "value": 0},
            ]}]}
        });
        let measured = normalize_ok(&payload(Some(nav), basic_metrics()));
        let absent = normalize_ok(&payload(None, basic_metrics()));

        assert_eq!(measured.navigation_total, absent.navigation_total);
        assert_ne!(measured.navigation_provenance, absent.navigation_provenance);
    }

    // ---------------------------------------------------------------------------
    // Other metrics
    // ---------------------------------------------------------------------------

    #[test]
    fn absent_metrics_default_to_zero() {
        let record = normalize_ok(&payload(None, basic_metrics()));

        assert_eq!(record.views, 1000);
        assert_eq!(record.reach, 800);
        assert_eq!(record.shares, 4);
        assert_eq!(record.follows, 0);
        assert_eq!(record.profile_visits, 0);
        assert_eq!(record.media_type.as_deref(), Some("IMAGE"));
    }

    #[test]
    fn zero_views_leave_rates_null() {
        let record = normalize_ok(&payload(None, json!([{"name": "views", "values": [{"value": 0}]}])));
        assert_eq!(record.reply_rate, None);
        assert_eq!(record.exit_rate, None);
    }

    // ---------------------------------------------------------------------------
    // Malformed payloads
    // ---------------------------------------------------------------------------

    #[test]
    fn missing_id_is_parse_error() {
        let mut p = payload(None, basic_metrics());
        p.story = json!({"timestamp": "2024-03-01T18:22:10+0000"});
        let err = normalize(Account::Npi, &p, Utc::now()).unwrap_err();
        assert_eq!(err.kind(), "record_parse_error");
    }

    #[test]
    fn negative_metric_is_parse_error() {
        let p = payload(None, json!([{"name": "views", "values": [{"value": -3}]}]));
        let err = normalize(Account::Npi, &p, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("views"));
    }

    #[test]
    fn bad_timestamp_is_parse_error() {
        let mut p = payload(None, basic_metrics());
        p.story["timestamp"] = json!("last tuesday");
        assert!(normalize(Account::Npi, &p, Utc::now()).is_err());
    }

    #[test]
    fn string_breakdown_count_is_parse_error() {
        let nav = json!({"name": "navigation", "values": [{"value": {"TAP_EXIT": "many"}}]});
        assert!(normalize(Account::Npi, &payload(Some(nav), basic_metrics()), Utc::now()).is_err());
    }
}
