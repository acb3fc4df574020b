//! Run reporting: consolidation, aggregates, cumulative report, and the
//! value-history time series. Read-only over the store.

use chrono::{DateTime, Duration, DurationRound, Utc};
use embertrack::event_models::EventContext;
use serde::Serialize;

use crate::data::{zones, BASE_CURRENCY_ID};
use crate::error::StoreError;
use crate::store::{Run, Store};
use crate::valuation::{self, LootEntry};

/// One run as presented to the boundary, possibly consolidating several
/// store rows from the same map instance.
#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub id: i64,
    pub zone_name: String,
    pub zone_signature: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub is_sub_zone: bool,
    pub base_gained: i64,
    pub total_value_fe: f64,
    pub loot: Vec<LootEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consolidated_run_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_cost_fe: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_cost_items: Option<Vec<LootEntry>>,
    pub map_cost_has_unpriced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_value_fe: Option<f64>,
}

/// Duration of a run minus any spliced sub-run intervals, so presentation
/// totals never double-count excursions.
pub fn run_duration_excluding_subs(
    store: &Store,
    run: &Run,
    now: DateTime<Utc>,
) -> Result<f64, StoreError> {
    let mut seconds = run.duration_seconds(now);
    let end = run.end_ts.unwrap_or(now);
    for child in store.child_runs(run.id)? {
        let child_start = child.start_ts.max(run.start_ts);
        let child_end = child.end_ts.unwrap_or(now).min(end);
        if child_end > child_start {
            seconds -= (child_end - child_start).num_milliseconds() as f64 / 1000.0;
        }
    }
    Ok(seconds.max(0.0))
}

struct ValuationOptions {
    tax_multiplier: f64,
    map_costs_enabled: bool,
}

impl ValuationOptions {
    fn load(store: &Store) -> Result<Self, StoreError> {
        Ok(Self {
            tax_multiplier: store.trade_tax_multiplier()?,
            map_costs_enabled: store.setting_flag("map_costs_enabled")?,
        })
    }
}

fn build_view(
    store: &Store,
    scope: &str,
    season_id: i64,
    group: &[&Run],
    opts: &ValuationOptions,
    now: DateTime<Utc>,
) -> Result<Option<RunView>, StoreError> {
    let Some(first) = group.iter().min_by_key(|r| r.start_ts) else {
        return Ok(None);
    };
    let last_end = group.iter().filter_map(|r| r.end_ts).max();

    let mut summary: std::collections::HashMap<i64, i64> = std::collections::HashMap::new();
    let mut cost_summary: std::collections::HashMap<i64, i64> = std::collections::HashMap::new();
    let mut base_gained = 0;
    let mut gross = 0.0;
    let mut cost = 0.0;
    let mut cost_unpriced = false;
    let mut duration = 0.0;

    for run in group {
        for (type_id, qty) in store.run_summary(run.id, EventContext::PickItems)? {
            *summary.entry(type_id).or_default() += qty;
        }
        let value = valuation::value_run(store, scope, season_id, run.id, opts.tax_multiplier)?;
        base_gained += value.base_gained;
        gross += value.gross_fe;
        duration += run_duration_excluding_subs(store, run, now)?;
        if opts.map_costs_enabled {
            for (type_id, qty) in store.run_summary(run.id, EventContext::MapOpen)? {
                *cost_summary.entry(type_id).or_default() += qty;
            }
            cost += value.map_cost_fe;
            cost_unpriced |= value.cost_has_unpriced;
        }
    }

    let summary: Vec<(i64, i64)> = summary.into_iter().collect();
    let loot = valuation::build_loot(store, scope, season_id, &summary, opts.tax_multiplier)?;

    let (map_cost_fe, map_cost_items, net) = if opts.map_costs_enabled {
        let cost_summary: Vec<(i64, i64)> = cost_summary.into_iter().collect();
        // Costs are shown untaxed: the tax models a future sale.
        let items = valuation::build_loot(store, scope, season_id, &cost_summary, 1.0)?;
        (
            Some(round2(cost)),
            Some(items),
            Some(round2(gross - cost)),
        )
    } else {
        (None, None, None)
    };

    let ids: Vec<i64> = group.iter().map(|r| r.id).collect();
    Ok(Some(RunView {
        id: first.id,
        zone_name: zones::display_name(&first.zone_signature, first.level_id),
        zone_signature: first.zone_signature.clone(),
        start_ts: first.start_ts,
        end_ts: if group.iter().any(|r| r.end_ts.is_none()) {
            None
        } else {
            last_end
        },
        duration_seconds: round2(duration),
        is_sub_zone: first.is_sub_zone,
        base_gained,
        total_value_fe: round2(gross),
        loot,
        consolidated_run_ids: (ids.len() > 1).then_some(ids),
        map_cost_fe,
        map_cost_items,
        map_cost_has_unpriced: cost_unpriced,
        net_value_fe: net,
    }))
}

/// Consolidate store rows into presentation runs.
///
/// Consecutive non-hub rows sharing a LevelUid merge into one view (the
/// game re-logs a map instance on each checkpoint). Hub rows break the
/// grouping and are dropped from the output; sub-zone rows surface as their
/// own entries without breaking the group around them.
pub fn consolidated_runs(
    store: &Store,
    scope: &str,
    season_id: i64,
    fetch_limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<RunView>, StoreError> {
    let opts = ValuationOptions::load(store)?;
    let mut rows = store.recent_runs(scope, fetch_limit)?;
    rows.sort_by_key(|r| r.start_ts);

    let mut groups: Vec<Vec<&Run>> = Vec::new();
    let mut current: Vec<&Run> = Vec::new();
    let mut current_uid: Option<i64> = None;

    for run in &rows {
        if run.is_hub {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_uid = None;
            }
        } else if run.is_sub_zone {
            // Surfaces on its own; the surrounding map parts recombine.
            groups.push(vec![run]);
        } else if run.level_uid.is_some() && run.level_uid == current_uid {
            current.push(run);
        } else {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            current_uid = run.level_uid;
            current.push(run);
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let mut views = Vec::with_capacity(groups.len());
    for group in &groups {
        if let Some(view) = build_view(store, scope, season_id, group, &opts, now)? {
            views.push(view);
        }
    }
    views.sort_by_key(|v| std::cmp::Reverse(v.start_ts));
    Ok(views)
}

/// Aggregates across all runs since the last reset.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub total_runs: i64,
    pub total_base: i64,
    pub total_value_fe: f64,
    pub avg_value_per_run: f64,
    pub total_duration_seconds: f64,
    pub map_duration_seconds: f64,
    pub base_per_hour: f64,
    pub value_per_hour: f64,
    pub realtime_tracking: bool,
    pub realtime_paused: bool,
}

pub fn run_stats(
    store: &Store,
    scope: &str,
    season_id: i64,
    now: DateTime<Utc>,
) -> Result<RunStats, StoreError> {
    let opts = ValuationOptions::load(store)?;
    let runs = store.recent_runs(scope, 1000)?;
    let tracked: Vec<&Run> = runs.iter().filter(|r| !r.is_hub).collect();

    let mut total_base = 0i64;
    let mut total_value = 0.0;
    let mut total_cost = 0.0;
    let mut map_duration = 0.0;

    for run in &tracked {
        let value = valuation::value_run(store, scope, season_id, run.id, opts.tax_multiplier)?;
        total_base += value.base_gained;
        total_value += value.gross_fe;
        if opts.map_costs_enabled {
            total_cost += value.map_cost_fe;
        }
        // Sub-runs report their own time; outer runs subtract it.
        map_duration += run_duration_excluding_subs(store, run, now)?;
    }

    let net_value = total_value - total_cost;
    let realtime_tracking = store.setting_flag("realtime_tracking_enabled")?;
    let realtime_paused = store.setting_flag("realtime_paused")?;

    // Default denominator: summed in-map time. Realtime mode swaps in the
    // wall-clock span since the first run minus accumulated paused time.
    let mut total_duration = map_duration;
    if realtime_tracking {
        if let Some(first_start) = tracked.iter().map(|r| r.start_ts).min() {
            let elapsed = (now - first_start).num_milliseconds() as f64 / 1000.0;
            let mut paused: f64 = store
                .get_setting("realtime_total_paused_seconds")?
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            if realtime_paused {
                if let Some(start) = store.get_setting("realtime_pause_start")? {
                    if let Ok(ts) = DateTime::parse_from_rfc3339(&start) {
                        paused += (now - ts.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0;
                    }
                }
            }
            total_duration = (elapsed - paused).max(0.0);
        }
    }

    let total_runs = tracked.len() as i64;
    let per_hour = |v: f64| {
        if total_duration > 0.0 {
            v / total_duration * 3600.0
        } else {
            0.0
        }
    };

    Ok(RunStats {
        total_runs,
        total_base,
        total_value_fe: round2(net_value),
        avg_value_per_run: if total_runs > 0 {
            round2(net_value / total_runs as f64)
        } else {
            0.0
        },
        total_duration_seconds: round2(total_duration),
        map_duration_seconds: round2(map_duration),
        base_per_hour: round2(per_hour(total_base as f64)),
        value_per_hour: round2(per_hour(net_value)),
        realtime_tracking,
        realtime_paused,
    })
}

/// Cumulative loot report since the last reset.
#[derive(Debug, Clone, Serialize)]
pub struct LootReport {
    pub items: Vec<ReportItem>,
    pub total_value_fe: f64,
    pub total_map_cost_fe: f64,
    pub profit_fe: f64,
    pub run_count: i64,
    pub total_duration_seconds: f64,
    pub profit_per_hour: f64,
    pub profit_per_map: f64,
    pub map_costs_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportItem {
    #[serde(flatten)]
    pub entry: LootEntry,
    pub percentage: Option<f64>,
}

pub fn loot_report(
    store: &Store,
    scope: &str,
    season_id: i64,
    now: DateTime<Utc>,
) -> Result<LootReport, StoreError> {
    let opts = ValuationOptions::load(store)?;
    let cumulative = store.cumulative_loot(scope)?;
    let entries = valuation::build_loot(store, scope, season_id, &cumulative, opts.tax_multiplier)?;

    let total_value: f64 = entries.iter().filter_map(|e| e.total_value_fe).sum();
    let mut items: Vec<ReportItem> = entries
        .into_iter()
        .map(|entry| {
            let percentage = entry.total_value_fe.and_then(|v| {
                (total_value > 0.0).then(|| round2(v / total_value * 100.0))
            });
            ReportItem { entry, percentage }
        })
        .collect();
    // Highest value first, unpriced items at the end.
    items.sort_by(|a, b| {
        let av = a.entry.total_value_fe;
        let bv = b.entry.total_value_fe;
        bv.is_some()
            .cmp(&av.is_some())
            .then(bv.unwrap_or(0.0).total_cmp(&av.unwrap_or(0.0)))
    });

    let mut total_cost = 0.0;
    if opts.map_costs_enabled {
        for run in store.recent_runs(scope, 1000)? {
            if run.is_hub {
                continue;
            }
            total_cost +=
                valuation::value_run(store, scope, season_id, run.id, 1.0)?.map_cost_fe;
        }
    }

    let run_count = store.completed_run_count(scope)?;
    let mut total_duration = 0.0;
    for run in store.recent_runs(scope, 1000)? {
        if !run.is_hub && run.end_ts.is_some() {
            total_duration += run_duration_excluding_subs(store, &run, now)?;
        }
    }

    let profit = total_value - total_cost;
    Ok(LootReport {
        items,
        total_value_fe: round2(total_value),
        total_map_cost_fe: round2(total_cost),
        profit_fe: round2(profit),
        run_count,
        total_duration_seconds: round2(total_duration),
        profit_per_hour: if total_duration > 0.0 {
            round2(profit / total_duration * 3600.0)
        } else {
            0.0
        },
        profit_per_map: if run_count > 0 {
            round2(profit / run_count as f64)
        } else {
            0.0
        },
        map_costs_enabled: opts.map_costs_enabled,
    })
}

/// Render the cumulative report as CSV.
pub fn report_to_csv(report: &LootReport) -> String {
    let mut lines = Vec::with_capacity(report.items.len() + 10);
    lines.push("Item Name,Type ID,Quantity,Unit Price (FE),Total Value (FE),Percentage".to_string());
    for item in &report.items {
        let name = format!("\"{}\"", item.entry.name.replace('"', "\"\""));
        let unit = item
            .entry
            .price_fe
            .map(|p| format!("{p:.2}"))
            .unwrap_or_default();
        let total = item
            .entry
            .total_value_fe
            .map(|v| format!("{v:.2}"))
            .unwrap_or_default();
        let pct = item
            .percentage
            .map(|p| format!("{p:.2}"))
            .unwrap_or_default();
        lines.push(format!(
            "{name},{},{},{unit},{total},{pct}",
            item.entry.type_id, item.entry.quantity
        ));
    }
    lines.push(String::new());
    lines.push("Summary".to_string());
    lines.push(format!("Gross Value (FE),{:.2}", report.total_value_fe));
    if report.map_costs_enabled {
        lines.push(format!("Map Costs (FE),{:.2}", report.total_map_cost_fe));
    }
    lines.push(format!("Profit (FE),{:.2}", report.profit_fe));
    lines.push(format!("Runs,{}", report.run_count));
    lines.push(format!(
        "Total Time (seconds),{:.0}",
        report.total_duration_seconds
    ));
    lines.push(format!("Profit/Hour (FE),{:.2}", report.profit_per_hour));
    lines.push(format!("Profit/Map (FE),{:.2}", report.profit_per_map));
    lines.push(format!("Unique Items,{}", report.items.len()));
    lines.join("\n")
}

/// One point of the value-history series.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub bucket: DateTime<Utc>,
    pub value_fe: f64,
    pub cumulative_fe: f64,
}

/// Hourly buckets of pickup value over the trailing window, valued at
/// current effective prices.
pub fn value_history(
    store: &Store,
    scope: &str,
    season_id: i64,
    hours: i64,
    now: DateTime<Utc>,
) -> Result<Vec<HistoryPoint>, StoreError> {
    let opts = ValuationOptions::load(store)?;
    let since = now - Duration::hours(hours);
    let deltas = store.deltas_since(scope, since)?;

    let mut buckets: std::collections::BTreeMap<DateTime<Utc>, f64> =
        std::collections::BTreeMap::new();
    for delta in deltas {
        if delta.context_tag() != EventContext::PickItems || delta.run_id.is_none() {
            continue;
        }
        let value = if delta.type_id == BASE_CURRENCY_ID {
            delta.delta as f64
        } else {
            match valuation::effective_price(store, scope, season_id, delta.type_id)? {
                Some(p) => p.value_fe * delta.delta as f64 * opts.tax_multiplier,
                None => continue,
            }
        };
        let bucket = delta
            .timestamp
            .duration_trunc(Duration::hours(1))
            .unwrap_or(delta.timestamp);
        *buckets.entry(bucket).or_default() += value;
    }

    let mut cumulative = 0.0;
    Ok(buckets
        .into_iter()
        .map(|(bucket, value)| {
            cumulative += value;
            HistoryPoint {
                bucket,
                value_fe: round2(value),
                cumulative_fe: round2(cumulative),
            }
        })
        .collect())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
