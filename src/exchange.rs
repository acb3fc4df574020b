//! Exchange price learning.
//!
//! The game writes each exchange search as a multi-line socket dump: a start
//! marker carrying a SynId, a body tree, and an end marker. Requests name the
//! item being searched (`+refer`); responses list per-listing unit prices
//! under a currency section. This module correlates request and response by
//! SynId and derives a reference price from the listing window.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::event_models::{ExchangeFragment, PriceLearned};

/// Window timeout: a request with no conclusive response within this span
/// is dropped.
pub const REQUEST_TIMEOUT_SECS: i64 = 10;

/// Listings below this count produce no reference price.
pub const MIN_LISTINGS: usize = 3;

/// The message currently being accumulated between start and end markers.
#[derive(Debug)]
enum OpenMessage {
    Request {
        syn_id: i64,
        type_id: Option<i64>,
    },
    Response {
        syn_id: i64,
        in_base_section: bool,
        prices: Vec<f64>,
    },
}

/// Stateful correlator for exchange search messages.
///
/// The clock is passed in on every fragment so replay and tests stay
/// deterministic.
#[derive(Debug)]
pub struct ExchangeParser {
    base_currency_id: i64,
    timeout: Duration,
    open: Option<OpenMessage>,
    /// SynId → (searched TypeId, request time)
    pending: HashMap<i64, (i64, DateTime<Utc>)>,
}

impl ExchangeParser {
    pub fn new(base_currency_id: i64) -> Self {
        Self {
            base_currency_id,
            timeout: Duration::seconds(REQUEST_TIMEOUT_SECS),
            open: None,
            pending: HashMap::new(),
        }
    }

    /// Feed one fragment; returns a learned price when a response window
    /// conclusively closes.
    pub fn handle_fragment(
        &mut self,
        fragment: &ExchangeFragment,
        now: DateTime<Utc>,
    ) -> Option<PriceLearned> {
        self.expire_pending(now);

        match fragment {
            ExchangeFragment::SearchRequest { syn_id } => {
                // A new search closes whatever was open, conclusively or not.
                let learned = self.finish_open(now);
                self.open = Some(OpenMessage::Request {
                    syn_id: *syn_id,
                    type_id: None,
                });
                learned
            }
            ExchangeFragment::SearchResponse { syn_id } => {
                let learned = self.finish_open(now);
                self.open = Some(OpenMessage::Response {
                    syn_id: *syn_id,
                    in_base_section: false,
                    prices: Vec::new(),
                });
                learned
            }
            ExchangeFragment::End => self.finish_open(now),
            ExchangeFragment::Refer { type_id } => {
                if let Some(OpenMessage::Request { type_id: slot, .. }) = &mut self.open {
                    *slot = Some(*type_id);
                }
                None
            }
            ExchangeFragment::Currency { type_id } => {
                if let Some(OpenMessage::Response {
                    in_base_section, ..
                }) = &mut self.open
                {
                    *in_base_section = *type_id == self.base_currency_id;
                }
                None
            }
            ExchangeFragment::UnitPrice { price } => {
                if let Some(OpenMessage::Response {
                    in_base_section: true,
                    prices,
                    ..
                }) = &mut self.open
                {
                    if price.is_finite() && *price > 0.0 {
                        prices.push(*price);
                    }
                }
                None
            }
        }
    }

    /// Close the open message. A request registers its pending search; a
    /// response resolves against it and may emit a learned price.
    fn finish_open(&mut self, now: DateTime<Utc>) -> Option<PriceLearned> {
        match self.open.take()? {
            OpenMessage::Request { syn_id, type_id } => {
                if let Some(type_id) = type_id {
                    self.pending.insert(syn_id, (type_id, now));
                }
                None
            }
            OpenMessage::Response {
                syn_id,
                mut prices,
                ..
            } => {
                let (type_id, requested_at) = self.pending.remove(&syn_id)?;
                if now.signed_duration_since(requested_at) > self.timeout {
                    return None;
                }
                // The base currency's value is fixed at 1 and never learned.
                if type_id == self.base_currency_id {
                    return None;
                }
                if prices.len() < MIN_LISTINGS {
                    return None;
                }
                prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                Some(PriceLearned {
                    type_id,
                    reference_price: percentile_10(&prices),
                    listing_count: prices.len(),
                    learned_at: now,
                })
            }
        }
    }

    fn expire_pending(&mut self, now: DateTime<Utc>) {
        let timeout = self.timeout;
        self.pending
            .retain(|_, (_, ts)| now.signed_duration_since(*ts) <= timeout);
    }
}

/// 10th percentile of a sorted price list, linearly interpolated for
/// fractional positions.
pub fn percentile_10(sorted: &[f64]) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = 0.10 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;
    if frac == 0.0 || lo + 1 >= sorted.len() {
        sorted[lo]
    } else {
        sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BASE: i64 = 100300;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn feed_search(
        parser: &mut ExchangeParser,
        syn_id: i64,
        type_id: i64,
        t: i64,
    ) -> Option<PriceLearned> {
        let mut out = None;
        for frag in [
            ExchangeFragment::SearchRequest { syn_id },
            ExchangeFragment::Refer { type_id },
            ExchangeFragment::End,
        ] {
            out = parser.handle_fragment(&frag, at(t)).or(out);
        }
        out
    }

    fn feed_response(
        parser: &mut ExchangeParser,
        syn_id: i64,
        prices: &[f64],
        t: i64,
    ) -> Option<PriceLearned> {
        let mut out = None;
        out = parser
            .handle_fragment(&ExchangeFragment::SearchResponse { syn_id }, at(t))
            .or(out);
        out = parser
            .handle_fragment(&ExchangeFragment::Currency { type_id: BASE }, at(t))
            .or(out);
        for p in prices {
            out = parser
                .handle_fragment(&ExchangeFragment::UnitPrice { price: *p }, at(t))
                .or(out);
        }
        parser.handle_fragment(&ExchangeFragment::End, at(t)).or(out)
    }

    #[test]
    fn test_reference_price_is_interpolated_tenth_percentile() {
        let mut parser = ExchangeParser::new(BASE);
        feed_search(&mut parser, 7, 100210, 0);
        let learned = feed_response(&mut parser, 7, &[0.10, 0.12, 0.15, 0.20, 1.50], 1)
            .expect("price should be learned");
        assert_eq!(learned.type_id, 100210);
        assert!((learned.reference_price - 0.108).abs() < 1e-9);
        assert_eq!(learned.listing_count, 5);
    }

    #[test]
    fn test_fewer_than_three_listings_emits_nothing() {
        let mut parser = ExchangeParser::new(BASE);
        feed_search(&mut parser, 1, 100210, 0);
        assert!(feed_response(&mut parser, 1, &[0.5, 0.6], 1).is_none());
    }

    #[test]
    fn test_base_currency_is_never_learned() {
        let mut parser = ExchangeParser::new(BASE);
        feed_search(&mut parser, 2, BASE, 0);
        assert!(feed_response(&mut parser, 2, &[1.0, 1.0, 1.0], 1).is_none());
    }

    #[test]
    fn test_window_times_out() {
        let mut parser = ExchangeParser::new(BASE);
        feed_search(&mut parser, 3, 100210, 0);
        assert!(feed_response(&mut parser, 3, &[0.1, 0.2, 0.3], 30).is_none());
    }

    #[test]
    fn test_prices_outside_base_currency_section_ignored() {
        let mut parser = ExchangeParser::new(BASE);
        feed_search(&mut parser, 4, 100210, 0);
        let t = at(1);
        parser.handle_fragment(&ExchangeFragment::SearchResponse { syn_id: 4 }, t);
        // Foreign currency section first
        parser.handle_fragment(&ExchangeFragment::Currency { type_id: 999 }, t);
        parser.handle_fragment(&ExchangeFragment::UnitPrice { price: 50.0 }, t);
        // Then the base section
        parser.handle_fragment(&ExchangeFragment::Currency { type_id: BASE }, t);
        for p in [0.2, 0.3, 0.4] {
            parser.handle_fragment(&ExchangeFragment::UnitPrice { price: p }, t);
        }
        let learned = parser
            .handle_fragment(&ExchangeFragment::End, t)
            .expect("learned");
        assert_eq!(learned.listing_count, 3);
        assert!((learned.reference_price - 0.22).abs() < 1e-9);
    }

    #[test]
    fn test_new_search_closes_previous_window() {
        let mut parser = ExchangeParser::new(BASE);
        feed_search(&mut parser, 5, 100210, 0);
        // Response never ends; a new search begins instead.
        parser.handle_fragment(&ExchangeFragment::SearchResponse { syn_id: 5 }, at(1));
        parser.handle_fragment(&ExchangeFragment::Currency { type_id: BASE }, at(1));
        parser.handle_fragment(&ExchangeFragment::UnitPrice { price: 0.1 }, at(1));
        // Truncated: the next request discards the half-open response but the
        // response itself still resolves (it had its end implied by the new
        // start), only with too few listings to emit.
        assert!(
            feed_search(&mut parser, 6, 100211, 2).is_none(),
            "truncated window must not emit"
        );
    }

    #[test]
    fn test_percentile_interpolation_bounds() {
        assert!((percentile_10(&[1.0]) - 1.0).abs() < 1e-12);
        assert!((percentile_10(&[1.0, 2.0]) - 1.1).abs() < 1e-12);
    }
}
