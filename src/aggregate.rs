use crate::protocol::StepResult;
use serde::Serialize;
use std::fmt;

// -------------------------
// Price parsing
// -------------------------

/// Leading numeric run of a display price, thousands separators stripped:
/// `"₩ 123,456"` gives `123456`, `"no digits here"` gives `None`.
pub fn extract_numeric_price(s: &str) -> Option<u64> {
    if !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let run: String = s
        .chars()
        .map(|c| if c.is_ascii_digit() || c == ',' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .find(|t| t.chars().any(|c| c.is_ascii_digit()))?
        .replace(',', "");
    run.parse::<u64>().ok()
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// `((base - lowest) / base) * 100`, one decimal. Positive means cheaper.
pub fn discount_percentage(base_price: f64, lowest_price: f64) -> f64 {
    round1((base_price - lowest_price) / base_price * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "percent", rename_all = "snake_case")]
pub enum Discount {
    /// No baseline captured yet.
    Pending,
    Cheaper(f64),
    MoreExpensive(f64),
    Equal,
}

impl Discount {
    pub fn between(base_price: Option<f64>, lowest_price: f64) -> Self {
        let Some(base) = base_price.filter(|b| *b > 0.0) else {
            return Discount::Pending;
        };
        let pct = discount_percentage(base, lowest_price);
        if pct > 0.0 {
            Discount::Cheaper(pct)
        } else if pct < 0.0 {
            Discount::MoreExpensive(-pct)
        } else {
            Discount::Equal
        }
    }

    /// Signed percentage, `None` while pending.
    pub fn signed(&self) -> Option<f64> {
        match self {
            Discount::Pending => None,
            Discount::Cheaper(p) => Some(*p),
            Discount::MoreExpensive(p) => Some(-*p),
            Discount::Equal => Some(0.0),
        }
    }
}

impl fmt::Display for Discount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discount::Pending => write!(f, "pending"),
            Discount::Cheaper(p) => write!(f, "{p:.1}% cheaper"),
            Discount::MoreExpensive(p) => write!(f, "{p:.1}% more expensive"),
            Discount::Equal => write!(f, "0.0% cheaper"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowestPrice {
    pub price: u64,
    pub url: String,
    pub cid_name: String,
}

// -------------------------
// Aggregate
// -------------------------

/// What recording one step changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recorded {
    pub baseline_captured: bool,
    pub lowest_changed: bool,
    pub search_phase_completed: bool,
}

/// Accumulated results of one session plus the derived comparison state.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    all_results: Vec<StepResult>,
    base_price: Option<f64>,
    lowest: Option<LowestPrice>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: StepResult) -> Recorded {
        let mut recorded = Recorded {
            search_phase_completed: result.search_phase_completed,
            ..Recorded::default()
        };

        if result.step == 1 && self.base_price.is_none() {
            if let Some(base) = result.base_price.filter(|b| *b > 0.0) {
                self.base_price = Some(base);
                recorded.baseline_captured = true;
            }
        }

        if result.is_search_phase {
            recorded.lowest_changed = self.consider_lowest(&result);
        }

        self.all_results.push(result);
        recorded
    }

    fn consider_lowest(&mut self, result: &StepResult) -> bool {
        let Some(first) = result.prices.first() else {
            return false;
        };
        let Some(price) = extract_numeric_price(&first.price).filter(|p| *p > 0) else {
            return false;
        };
        if self.lowest.as_ref().is_some_and(|l| price >= l.price) {
            return false;
        }
        self.lowest = Some(LowestPrice {
            price,
            url: result.url.clone(),
            cid_name: result.cid_name.clone(),
        });
        true
    }

    pub fn all_results(&self) -> &[StepResult] {
        &self.all_results
    }

    pub fn search_results(&self) -> impl Iterator<Item = &StepResult> {
        self.all_results.iter().filter(|r| r.is_search_phase)
    }

    pub fn card_results(&self) -> impl Iterator<Item = &StepResult> {
        self.all_results.iter().filter(|r| !r.is_search_phase)
    }

    pub fn base_price(&self) -> Option<f64> {
        self.base_price
    }

    pub fn lowest(&self) -> Option<&LowestPrice> {
        self.lowest.as_ref()
    }

    /// Discount of the current lowest against the baseline; `None` until a
    /// lowest price exists.
    pub fn discount(&self) -> Option<Discount> {
        self.lowest
            .as_ref()
            .map(|l| Discount::between(self.base_price, l.price as f64))
    }

    pub fn total_found(&self) -> usize {
        self.all_results.iter().map(StepResult::found).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PriceEntry;

    fn result(step: usize, search: bool, price: Option<&str>) -> StepResult {
        StepResult {
            step,
            cid_name: format!("probe-{step}"),
            cid: None,
            url: format!("https://example.com/?step={step}"),
            is_search_phase: search,
            search_phase_completed: false,
            base_price: None,
            prices: price
                .map(|p| {
                    vec![PriceEntry {
                        price: p.to_string(),
                        context: String::new(),
                    }]
                })
                .unwrap_or_default(),
            discount_percentage: None,
            has_next: true,
            found_count: None,
            error: None,
            error_type: None,
        }
    }

    #[test]
    fn extracts_leading_numeric_run() {
        assert_eq!(extract_numeric_price("₩ 123,456"), Some(123456));
        assert_eq!(extract_numeric_price("no digits here"), None);
        assert_eq!(extract_numeric_price("1,234원"), Some(1234));
        assert_eq!(extract_numeric_price("from 98,000 to 120,000"), Some(98000));
        assert_eq!(extract_numeric_price("Total, ₩ 5,500"), Some(5500));
        assert_eq!(extract_numeric_price("٣٤٥"), None);
        assert_eq!(extract_numeric_price("99999999999999999999999"), None);
    }

    #[test]
    fn discount_sign_and_rounding() {
        assert_eq!(discount_percentage(100000.0, 90000.0), 10.0);
        assert_eq!(discount_percentage(100000.0, 110000.0), -10.0);
        assert_eq!(discount_percentage(100000.0, 100000.0), 0.0);
        assert_eq!(discount_percentage(30000.0, 29000.0), 3.3);

        assert_eq!(Discount::between(Some(100000.0), 90000.0), Discount::Cheaper(10.0));
        assert_eq!(
            Discount::between(Some(100000.0), 110000.0),
            Discount::MoreExpensive(10.0)
        );
        assert_eq!(Discount::between(Some(100000.0), 100000.0), Discount::Equal);
        assert_eq!(Discount::between(None, 1.0), Discount::Pending);
        assert_eq!(Discount::between(Some(0.0), 1.0), Discount::Pending);
    }

    #[test]
    fn discount_display() {
        assert_eq!(Discount::Cheaper(10.0).to_string(), "10.0% cheaper");
        assert_eq!(Discount::MoreExpensive(2.5).to_string(), "2.5% more expensive");
        assert_eq!(Discount::Equal.to_string(), "0.0% cheaper");
        assert_eq!(Discount::Pending.to_string(), "pending");
        assert_eq!(Discount::MoreExpensive(10.0).signed(), Some(-10.0));
    }

    #[test]
    fn lowest_tracks_minimum_of_search_results() {
        let mut agg = Aggregate::new();
        let prices = ["₩ 120,000", "₩ 99,000", "no price", "₩ 105,000", "₩ 98,500"];
        for (i, p) in prices.iter().enumerate() {
            agg.record(result(i, true, Some(p)));
        }
        let lowest = agg.lowest().unwrap();
        assert_eq!(lowest.price, 98500);
        assert_eq!(lowest.cid_name, "probe-4");
        assert_eq!(lowest.url, "https://example.com/?step=4");
    }

    #[test]
    fn card_results_never_touch_lowest() {
        let mut agg = Aggregate::new();
        agg.record(result(0, true, Some("₩ 100,000")));
        let recorded = agg.record(result(9, false, Some("₩ 1,000")));
        assert!(!recorded.lowest_changed);
        assert_eq!(agg.lowest().unwrap().price, 100000);
        assert_eq!(agg.card_results().count(), 1);
        assert_eq!(agg.search_results().count(), 1);
        assert_eq!(agg.all_results().len(), 2);
    }

    #[test]
    fn equal_or_zero_prices_do_not_replace_lowest() {
        let mut agg = Aggregate::new();
        agg.record(result(0, true, Some("80,000")));
        assert!(!agg.record(result(1, true, Some("80,000"))).lowest_changed);
        assert!(!agg.record(result(2, true, Some("₩ 0"))).lowest_changed);
        assert!(!agg.record(result(3, true, None)).lowest_changed);
        assert_eq!(agg.lowest().unwrap().cid_name, "probe-0");
    }

    #[test]
    fn baseline_is_captured_once_from_step_one() {
        let mut agg = Aggregate::new();

        let mut step0 = result(0, true, Some("90,000"));
        step0.base_price = Some(50000.0);
        agg.record(step0);
        assert_eq!(agg.base_price(), None);
        assert_eq!(agg.discount(), Some(Discount::Pending));

        let mut step1 = result(1, true, Some("95,000"));
        step1.base_price = Some(100000.0);
        assert!(agg.record(step1).baseline_captured);

        let mut step2 = result(2, true, None);
        step2.base_price = Some(1.0);
        assert!(!agg.record(step2).baseline_captured);

        assert_eq!(agg.base_price(), Some(100000.0));
        assert_eq!(agg.discount(), Some(Discount::Cheaper(10.0)));
    }

    #[test]
    fn total_found_prefers_backend_count() {
        let mut agg = Aggregate::new();
        let mut counted = result(0, true, Some("1,000"));
        counted.found_count = Some(5);
        agg.record(counted);
        agg.record(result(1, true, Some("2,000")));
        assert_eq!(agg.total_found(), 6);
    }
}
