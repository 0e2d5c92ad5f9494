//! Client-side (browser navigation) timings supplied out-of-band on first view.

use serde::Serialize;

const BASE_KEY: &str = "navigationStart";
const START_SUFFIX: &str = "Start";
const END_SUFFIX: &str = "End";
const FORM_PREFIX: &str = "clientPerformance";

/// Raw client performance data as posted by the page script.
///
/// Timing entries keep their submission order; it decides the order of the
/// resulting rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientPerformance {
    timing: Vec<(String, String)>,
    redirect_count: Option<String>,
}

impl ClientPerformance {
    /// Builds from an already-extracted timing mapping.
    pub fn new<I, K, V>(timing: I, redirect_count: Option<String>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut perf = Self {
            timing: Vec::new(),
            redirect_count,
        };
        for (key, value) in timing {
            perf.insert_timing(key.into(), value.into());
        }
        perf
    }

    /// Extracts `clientPerformance[timing][*]` and
    /// `clientPerformance[navigation][redirectCount]` from decoded form pairs.
    /// Unrelated pairs are ignored.
    pub fn from_form_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut perf = Self::default();
        for (key, value) in pairs {
            let Some(path) = form_path(key.as_ref()) else {
                continue;
            };
            match path.as_slice() {
                ["timing", name] => perf.insert_timing((*name).to_owned(), value.into()),
                ["navigation", "redirectCount"] => perf.redirect_count = Some(value.into()),
                _ => {}
            }
        }
        perf
    }

    /// Timing entries in submission order.
    pub fn timing(&self) -> &[(String, String)] {
        &self.timing
    }

    /// Raw redirect count, if supplied.
    pub fn redirect_count(&self) -> Option<&str> {
        self.redirect_count.as_deref()
    }

    fn insert_timing(&mut self, key: String, value: String) {
        match self.timing.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.timing.push((key, value)),
        }
    }

    fn value(&self, key: &str) -> Option<&str> {
        self.timing
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// One client timing row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientTiming {
    /// Human readable name, e.g. `Dom Loading`.
    pub name: String,
    /// Offset from `navigationStart`.
    pub start: i64,
    /// Interval length; `-1` marks a single point in time.
    pub duration: i64,
}

/// Parsed client timings attached to a trace on its first view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientAnnex {
    /// Redirects the browser followed before the page loaded.
    pub redirect_count: i64,
    /// Interval rows first, then single-point rows.
    pub timings: Vec<ClientTiming>,
}

impl ClientAnnex {
    /// Converts raw client data into timing rows.
    ///
    /// Returns `None` when there is no `navigationStart` base to measure from.
    /// Rows whose offsets do not fit in an `i64` are dropped.
    pub fn parse(perf: &ClientPerformance) -> Option<Self> {
        let base = perf.value(BASE_KEY).map(lenient_int)?;
        let mut timings = Vec::new();

        for (key, value) in &perf.timing {
            let Some(stem) = key.strip_suffix(START_SUFFIX) else {
                continue;
            };
            if key == BASE_KEY {
                continue;
            }
            let Some(start) = lenient_int(value).checked_sub(base) else {
                continue;
            };
            if start < 0 {
                continue;
            }
            let end_key = format!("{stem}{END_SUFFIX}");
            let Some(finish) = perf.value(&end_key).map(lenient_int).unwrap_or(0).checked_sub(base)
            else {
                continue;
            };
            let duration = if finish > start {
                finish.checked_sub(start).unwrap_or(0)
            } else {
                0
            };
            timings.push(ClientTiming {
                name: humanize(stem),
                start,
                duration,
            });
        }

        for (key, value) in &perf.timing {
            if key.ends_with(START_SUFFIX) || key.ends_with(END_SUFFIX) {
                continue;
            }
            let Some(start) = lenient_int(value).checked_sub(base) else {
                continue;
            };
            timings.push(ClientTiming {
                name: key.clone(),
                start,
                duration: -1,
            });
        }

        Some(Self {
            redirect_count: perf.redirect_count().map(lenient_int).unwrap_or(0),
            timings,
        })
    }
}

/// `clientPerformance[a][b]` -> `["a", "b"]`.
fn form_path(key: &str) -> Option<Vec<&str>> {
    let rest = key.strip_prefix(FORM_PREFIX)?;
    let mut parts = Vec::new();
    let mut remaining = rest;
    while !remaining.is_empty() {
        let inner = remaining.strip_prefix('[')?;
        let close = inner.find(']')?;
        parts.push(&inner[..close]);
        remaining = &inner[close + 1..];
    }
    Some(parts)
}

/// Leading-integer conversion: optional sign then digits, anything else yields 0.
fn lenient_int(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        });
    if negative {
        -value
    } else {
        value
    }
}

/// `domContentLoadedEvent` -> `Dom Content Loaded Event`.
fn humanize(stem: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    for ch in stem.chars() {
        match words.last_mut() {
            Some(word) if !ch.is_uppercase() => word.push(ch),
            _ => words.push(ch.to_string()),
        }
    }
    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
